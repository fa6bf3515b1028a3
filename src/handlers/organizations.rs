// handlers/organizations.rs - /organizations handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{Organization, OrganizationMembership};
use crate::hierarchy::tree::build_tree;
use crate::hierarchy::{NewMembership, NewOrganization, OrganizationUpdate, TenantHierarchy};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParentRequest {
    pub name: String,
    pub description: Option<String>,
    pub tax_id: Option<String>,
    pub parent_tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubRequest {
    pub name: String,
    pub description: Option<String>,
    pub tax_id: Option<String>,
    pub parent_organization_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub new_parent_organization_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
}

/// POST /organizations/parent - create a root organization
pub async fn create_parent(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateParentRequest>,
) -> ApiResult<Organization> {
    let ctx = user.access_context();
    if let Some(tenant_id) = body.parent_tenant_id {
        ctx.ensure_tenant(tenant_id)?;
    }
    state.gate.require_tenant_admin(&ctx).await?;

    let organization = state
        .hierarchy
        .create_organization(
            ctx.tenant_id,
            NewOrganization {
                parent_organization_id: None,
                name: body.name,
                description: body.description,
                tax_id: body.tax_id,
                created_by: Some(ctx.user_id),
            },
        )
        .await?;

    ctx.audit("organization.create", organization.organization_id);
    Ok(ApiResponse::created(organization))
}

/// POST /organizations/sub - create an organization under a visible parent
pub async fn create_sub(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateSubRequest>,
) -> ApiResult<Organization> {
    let ctx = user.access_context();
    let parent = state
        .hierarchy
        .get_organization(ctx.tenant_id, body.parent_organization_id)
        .await?;
    state.gate.ensure_organization(&ctx, &parent).await?;

    let organization = state
        .hierarchy
        .create_organization(
            ctx.tenant_id,
            NewOrganization {
                parent_organization_id: Some(parent.organization_id),
                name: body.name,
                description: body.description,
                tax_id: body.tax_id,
                created_by: Some(ctx.user_id),
            },
        )
        .await?;

    ctx.audit("organization.create", organization.organization_id);
    Ok(ApiResponse::created(organization))
}

/// GET /organizations - organizations visible to the caller
pub async fn list(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Vec<Organization>> {
    let ctx = user.access_context();
    let organizations = state.hierarchy.list_organizations(ctx.tenant_id).await?;
    let visible = state.gate.visible_organizations(&ctx, organizations).await?;
    Ok(ApiResponse::success(visible))
}

/// GET /organizations/hierarchy/:tenantId
pub async fn hierarchy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<TenantHierarchy> {
    let ctx = user.access_context();
    ctx.ensure_tenant(tenant_id)?;

    if state.gate.is_tenant_admin(&ctx).await? {
        return Ok(ApiResponse::success(state.hierarchy.get_hierarchy(tenant_id).await?));
    }

    let organizations = state.hierarchy.list_organizations(tenant_id).await?;
    let visible = state.gate.visible_organizations(&ctx, organizations).await?;
    Ok(ApiResponse::success(TenantHierarchy {
        tenant_id,
        total_organizations: visible.len(),
        hierarchy: build_tree(visible),
    }))
}

/// GET /organizations/:id/subtree
pub async fn subtree(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(organization_id): Path<Uuid>,
) -> ApiResult<Vec<Organization>> {
    let ctx = user.access_context();
    let organization = state.hierarchy.get_organization(ctx.tenant_id, organization_id).await?;
    state.gate.ensure_organization(&ctx, &organization).await?;

    let descendants = state.hierarchy.get_subtree(ctx.tenant_id, organization_id).await?;
    Ok(ApiResponse::success(descendants))
}

/// PUT /organizations/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(organization_id): Path<Uuid>,
    Json(body): Json<OrganizationUpdate>,
) -> ApiResult<Organization> {
    let ctx = user.access_context();
    let organization = state.hierarchy.get_organization(ctx.tenant_id, organization_id).await?;
    state.gate.ensure_organization(&ctx, &organization).await?;

    let updated = state
        .hierarchy
        .update_organization(ctx.tenant_id, organization_id, body)
        .await?;
    ctx.audit("organization.update", organization_id);
    Ok(ApiResponse::success(updated))
}

/// PUT /organizations/move/:id
pub async fn move_organization(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(organization_id): Path<Uuid>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<Organization> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let moved = state
        .hierarchy
        .move_organization(ctx.tenant_id, organization_id, body.new_parent_organization_id)
        .await?;
    ctx.audit("organization.move", organization_id);
    Ok(ApiResponse::success(moved))
}

/// DELETE /organizations/:id?cascade=bool
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(organization_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Value> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let deactivated = state
        .hierarchy
        .deactivate_organization(ctx.tenant_id, organization_id, query.cascade)
        .await?;
    ctx.audit("organization.delete", organization_id);
    Ok(ApiResponse::success(json!({
        "organizationId": organization_id,
        "deactivated": deactivated,
        "cascade": query.cascade
    })))
}

/// POST /organizations/:id/members
pub async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(organization_id): Path<Uuid>,
    Json(body): Json<NewMembership>,
) -> ApiResult<OrganizationMembership> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let membership = state.hierarchy.add_member(ctx.tenant_id, organization_id, body).await?;
    ctx.audit("organization.member.add", organization_id);
    Ok(ApiResponse::created(membership))
}
