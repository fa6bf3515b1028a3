// handlers/credit_config.rs - /credit-config handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::credits::{ComprehensiveConfigurations, ConfigValues, EffectiveCost, OverrideTarget};
use crate::database::models::CreditConfiguration;
use crate::error::ApiError;
use crate::isolation::AccessContext;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::scope::RequestContext;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveQuery {
    pub tenant_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    #[serde(flatten)]
    pub values: ConfigValues,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetQuery {
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub application_code: Option<String>,
}

/// Pick the override target, checking the entity is visible to the caller.
/// Naming both an organization and a location is ambiguous.
async fn override_target(
    state: &AppState,
    ctx: &AccessContext,
    organization_id: Option<Uuid>,
    location_id: Option<Uuid>,
) -> Result<OverrideTarget, ApiError> {
    match (organization_id, location_id) {
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "Specify either organizationId or locationId, not both",
        )),
        (Some(organization_id), None) => {
            let organization = state.hierarchy.get_organization(ctx.tenant_id, organization_id).await?;
            state.gate.ensure_organization(ctx, &organization).await?;
            Ok(OverrideTarget::Organization(organization_id))
        }
        (None, Some(location_id)) => {
            let location = state.locations.get_location(ctx.tenant_id, location_id).await?;
            state.gate.ensure_location(ctx, &location).await?;
            Ok(OverrideTarget::Location(location_id))
        }
        (None, None) => Ok(OverrideTarget::Tenant),
    }
}

/// GET /credit-config/effective/:operationCode
pub async fn effective(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(operation_code): Path<String>,
    Query(query): Query<EffectiveQuery>,
) -> ApiResult<EffectiveCost> {
    let ctx = user.access_context();
    if let Some(tenant_id) = query.tenant_id {
        ctx.ensure_tenant(tenant_id)?;
    }
    state
        .gate
        .ensure_pricing_scope(&ctx, query.organization_id, query.location_id)
        .await?;

    let request = RequestContext::tenant(ctx.tenant_id, ctx.application_code.clone())
        .with_organization(query.organization_id)
        .with_location(query.location_id)
        .with_user(Some(ctx.user_id));
    let chain = state.scopes.resolve_scope(&request).await?;

    let cost = state.configs.get_effective_cost(&operation_code, &chain).await?;
    Ok(ApiResponse::success(cost))
}

/// GET /credit-config/comprehensive
pub async fn comprehensive(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<ComprehensiveConfigurations> {
    let ctx = user.access_context();
    let all = state
        .configs
        .get_comprehensive_configurations(ctx.tenant_id, &ctx.application_code)
        .await?;

    // Entity rows are narrowed to what the caller can see
    let organizations = state.gate.organization_visibility(&ctx).await?;
    let locations = state.gate.location_visibility(&ctx).await?;
    let entity_rows = ctx
        .filter_configurations(all.entity_rows)
        .into_iter()
        .filter(|row| match row.entity_id {
            Some(id) => organizations.allows(id) || locations.allows(id),
            None => true,
        })
        .collect();

    Ok(ApiResponse::success(ComprehensiveConfigurations {
        tenant_rows: ctx.filter_configurations(all.tenant_rows),
        entity_rows,
        global_rows: ctx.filter_configurations(all.global_rows),
    }))
}

/// PUT /credit-config/overrides/:operationCode
pub async fn upsert_override(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(operation_code): Path<String>,
    Json(body): Json<OverrideRequest>,
) -> ApiResult<CreditConfiguration> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;
    let target = override_target(&state, &ctx, body.organization_id, body.location_id).await?;

    let row = state
        .configs
        .upsert_override(ctx.tenant_id, target, &operation_code, body.values)
        .await?;
    ctx.audit("credit_config.override", row.config_id);
    Ok(ApiResponse::success(row))
}

/// DELETE /credit-config/overrides/:operationCode
pub async fn reset_override(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(operation_code): Path<String>,
    Query(query): Query<ResetQuery>,
) -> ApiResult<Value> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;
    let target = override_target(&state, &ctx, query.organization_id, query.location_id).await?;

    let application_code = query.application_code.map(|code| code.trim().to_lowercase());
    let removed = state
        .configs
        .reset_override(ctx.tenant_id, target, &operation_code, application_code.as_deref())
        .await?;
    ctx.audit("credit_config.reset", ctx.tenant_id);
    Ok(ApiResponse::success(json!({
        "operationCode": operation_code,
        "target": target,
        "removed": removed
    })))
}
