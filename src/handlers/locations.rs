// handlers/locations.rs - /locations handlers

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::{Location, LocationAssignment};
use crate::locations::{AssignmentRequest, CapacityUpdate, LocationCapacity, NewLocation};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// POST /locations/
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewLocation>,
) -> ApiResult<Location> {
    let ctx = user.access_context();
    match body.organization_id {
        Some(organization_id) => {
            let organization = state.hierarchy.get_organization(ctx.tenant_id, organization_id).await?;
            state.gate.ensure_organization(&ctx, &organization).await?;
        }
        None => state.gate.require_tenant_admin(&ctx).await?,
    }

    let location = state.locations.create_location(ctx.tenant_id, body).await?;
    ctx.audit("location.create", location.location_id);
    Ok(ApiResponse::created(location))
}

/// GET /locations
pub async fn list(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Vec<Location>> {
    let ctx = user.access_context();
    let locations = state.locations.list(ctx.tenant_id).await?;
    Ok(ApiResponse::success(state.gate.visible_locations(&ctx, locations).await?))
}

/// POST /locations/:id/assign/:organizationId - body is optional
pub async fn assign(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((location_id, organization_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<AssignmentRequest>>,
) -> ApiResult<LocationAssignment> {
    let ctx = user.access_context();
    let organization = state.hierarchy.get_organization(ctx.tenant_id, organization_id).await?;
    state.gate.ensure_organization(&ctx, &organization).await?;

    let request = body.map(|Json(b)| b).unwrap_or_default();
    let assignment = state
        .locations
        .assign_location(ctx.tenant_id, location_id, organization_id, request)
        .await?;
    ctx.audit("location.assign", location_id);
    Ok(ApiResponse::created(assignment))
}

/// GET /locations/:id/assignments
pub async fn assignments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(location_id): Path<Uuid>,
) -> ApiResult<Vec<LocationAssignment>> {
    let ctx = user.access_context();
    let location = state.locations.get_location(ctx.tenant_id, location_id).await?;
    state.gate.ensure_location(&ctx, &location).await?;
    Ok(ApiResponse::success(
        state.locations.list_assignments(ctx.tenant_id, location_id).await?,
    ))
}

/// PUT /locations/:id/capacity
pub async fn capacity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(location_id): Path<Uuid>,
    Json(body): Json<CapacityUpdate>,
) -> ApiResult<LocationCapacity> {
    let ctx = user.access_context();
    let location = state.locations.get_location(ctx.tenant_id, location_id).await?;
    state.gate.ensure_location(&ctx, &location).await?;

    let updated = state.locations.update_capacity(ctx.tenant_id, location_id, body).await?;
    ctx.audit("location.capacity", location_id);
    Ok(ApiResponse::success(updated))
}
