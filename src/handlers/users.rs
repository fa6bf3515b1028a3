// handlers/users.rs - /users handlers

use axum::{
    extract::{Path, State},
    Extension,
};
use uuid::Uuid;

use crate::database::models::TenantUser;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// DELETE /users/:id - deactivate, refusing the tenant's only administrator
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<TenantUser> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let deactivated = state.admin.deactivate_user(ctx.tenant_id, ctx.user_id, user_id).await?;
    ctx.audit("user.deactivate", user_id);
    Ok(ApiResponse::success(deactivated))
}
