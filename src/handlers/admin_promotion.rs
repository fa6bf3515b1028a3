// handlers/admin_promotion.rs - /admin-promotion handlers

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::admin::{CurrentAdmin, PromoteRequest, PromotionImpact, PromotionOutcome};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// POST /admin-promotion/promote-system-admin
///
/// Replacing a sitting administrator answers 409 with a confirmation code
/// the first time; repeat the call with `forceTransfer` and that code.
pub async fn promote(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PromoteRequest>,
) -> ApiResult<PromotionOutcome> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let target = body.target_user_id;
    let outcome = state.admin.promote(ctx.tenant_id, ctx.user_id, body).await?;
    if outcome.changed {
        ctx.audit("admin.promote", target);
    }
    Ok(ApiResponse::success(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub user_id: Uuid,
    pub successor_user_id: Option<Uuid>,
}

/// POST /admin-promotion/revoke
pub async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RevokeRequest>,
) -> ApiResult<PromotionOutcome> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;

    let outcome = state
        .admin
        .revoke_admin(ctx.tenant_id, ctx.user_id, body.user_id, body.successor_user_id)
        .await?;
    ctx.audit("admin.revoke", body.user_id);
    Ok(ApiResponse::success(outcome))
}

/// GET /admin-promotion/preview/:userId
pub async fn preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<PromotionImpact> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;
    Ok(ApiResponse::success(
        state.admin.preview_promotion(ctx.tenant_id, user_id).await?,
    ))
}

/// GET /admin-promotion/current
pub async fn current(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<CurrentAdmin> {
    let ctx = user.access_context();
    state.gate.require_tenant_admin(&ctx).await?;
    Ok(ApiResponse::success(state.admin.current(ctx.tenant_id).await?))
}
