use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::database::models::TenantUser;
use crate::error::ApiError;
use crate::state::AppState;

use super::auth::AuthUser;

/// User row of the authenticated caller, injected by middleware
#[derive(Clone, Debug)]
pub struct ValidatedUser(pub TenantUser);

/// Middleware that checks the JWT's user is an active member of the JWT's tenant
pub async fn validate_user_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before user validation"))?;

    let user = sqlx::query_as::<_, TenantUser>("SELECT * FROM tenant_users WHERE user_id = $1")
        .bind(auth_user.user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!("Database error validating user {}: {}", auth_user.user_id, e);
            ApiError::internal_server_error("Failed to validate user")
        })?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            tracing::warn!("User validation failed: user {} not found or inactive", auth_user.user_id);
            ApiError::forbidden("User is not active")
        })?;

    if user.tenant_id != auth_user.tenant_id {
        tracing::warn!(
            "User validation failed: user {} does not belong to tenant {}",
            user.user_id,
            auth_user.tenant_id
        );
        return Err(ApiError::forbidden("User authentication mismatch"));
    }

    request.extensions_mut().insert(ValidatedUser(user));

    Ok(next.run(request).await)
}
