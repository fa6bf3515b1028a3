use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::database::models::Tenant;
use crate::error::ApiError;
use crate::state::AppState;

use super::auth::AuthUser;

/// Tenant row of the authenticated caller, injected by middleware
#[derive(Clone, Debug)]
pub struct ValidatedTenant(pub Tenant);

/// Middleware that checks the JWT's tenant exists and is not suspended
pub async fn validate_tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before tenant validation"))?;

    let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
        .bind(auth_user.tenant_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!("Database error validating tenant: {}", e);
            ApiError::internal_server_error("Failed to validate tenant")
        })?
        .ok_or_else(|| {
            tracing::warn!("Tenant validation failed: tenant {} not found", auth_user.tenant_id);
            ApiError::forbidden("Tenant is not active or does not exist")
        })?;

    if !tenant.status.is_usable() {
        tracing::warn!("Tenant validation failed: tenant {} is {}", tenant.tenant_id, tenant.status);
        return Err(ApiError::forbidden("Tenant is not active or does not exist"));
    }

    tracing::debug!("Tenant validation successful: {} ({})", tenant.name, tenant.tenant_id);
    request.extensions_mut().insert(ValidatedTenant(tenant));

    Ok(next.run(request).await)
}
