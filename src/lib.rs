pub mod admin;
pub mod auth;
pub mod cli;
pub mod config;
pub mod credits;
pub mod database;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod isolation;
pub mod locations;
pub mod middleware;
pub mod scope;
pub mod services;
pub mod state;
pub mod types;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::AppState;

/// Application router without transport layers (CORS, tracing, body limit).
///
/// `/` and `/health` are public. Every other route runs JWT decoding, then
/// tenant validation, then user validation before the handler.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health::health))
        .merge(protected_routes(state.clone()))
        .with_state(state)
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(organization_routes())
        .merge(location_routes())
        .merge(credit_routes())
        .merge(credit_config_routes())
        .merge(admin_routes())
        // Layers run bottom-up: JWT first, user validation last. Route layers
        // only wrap matched routes, so unknown paths still 404.
        .route_layer(from_fn_with_state(state.clone(), middleware::validate_user_middleware))
        .route_layer(from_fn_with_state(state, middleware::validate_tenant_middleware))
        .route_layer(from_fn(middleware::jwt_auth_middleware))
}

fn organization_routes() -> Router<AppState> {
    use handlers::organizations;

    Router::new()
        .route("/organizations", get(organizations::list))
        .route("/organizations/parent", post(organizations::create_parent))
        .route("/organizations/sub", post(organizations::create_sub))
        .route("/organizations/hierarchy/:tenantId", get(organizations::hierarchy))
        .route("/organizations/move/:id", put(organizations::move_organization))
        .route(
            "/organizations/:id",
            put(organizations::update).delete(organizations::delete),
        )
        .route("/organizations/:id/subtree", get(organizations::subtree))
        .route("/organizations/:id/members", post(organizations::add_member))
}

fn location_routes() -> Router<AppState> {
    use handlers::locations;

    Router::new()
        .route("/locations", get(locations::list).post(locations::create))
        .route("/locations/", get(locations::list).post(locations::create))
        .route("/locations/:id/assign/:organizationId", post(locations::assign))
        .route("/locations/:id/assignments", get(locations::assignments))
        .route("/locations/:id/capacity", put(locations::capacity))
}

fn credit_routes() -> Router<AppState> {
    use handlers::credits;

    Router::new()
        .route("/credits/allocate", post(credits::allocate))
        .route("/credits/allocate/application", post(credits::allocate_application))
        .route("/credits/consume", post(credits::consume))
        .route("/credits/locations/:id/share", post(credits::share))
        .route("/credits/:entityId/balance", get(credits::balance))
        .route("/credits/:entityId/transactions", get(credits::transactions))
}

fn credit_config_routes() -> Router<AppState> {
    use handlers::credit_config;

    Router::new()
        .route("/credit-config/effective/:operationCode", get(credit_config::effective))
        .route("/credit-config/comprehensive", get(credit_config::comprehensive))
        .route(
            "/credit-config/overrides/:operationCode",
            put(credit_config::upsert_override).delete(credit_config::reset_override),
        )
}

fn admin_routes() -> Router<AppState> {
    use handlers::{admin_promotion, users};

    Router::new()
        .route("/admin-promotion/promote-system-admin", post(admin_promotion::promote))
        .route("/admin-promotion/revoke", post(admin_promotion::revoke))
        .route("/admin-promotion/preview/:userId", get(admin_promotion::preview))
        .route("/admin-promotion/current", get(admin_promotion::current))
        .route("/users/:id", delete(users::deactivate))
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Wrapper API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant organization hierarchy, locations, credits and admin roles",
            "endpoints": {
                "health": "/health (public)",
                "organizations": "/organizations/* (protected)",
                "locations": "/locations/* (protected)",
                "credits": "/credits/* (protected)",
                "credit_config": "/credit-config/* (protected)",
                "admin": "/admin-promotion/*, /users/:id (protected, tenant admin)"
            }
        }
    }))
}
