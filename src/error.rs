// Error taxonomy for the tenancy core and its HTTP mapping
use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the hierarchy, scope, credit and admin services.
///
/// Structural errors (`InvalidHierarchy`, `CycleDetected`,
/// `SharingPercentagesInvalid`, `Validation`) are raised before any write.
/// Balance errors abort the enclosing transaction and carry the numbers the
/// caller needs to display.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Cycle detected: organization {organization_id} cannot be moved under {new_parent_id}")]
    CycleDetected {
        organization_id: Uuid,
        new_parent_id: Uuid,
    },

    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("No credit cost configured for operation '{0}'")]
    OperationCostNotConfigured(String),

    #[error("Insufficient credits: required {required}, available {available}, shortfall {shortfall}")]
    InsufficientCredits {
        entity_id: Uuid,
        available: Decimal,
        required: Decimal,
        shortfall: Decimal,
    },

    #[error("Insufficient source balance: requested {requested}, available {available}, shortfall {shortfall}")]
    InsufficientSourceBalance {
        entity_id: Uuid,
        available: Decimal,
        requested: Decimal,
        shortfall: Decimal,
    },

    #[error("Credit sharing percentages for location {location_id} sum to {total}")]
    SharingPercentagesInvalid { location_id: Uuid, total: Decimal },

    #[error("Transferring the system administrator role requires confirmation")]
    ConfirmationRequired {
        current_admin: Uuid,
        required_code: String,
        expires_at: DateTime<Utc>,
        force_requested: bool,
    },

    #[error("User {0} is the only active system administrator")]
    CannotDeleteOnlyAdmin(Uuid),

    #[error("Requested entity belongs to another tenant")]
    TenantMismatch,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Turn a unique-constraint violation into `Conflict`, pass anything else through.
    pub fn on_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                CoreError::Conflict(message.into())
            }
            _ => CoreError::Database(err),
        }
    }

    pub fn not_found(what: &str, id: Uuid) -> Self {
        CoreError::NotFound(format!("{} {} not found", what, id))
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),

    // Domain errors that carry a payload for the client (balances, confirmation codes)
    Detailed {
        status: u16,
        code: &'static str,
        message: String,
        details: Value,
    },
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::Detailed { status, .. } => *status,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
            ApiError::Detailed { message, .. } => message,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Detailed { code, .. } => code,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError {
                message,
                field_errors,
            } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            ApiError::Detailed {
                code,
                message,
                details,
                ..
            } => {
                json!({
                    "error": true,
                    "message": message,
                    "code": code,
                    "details": details
                })
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    fn detailed(status: u16, code: &'static str, message: String, details: Value) -> Self {
        ApiError::Detailed {
            status,
            code,
            message,
            details,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::InvalidHierarchy(_) => {
                ApiError::detailed(400, "INVALID_HIERARCHY", message, Value::Null)
            }
            CoreError::CycleDetected {
                organization_id,
                new_parent_id,
            } => ApiError::detailed(
                409,
                "CYCLE_DETECTED",
                message,
                json!({
                    "organizationId": organization_id,
                    "newParentOrganizationId": new_parent_id
                }),
            ),
            CoreError::ScopeNotFound(_) => {
                ApiError::detailed(404, "SCOPE_NOT_FOUND", message, Value::Null)
            }
            CoreError::OperationCostNotConfigured(operation) => ApiError::detailed(
                422,
                "OPERATION_COST_NOT_CONFIGURED",
                message,
                json!({ "operationCode": operation }),
            ),
            CoreError::InsufficientCredits {
                entity_id,
                available,
                required,
                shortfall,
            } => ApiError::detailed(
                402,
                "INSUFFICIENT_CREDITS",
                message,
                json!({
                    "entityId": entity_id,
                    "availableCredits": available,
                    "requiredCredits": required,
                    "shortfall": shortfall
                }),
            ),
            CoreError::InsufficientSourceBalance {
                entity_id,
                available,
                requested,
                shortfall,
            } => ApiError::detailed(
                402,
                "INSUFFICIENT_SOURCE_BALANCE",
                message,
                json!({
                    "sourceEntityId": entity_id,
                    "availableCredits": available,
                    "requestedCredits": requested,
                    "shortfall": shortfall
                }),
            ),
            CoreError::SharingPercentagesInvalid { location_id, total } => ApiError::detailed(
                422,
                "SHARING_PERCENTAGES_INVALID",
                message,
                json!({ "locationId": location_id, "totalPercentage": total }),
            ),
            CoreError::ConfirmationRequired {
                current_admin,
                required_code,
                expires_at,
                force_requested,
            } => {
                // Blocked by an existing admin is a conflict; a forced transfer
                // with a missing or wrong code is a bad request.
                let status = if force_requested { 400 } else { 409 };
                ApiError::detailed(
                    status,
                    "CONFIRMATION_REQUIRED",
                    message,
                    json!({
                        "currentAdminUserId": current_admin,
                        "requiredConfirmationCode": required_code,
                        "confirmationExpiresAt": expires_at,
                        "requiresForceTransfer": true
                    }),
                )
            }
            CoreError::CannotDeleteOnlyAdmin(user_id) => ApiError::detailed(
                409,
                "CANNOT_DELETE_ONLY_ADMIN",
                message,
                json!({ "userId": user_id }),
            ),
            CoreError::TenantMismatch => ApiError::detailed(
                403,
                "TENANT_MISMATCH",
                "Access to this resource is not permitted".to_string(),
                Value::Null,
            ),
            CoreError::NotFound(msg) => ApiError::not_found(msg),
            CoreError::Validation(msg) => ApiError::validation_error(msg, None),
            CoreError::Conflict(msg) => ApiError::conflict(msg),
            CoreError::Forbidden(msg) => ApiError::forbidden(msg),
            CoreError::Database(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::ConfigMissing(_)
            | crate::database::manager::DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("Database configuration error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            crate::database::manager::DatabaseError::Migration(msg) => {
                tracing::error!("Migration error: {}", msg);
                ApiError::service_unavailable("Service is being updated, please try again later")
            }
            crate::database::manager::DatabaseError::Sqlx(sqlx_err) => {
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_required_maps_to_conflict_without_force() {
        let err = CoreError::ConfirmationRequired {
            current_admin: Uuid::new_v4(),
            required_code: "ABCD1234".to_string(),
            expires_at: Utc::now(),
            force_requested: false,
        };
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), 409);
        assert_eq!(api.to_json()["details"]["requiredConfirmationCode"], "ABCD1234");
    }

    #[test]
    fn confirmation_required_maps_to_bad_request_with_force() {
        let err = CoreError::ConfirmationRequired {
            current_admin: Uuid::new_v4(),
            required_code: "ABCD1234".to_string(),
            expires_at: Utc::now(),
            force_requested: true,
        };
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), 400);
        assert_eq!(api.error_code(), "CONFIRMATION_REQUIRED");
    }

    #[test]
    fn insufficient_credits_reports_shortfall() {
        let err = CoreError::InsufficientCredits {
            entity_id: Uuid::new_v4(),
            available: Decimal::from(5),
            required: Decimal::from(12),
            shortfall: Decimal::from(7),
        };
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), 402);
        let body = api.to_json();
        assert_eq!(body["details"]["shortfall"], json!(Decimal::from(7)));
    }

    #[test]
    fn tenant_mismatch_leaks_no_identifiers() {
        let api: ApiError = CoreError::TenantMismatch.into();
        assert_eq!(api.status_code(), 403);
        assert!(api.to_json()["details"].is_null());
    }

    #[test]
    fn database_errors_are_generic() {
        let api: ApiError = CoreError::Database(sqlx::Error::RowNotFound).into();
        assert_eq!(api.status_code(), 500);
        assert_eq!(api.message(), "An error occurred while processing your request");
    }
}
