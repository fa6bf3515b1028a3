use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Name of the built-in role seeded into every tenant
pub const SYSTEM_ADMIN_ROLE: &str = "System Administrator";

/// Permission that grants tenant-wide visibility without being the system admin
pub const TENANT_ADMIN_PERMISSION: &str = "tenant.admin";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomRole {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
    pub description: String,
    pub permissions: Vec<String>,
    pub is_system_role: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleAssignment {
    pub assignment_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub is_system_admin: bool,
    pub organization_id: Option<Uuid>,
    pub is_active: bool,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminTransferConfirmation {
    pub confirmation_id: Uuid,
    pub tenant_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
