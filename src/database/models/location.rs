use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{AssignmentEntityType, AssignmentType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub location_type: String,
    pub max_occupancy: Option<i32>,
    pub current_occupancy: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LocationAssignment {
    pub assignment_id: Uuid,
    pub location_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: AssignmentEntityType,
    pub entity_id: Uuid,
    pub assignment_type: AssignmentType,
    pub priority: i32,
    pub credit_sharing_enabled: bool,
    pub credit_sharing_percentage: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LocationResource {
    pub resource_id: Uuid,
    pub location_id: Uuid,
    pub resource_type: String,
    pub name: String,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}
