use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{MembershipEntityType, MembershipStatus, MembershipType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationMembership {
    pub membership_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub entity_type: MembershipEntityType,
    pub entity_id: Uuid,
    pub membership_type: MembershipType,
    pub membership_status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

impl OrganizationMembership {
    pub fn is_active(&self) -> bool {
        self.membership_status == MembershipStatus::Active
    }
}
