use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::hierarchy::HierarchyPath;
use crate::types::OrganizationType;

/// A node of a tenant's organization tree.
///
/// `hierarchy_path` holds the strict ancestors (root first) and
/// `organization_level` equals its length.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub organization_id: Uuid,
    pub tenant_id: Uuid,
    pub parent_organization_id: Option<Uuid>,
    pub organization_type: OrganizationType,
    pub organization_level: i32,
    pub hierarchy_path: HierarchyPath,
    pub name: String,
    pub description: Option<String>,
    pub tax_id: Option<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn is_root(&self) -> bool {
        self.parent_organization_id.is_none()
    }

    /// True when `ancestor_id` sits somewhere above this node
    pub fn descends_from(&self, ancestor_id: Uuid) -> bool {
        self.hierarchy_path.contains(ancestor_id)
    }
}
