use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{LocationAssignment, Organization};
use crate::types::{AssignmentEntityType, AssignmentType};

/// What a request is acting on, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub application_code: String,
}

impl RequestContext {
    pub fn tenant(tenant_id: Uuid, application_code: impl Into<String>) -> Self {
        Self {
            tenant_id,
            organization_id: None,
            location_id: None,
            user_id: None,
            application_code: application_code.into(),
        }
    }

    pub fn with_organization(mut self, organization_id: Option<Uuid>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_location(mut self, location_id: Option<Uuid>) -> Self {
        self.location_id = location_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "level", content = "id", rename_all = "lowercase")]
pub enum ScopeLevel {
    Location(Uuid),
    Organization(Uuid),
    Tenant(Uuid),
}

impl ScopeLevel {
    pub fn id(&self) -> Uuid {
        match self {
            ScopeLevel::Location(id) | ScopeLevel::Organization(id) | ScopeLevel::Tenant(id) => *id,
        }
    }
}

/// Validated scope of a request, most specific level first and the tenant last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeChain {
    tenant_id: Uuid,
    levels: Vec<ScopeLevel>,
    user_id: Option<Uuid>,
    application_code: String,
}

impl ScopeChain {
    /// Assemble `[location?, organization?, ancestors nearest-first, tenant]`
    pub fn build(
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        organization: Option<&Organization>,
        user_id: Option<Uuid>,
        application_code: impl Into<String>,
    ) -> Self {
        let mut levels = Vec::new();
        if let Some(location_id) = location_id {
            levels.push(ScopeLevel::Location(location_id));
        }
        if let Some(org) = organization {
            levels.push(ScopeLevel::Organization(org.organization_id));
            levels.extend(org.hierarchy_path.nearest_first().map(ScopeLevel::Organization));
        }
        levels.push(ScopeLevel::Tenant(tenant_id));

        Self {
            tenant_id,
            levels,
            user_id,
            application_code: application_code.into(),
        }
    }

    pub fn levels(&self) -> &[ScopeLevel] {
        &self.levels
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn location_id(&self) -> Option<Uuid> {
        self.levels.iter().find_map(|level| match level {
            ScopeLevel::Location(id) => Some(*id),
            _ => None,
        })
    }

    /// The organization the request targets, before its ancestors
    pub fn organization_id(&self) -> Option<Uuid> {
        self.organization_ids().next()
    }

    pub fn organization_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.levels.iter().filter_map(|level| match level {
            ScopeLevel::Organization(id) => Some(*id),
            _ => None,
        })
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn application_code(&self) -> &str {
        &self.application_code
    }

    /// True when `entity_id` appears anywhere on the chain
    pub fn includes(&self, entity_id: Uuid) -> bool {
        self.levels.iter().any(|level| level.id() == entity_id)
    }
}

/// The organization a location falls back to when none is named: its active
/// primary organization assignment with the highest priority.
pub fn primary_organization(assignments: &[LocationAssignment]) -> Option<Uuid> {
    assignments
        .iter()
        .filter(|a| {
            a.is_active
                && a.assignment_type == AssignmentType::Primary
                && a.entity_type == AssignmentEntityType::Organization
        })
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.created_at.cmp(&a.created_at))
        })
        .map(|a| a.entity_id)
}

/// True when the location is actively assigned to `organization` or to one of its ancestors
pub fn location_reachable(organization: &Organization, assignments: &[LocationAssignment]) -> bool {
    assignments
        .iter()
        .filter(|a| a.is_active && a.entity_type == AssignmentEntityType::Organization)
        .any(|a| a.entity_id == organization.organization_id || organization.hierarchy_path.contains(a.entity_id))
}
