use std::collections::HashSet;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::database::models::{
    CreditAccount, CreditConfiguration, LocationAssignment, Organization, OrganizationMembership,
};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::tree::with_descendants;
use crate::types::{AssignmentEntityType, MembershipEntityType};

/// Caller identity for a request: tenant and user from the bearer token,
/// application from the `X-Application-Code` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub application_code: String,
}

impl AccessContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid, application_code: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id,
            application_code: application_code.into(),
        }
    }

    /// Fails with `TenantMismatch` unless the entity belongs to the caller's tenant
    pub fn ensure_tenant(&self, entity_tenant_id: Uuid) -> CoreResult<()> {
        if entity_tenant_id == self.tenant_id {
            Ok(())
        } else {
            Err(CoreError::TenantMismatch)
        }
    }

    pub fn sees_application(&self, application_code: Option<&str>) -> bool {
        application_code.map_or(true, |code| code.eq_ignore_ascii_case(&self.application_code))
    }

    /// Credit configuration rows with no application or the caller's one
    pub fn filter_configurations(&self, rows: Vec<CreditConfiguration>) -> Vec<CreditConfiguration> {
        rows.into_iter()
            .filter(|row| self.sees_application(row.application_code.as_deref()))
            .collect()
    }

    /// Credit accounts scoped to another application are dropped
    pub fn filter_accounts(&self, accounts: Vec<CreditAccount>) -> Vec<CreditAccount> {
        accounts
            .into_iter()
            .filter(|account| self.sees_application(account.application_code.as_deref()))
            .collect()
    }

    /// Emit an audit event for a gated mutation
    pub fn audit(&self, action: &str, entity_id: Uuid) {
        if config::config().security.enable_audit_logging {
            info!(
                target: "audit",
                tenant_id = %self.tenant_id,
                user_id = %self.user_id,
                application = %self.application_code,
                action,
                entity_id = %entity_id,
                "Gated mutation"
            );
        }
    }
}

/// Set of entity ids a caller may see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    Only(HashSet<Uuid>),
}

impl Visibility {
    pub fn allows(&self, id: Uuid) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Only(ids) => ids.contains(&id),
        }
    }

    pub fn ensure(&self, id: Uuid) -> CoreResult<()> {
        if self.allows(id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!("entity {} is not visible to the caller", id)))
        }
    }

    pub fn retain<T>(&self, items: Vec<T>, id: impl Fn(&T) -> Uuid) -> Vec<T> {
        match self {
            Visibility::All => items,
            Visibility::Only(ids) => items.into_iter().filter(|item| ids.contains(&id(item))).collect(),
        }
    }
}

/// Organizations with an active membership, widened to their subtrees
pub fn organization_visibility(
    tenant_admin: bool,
    memberships: &[OrganizationMembership],
    organizations: &[Organization],
) -> Visibility {
    if tenant_admin {
        return Visibility::All;
    }
    let seeds: HashSet<Uuid> = memberships
        .iter()
        .filter(|m| m.is_active() && m.entity_type == MembershipEntityType::Organization)
        .map(|m| m.entity_id)
        .collect();
    Visibility::Only(with_descendants(organizations, &seeds))
}

/// Locations with an active membership, plus those actively assigned to a
/// visible organization or to the tenant itself
pub fn location_visibility(
    organizations: &Visibility,
    memberships: &[OrganizationMembership],
    assignments: &[LocationAssignment],
) -> Visibility {
    if *organizations == Visibility::All {
        return Visibility::All;
    }

    let mut visible: HashSet<Uuid> = memberships
        .iter()
        .filter(|m| m.is_active() && m.entity_type == MembershipEntityType::Location)
        .map(|m| m.entity_id)
        .collect();

    for assignment in assignments.iter().filter(|a| a.is_active) {
        let reachable = match assignment.entity_type {
            AssignmentEntityType::Tenant => assignment.entity_id == assignment.tenant_id,
            AssignmentEntityType::Organization => organizations.allows(assignment.entity_id),
        };
        if reachable {
            visible.insert(assignment.location_id);
        }
    }
    Visibility::Only(visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tree::tests::org;
    use crate::types::{AssignmentType, MembershipStatus, MembershipType};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn membership(user_id: Uuid, entity_type: MembershipEntityType, entity_id: Uuid, status: MembershipStatus) -> OrganizationMembership {
        OrganizationMembership {
            membership_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_id,
            entity_type,
            entity_id,
            membership_type: MembershipType::Member,
            membership_status: status,
            created_at: Utc::now(),
        }
    }

    fn assignment(tenant_id: Uuid, location_id: Uuid, entity_type: AssignmentEntityType, entity_id: Uuid) -> LocationAssignment {
        LocationAssignment {
            assignment_id: Uuid::new_v4(),
            location_id,
            tenant_id,
            entity_type,
            entity_id,
            assignment_type: AssignmentType::Secondary,
            priority: 0,
            credit_sharing_enabled: false,
            credit_sharing_percentage: Decimal::ZERO,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tenant_mismatch_carries_no_ids() {
        let ctx = AccessContext::new(Uuid::new_v4(), Uuid::new_v4(), "platform");
        assert!(ctx.ensure_tenant(ctx.tenant_id).is_ok());
        let err = ctx.ensure_tenant(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoreError::TenantMismatch));
        assert_eq!(err.to_string(), "Requested entity belongs to another tenant");
    }

    #[test]
    fn admins_see_every_organization() {
        let tenant = Uuid::new_v4();
        let root = org(tenant, None, 0);
        assert_eq!(organization_visibility(true, &[], &[root]), Visibility::All);
    }

    #[test]
    fn membership_extends_to_descendants_only() {
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let root = org(tenant, None, 0);
        let child = org(tenant, Some(&root), 1);
        let grandchild = org(tenant, Some(&child), 2);
        let sibling = org(tenant, Some(&root), 3);
        let orgs = vec![root.clone(), child.clone(), grandchild.clone(), sibling.clone()];

        let memberships = vec![membership(
            user,
            MembershipEntityType::Organization,
            child.organization_id,
            MembershipStatus::Active,
        )];
        let visible = organization_visibility(false, &memberships, &orgs);

        assert!(visible.allows(child.organization_id));
        assert!(visible.allows(grandchild.organization_id));
        assert!(!visible.allows(root.organization_id));
        assert!(!visible.allows(sibling.organization_id));
    }

    #[test]
    fn revoked_membership_grants_nothing() {
        let tenant = Uuid::new_v4();
        let root = org(tenant, None, 0);
        let memberships = vec![membership(
            Uuid::new_v4(),
            MembershipEntityType::Organization,
            root.organization_id,
            MembershipStatus::Revoked,
        )];
        let visible = organization_visibility(false, &memberships, &[root.clone()]);
        assert!(!visible.allows(root.organization_id));
        assert!(matches!(visible.ensure(root.organization_id), Err(CoreError::Forbidden(_))));
    }

    #[test]
    fn locations_follow_organizations_and_tenant_assignments() {
        let tenant = Uuid::new_v4();
        let visible_org = Uuid::new_v4();
        let hidden_org = Uuid::new_v4();
        let (by_org, by_tenant, hidden, member_of) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let orgs = Visibility::Only([visible_org].into_iter().collect());
        let memberships = vec![membership(
            Uuid::new_v4(),
            MembershipEntityType::Location,
            member_of,
            MembershipStatus::Active,
        )];
        let assignments = vec![
            assignment(tenant, by_org, AssignmentEntityType::Organization, visible_org),
            assignment(tenant, by_tenant, AssignmentEntityType::Tenant, tenant),
            assignment(tenant, hidden, AssignmentEntityType::Organization, hidden_org),
        ];

        let locations = location_visibility(&orgs, &memberships, &assignments);
        assert!(locations.allows(by_org));
        assert!(locations.allows(by_tenant));
        assert!(locations.allows(member_of));
        assert!(!locations.allows(hidden));
    }

    #[test]
    fn application_filter_keeps_generic_and_own_rows() {
        let ctx = AccessContext::new(Uuid::new_v4(), Uuid::new_v4(), "crm");
        assert!(ctx.sees_application(None));
        assert!(ctx.sees_application(Some("CRM")));
        assert!(!ctx.sees_application(Some("billing")));
    }

    #[test]
    fn retain_filters_by_id() {
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        let visible = Visibility::Only([keep].into_iter().collect());
        let kept = visible.retain(vec![keep, drop], |id| *id);
        assert_eq!(kept, vec![keep]);
        assert_eq!(Visibility::All.retain(vec![keep, drop], |id| *id).len(), 2);
    }
}
