use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::database::models::UserRoleAssignment;
use crate::error::{CoreError, CoreResult};

/// Length of a transfer confirmation code in hex characters
pub const CODE_LENGTH: usize = 8;

/// Who holds the System Administrator role for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "userId", rename_all = "camelCase")]
pub enum AdminState {
    NoAdmin,
    HasAdmin(Uuid),
}

impl AdminState {
    /// Derive the state from a tenant's role assignments. Only active
    /// system-admin rows count; the oldest wins should more than one exist.
    pub fn from_assignments(assignments: &[UserRoleAssignment]) -> Self {
        assignments
            .iter()
            .filter(|a| a.is_active && a.is_system_admin)
            .min_by_key(|a| a.assigned_at)
            .map(|a| AdminState::HasAdmin(a.user_id))
            .unwrap_or(AdminState::NoAdmin)
    }

    pub fn admin(&self) -> Option<Uuid> {
        match self {
            AdminState::NoAdmin => None,
            AdminState::HasAdmin(user_id) => Some(*user_id),
        }
    }
}

/// What a promotion request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionStep {
    /// Nobody holds the role; grant it directly
    Grant,
    /// The target already holds it
    AlreadyAdmin,
    /// Demote `from` and grant the target
    Transfer { from: Uuid },
    /// Another user holds the role and the request is not confirmed
    NeedsConfirmation { current: Uuid, force_requested: bool },
}

/// Decide a promotion. `code_valid` says whether the request carried the
/// live confirmation code for this exact transfer.
pub fn decide(state: AdminState, target: Uuid, force_transfer: bool, code_valid: bool) -> PromotionStep {
    match state {
        AdminState::NoAdmin => PromotionStep::Grant,
        AdminState::HasAdmin(current) if current == target => PromotionStep::AlreadyAdmin,
        AdminState::HasAdmin(current) if force_transfer && code_valid => PromotionStep::Transfer { from: current },
        AdminState::HasAdmin(current) => PromotionStep::NeedsConfirmation {
            current,
            force_requested: force_transfer,
        },
    }
}

/// Refuse to remove the tenant's only administrator
pub fn ensure_not_sole_admin(state: AdminState, user_id: Uuid) -> CoreResult<()> {
    match state {
        AdminState::HasAdmin(admin) if admin == user_id => Err(CoreError::CannotDeleteOnlyAdmin(user_id)),
        _ => Ok(()),
    }
}

/// Short code binding a confirmation to one (tenant, from, to) transfer
pub fn confirmation_code(tenant_id: Uuid, from: Uuid, to: Uuid, nonce: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(from.as_bytes());
    hasher.update(to.as_bytes());
    hasher.update(nonce.as_bytes());
    let digest = format!("{:X}", hasher.finalize());
    digest[..CODE_LENGTH].to_string()
}

/// Codes are compared case-insensitively and ignore surrounding whitespace
pub fn code_matches(expected: &str, provided: Option<&str>) -> bool {
    provided.map_or(false, |p| p.trim().eq_ignore_ascii_case(expected))
}

/// Read-only forecast of a promotion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionImpact {
    pub current_state: AdminState,
    pub target_user_id: Uuid,
    pub target_is_active: bool,
    pub would_demote: Option<Uuid>,
    pub requires_confirmation: bool,
}

impl PromotionImpact {
    pub fn new(state: AdminState, target: Uuid, target_is_active: bool) -> Self {
        let (would_demote, requires_confirmation) = match state {
            AdminState::HasAdmin(current) if current != target => (Some(current), true),
            _ => (None, false),
        };
        Self {
            current_state: state,
            target_user_id: target,
            target_is_active,
            would_demote,
            requires_confirmation,
        }
    }
}

/// Confirmation issued to a caller that tried to replace the administrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(user_id: Uuid, admin: bool, active: bool, offset_secs: i64) -> UserRoleAssignment {
        UserRoleAssignment {
            assignment_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_id,
            role_id: Uuid::new_v4(),
            is_system_admin: admin,
            organization_id: None,
            is_active: active,
            assigned_by: None,
            assigned_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            deactivated_at: None,
        }
    }

    #[test]
    fn state_ignores_inactive_and_plain_roles() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![assignment(a, true, false, 0), assignment(b, false, true, 0)];
        assert_eq!(AdminState::from_assignments(&rows), AdminState::NoAdmin);

        let rows = vec![assignment(a, true, false, 0), assignment(b, true, true, 1)];
        assert_eq!(AdminState::from_assignments(&rows), AdminState::HasAdmin(b));
    }

    #[test]
    fn no_admin_grants_directly() {
        let target = Uuid::new_v4();
        assert_eq!(decide(AdminState::NoAdmin, target, false, false), PromotionStep::Grant);
    }

    #[test]
    fn promoting_current_admin_is_a_noop() {
        let target = Uuid::new_v4();
        assert_eq!(
            decide(AdminState::HasAdmin(target), target, false, false),
            PromotionStep::AlreadyAdmin
        );
    }

    #[test]
    fn replacing_admin_needs_force_and_code() {
        let (current, target) = (Uuid::new_v4(), Uuid::new_v4());
        let state = AdminState::HasAdmin(current);

        assert_eq!(
            decide(state, target, false, true),
            PromotionStep::NeedsConfirmation {
                current,
                force_requested: false
            }
        );
        assert_eq!(
            decide(state, target, true, false),
            PromotionStep::NeedsConfirmation {
                current,
                force_requested: true
            }
        );
        assert_eq!(decide(state, target, true, true), PromotionStep::Transfer { from: current });
    }

    #[test]
    fn sole_admin_cannot_be_removed() {
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let state = AdminState::HasAdmin(admin);
        assert!(matches!(
            ensure_not_sole_admin(state, admin),
            Err(CoreError::CannotDeleteOnlyAdmin(id)) if id == admin
        ));
        assert!(ensure_not_sole_admin(state, other).is_ok());
        assert!(ensure_not_sole_admin(AdminState::NoAdmin, admin).is_ok());
    }

    #[test]
    fn codes_are_short_uppercase_hex() {
        let code = confirmation_code(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn codes_depend_on_every_input() {
        let (t, f, to, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let base = confirmation_code(t, f, to, n);
        assert_eq!(base, confirmation_code(t, f, to, n));
        assert_ne!(base, confirmation_code(t, to, f, n));
        assert_ne!(base, confirmation_code(t, f, to, Uuid::new_v4()));
    }

    #[test]
    fn code_comparison_is_lenient_on_case() {
        assert!(code_matches("ABCD1234", Some(" abcd1234 ")));
        assert!(!code_matches("ABCD1234", Some("ABCD1235")));
        assert!(!code_matches("ABCD1234", None));
    }

    #[test]
    fn impact_reports_demotion() {
        let (current, target) = (Uuid::new_v4(), Uuid::new_v4());
        let impact = PromotionImpact::new(AdminState::HasAdmin(current), target, true);
        assert_eq!(impact.would_demote, Some(current));
        assert!(impact.requires_confirmation);

        let impact = PromotionImpact::new(AdminState::NoAdmin, target, true);
        assert_eq!(impact.would_demote, None);
        assert!(!impact.requires_confirmation);
    }
}
