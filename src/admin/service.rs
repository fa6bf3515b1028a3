use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::database::advisory_xact_lock;
use crate::database::models::role::SYSTEM_ADMIN_ROLE;
use crate::database::models::{AdminTransferConfirmation, TenantUser, UserRoleAssignment};
use crate::error::{CoreError, CoreResult};

use super::state::{
    code_matches, confirmation_code, decide, ensure_not_sole_admin, AdminState, IssuedCode, PromotionImpact,
    PromotionStep,
};

const LOCK_NAMESPACE: &str = "admin";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    pub target_user_id: Uuid,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub force_transfer: bool,
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    pub state: AdminState,
    pub previous_admin: Option<Uuid>,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAdmin {
    pub state: AdminState,
    pub user: Option<TenantUser>,
    pub assignment: Option<UserRoleAssignment>,
}

/// Keeps at most one active System Administrator per tenant.
///
/// State is read from `user_role_assignments` on every call and all writes
/// hold the tenant's admin advisory lock.
#[derive(Clone)]
pub struct AdminService {
    pool: PgPool,
    code_ttl: Duration,
}

impl AdminService {
    pub fn new(pool: PgPool) -> Self {
        let minutes = config::config().security.confirmation_code_ttl_minutes;
        Self {
            pool,
            code_ttl: Duration::minutes(minutes.max(1)),
        }
    }

    pub async fn current(&self, tenant_id: Uuid) -> CoreResult<CurrentAdmin> {
        let mut conn = self.pool.acquire().await?;
        let assignments = admin_assignments(&mut conn, tenant_id).await?;
        let state = AdminState::from_assignments(&assignments);

        let user = match state.admin() {
            Some(user_id) => fetch_user(&mut conn, user_id).await?,
            None => None,
        };
        let assignment = state
            .admin()
            .and_then(|user_id| assignments.into_iter().find(|a| a.user_id == user_id));

        Ok(CurrentAdmin { state, user, assignment })
    }

    /// Make `request.target_user_id` the tenant's System Administrator.
    ///
    /// Replacing an existing admin requires `force_transfer` plus the code
    /// returned by an earlier unconfirmed attempt. Issued codes are
    /// committed even though the call fails, so the caller can retry.
    pub async fn promote(&self, tenant_id: Uuid, actor_id: Uuid, request: PromoteRequest) -> CoreResult<PromotionOutcome> {
        let target = request.target_user_id;

        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;

        let user = tenant_user(&mut tx, tenant_id, target).await?;
        if !user.is_active {
            return Err(CoreError::Validation(format!("user {} is not active", target)));
        }

        let state = AdminState::from_assignments(&admin_assignments(&mut tx, tenant_id).await?);

        let pending = match state {
            AdminState::HasAdmin(current) if current != target => {
                Some(self.issue_code(&mut tx, tenant_id, current, target).await?)
            }
            _ => None,
        };
        let code_valid = pending
            .as_ref()
            .map_or(false, |issued| code_matches(&issued.code, request.confirmation_code.as_deref()));

        match decide(state, target, request.force_transfer, code_valid) {
            PromotionStep::AlreadyAdmin => {
                tx.commit().await?;
                Ok(PromotionOutcome {
                    state,
                    previous_admin: None,
                    changed: false,
                })
            }
            PromotionStep::NeedsConfirmation { current, force_requested } => {
                tx.commit().await?;
                let issued = pending.ok_or_else(|| CoreError::Conflict("confirmation code was not issued".to_string()))?;
                info!(
                    target: "audit",
                    tenant_id = %tenant_id,
                    actor = %actor_id,
                    current_admin = %current,
                    requested = %target,
                    force_requested,
                    "Admin transfer needs confirmation"
                );
                Err(CoreError::ConfirmationRequired {
                    current_admin: current,
                    required_code: issued.code,
                    expires_at: issued.expires_at,
                    force_requested,
                })
            }
            PromotionStep::Grant => {
                grant_admin(&mut tx, tenant_id, target, actor_id).await?;
                tx.commit().await?;
                info!(
                    target: "audit",
                    tenant_id = %tenant_id,
                    actor = %actor_id,
                    admin = %target,
                    reason = %request.reason,
                    "System administrator assigned"
                );
                Ok(PromotionOutcome {
                    state: AdminState::HasAdmin(target),
                    previous_admin: None,
                    changed: true,
                })
            }
            PromotionStep::Transfer { from } => {
                sqlx::query(
                    r#"
                    UPDATE user_role_assignments
                    SET is_active = FALSE, deactivated_at = NOW()
                    WHERE tenant_id = $1 AND is_system_admin AND is_active
                    "#,
                )
                .bind(tenant_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE admin_transfer_confirmations
                    SET consumed_at = NOW()
                    WHERE tenant_id = $1 AND from_user_id = $2 AND to_user_id = $3 AND consumed_at IS NULL
                    "#,
                )
                .bind(tenant_id)
                .bind(from)
                .bind(target)
                .execute(&mut *tx)
                .await?;

                grant_admin(&mut tx, tenant_id, target, actor_id).await?;
                tx.commit().await?;

                info!(
                    target: "audit",
                    tenant_id = %tenant_id,
                    actor = %actor_id,
                    previous_admin = %from,
                    admin = %target,
                    reason = %request.reason,
                    "System administrator transferred"
                );
                Ok(PromotionOutcome {
                    state: AdminState::HasAdmin(target),
                    previous_admin: Some(from),
                    changed: true,
                })
            }
        }
    }

    pub async fn preview_promotion(&self, tenant_id: Uuid, target: Uuid) -> CoreResult<PromotionImpact> {
        let mut conn = self.pool.acquire().await?;
        let user = tenant_user(&mut conn, tenant_id, target).await?;
        let state = AdminState::from_assignments(&admin_assignments(&mut conn, tenant_id).await?);
        Ok(PromotionImpact::new(state, target, user.is_active))
    }

    /// Deactivate a user, along with their role assignments and memberships.
    pub async fn deactivate_user(&self, tenant_id: Uuid, actor_id: Uuid, user_id: Uuid) -> CoreResult<TenantUser> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;

        tenant_user(&mut tx, tenant_id, user_id).await?;
        let state = AdminState::from_assignments(&admin_assignments(&mut tx, tenant_id).await?);
        ensure_not_sole_admin(state, user_id)?;

        let user = sqlx::query_as::<_, TenantUser>(
            "UPDATE tenant_users SET is_active = FALSE, updated_at = NOW() WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE user_role_assignments SET is_active = FALSE, deactivated_at = NOW() WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE organization_memberships SET membership_status = 'revoked' WHERE user_id = $1 AND membership_status <> 'revoked'",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(target: "audit", tenant_id = %tenant_id, actor = %actor_id, user_id = %user_id, "User deactivated");
        Ok(user)
    }

    /// Take the administrator role away from `user_id` and hand it to
    /// `successor_id` in the same transaction. The role is a singleton, so
    /// revoking without a successor would leave the tenant without an admin.
    pub async fn revoke_admin(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        successor_id: Option<Uuid>,
    ) -> CoreResult<PromotionOutcome> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;

        tenant_user(&mut tx, tenant_id, user_id).await?;
        let state = AdminState::from_assignments(&admin_assignments(&mut tx, tenant_id).await?);
        if state.admin() != Some(user_id) {
            return Err(CoreError::NotFound(format!("user {} is not the system administrator", user_id)));
        }

        let successor_id = match successor_id {
            Some(id) => id,
            None => return Err(CoreError::CannotDeleteOnlyAdmin(user_id)),
        };
        if successor_id == user_id {
            return Err(CoreError::Validation("successor must be a different user".to_string()));
        }
        let successor = tenant_user(&mut tx, tenant_id, successor_id).await?;
        if !successor.is_active {
            return Err(CoreError::Validation(format!("user {} is not active", successor_id)));
        }

        sqlx::query(
            r#"
            UPDATE user_role_assignments
            SET is_active = FALSE, deactivated_at = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND is_system_admin AND is_active
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        // Pending transfer codes from the old holder are void now
        sqlx::query(
            r#"
            UPDATE admin_transfer_confirmations
            SET consumed_at = NOW()
            WHERE tenant_id = $1 AND from_user_id = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        grant_admin(&mut tx, tenant_id, successor_id, actor_id).await?;
        tx.commit().await?;

        info!(
            target: "audit",
            tenant_id = %tenant_id,
            actor = %actor_id,
            revoked = %user_id,
            admin = %successor_id,
            "System administrator revoked"
        );
        Ok(PromotionOutcome {
            state: AdminState::HasAdmin(successor_id),
            previous_admin: Some(user_id),
            changed: true,
        })
    }

    /// Reuse the live code for this transfer or issue a new one
    async fn issue_code(&self, conn: &mut PgConnection, tenant_id: Uuid, from: Uuid, to: Uuid) -> CoreResult<IssuedCode> {
        let existing = sqlx::query_as::<_, AdminTransferConfirmation>(
            r#"
            SELECT * FROM admin_transfer_confirmations
            WHERE tenant_id = $1 AND from_user_id = $2 AND to_user_id = $3
              AND consumed_at IS NULL AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = existing {
            return Ok(IssuedCode {
                code: row.code,
                expires_at: row.expires_at,
            });
        }

        let code = confirmation_code(tenant_id, from, to, Uuid::new_v4());
        let expires_at = Utc::now() + self.code_ttl;
        sqlx::query(
            r#"
            INSERT INTO admin_transfer_confirmations (confirmation_id, tenant_id, from_user_id, to_user_id, code, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(&code)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(IssuedCode { code, expires_at })
    }
}

/// Ensure the built-in role exists for the tenant and return its id
pub(crate) async fn system_admin_role(conn: &mut PgConnection, tenant_id: Uuid) -> CoreResult<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO custom_roles (role_id, tenant_id, role_name, description, permissions, is_system_role)
        VALUES ($1, $2, $3, 'Full administrative access to the tenant', ARRAY['tenant.admin'], TRUE)
        ON CONFLICT (tenant_id, role_name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(SYSTEM_ADMIN_ROLE)
    .execute(&mut *conn)
    .await?;

    let (role_id,): (Uuid,) = sqlx::query_as("SELECT role_id FROM custom_roles WHERE tenant_id = $1 AND role_name = $2")
        .bind(tenant_id)
        .bind(SYSTEM_ADMIN_ROLE)
        .fetch_one(&mut *conn)
        .await?;
    Ok(role_id)
}

pub(crate) async fn grant_admin(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid, actor_id: Uuid) -> CoreResult<()> {
    let role_id = system_admin_role(conn, tenant_id).await?;
    sqlx::query(
        r#"
        INSERT INTO user_role_assignments (assignment_id, tenant_id, user_id, role_id, is_system_admin, assigned_by)
        VALUES ($1, $2, $3, $4, TRUE, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(user_id)
    .bind(role_id)
    .bind(actor_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| CoreError::on_unique_violation(e, "tenant already has an active system administrator"))?;
    Ok(())
}

async fn admin_assignments(conn: &mut PgConnection, tenant_id: Uuid) -> CoreResult<Vec<UserRoleAssignment>> {
    let rows = sqlx::query_as::<_, UserRoleAssignment>(
        "SELECT * FROM user_role_assignments WHERE tenant_id = $1 AND is_system_admin AND is_active",
    )
    .bind(tenant_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

async fn fetch_user(conn: &mut PgConnection, user_id: Uuid) -> CoreResult<Option<TenantUser>> {
    let user = sqlx::query_as::<_, TenantUser>("SELECT * FROM tenant_users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user)
}

/// A user that must belong to `tenant_id`
async fn tenant_user(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid) -> CoreResult<TenantUser> {
    let user = fetch_user(conn, user_id)
        .await?
        .ok_or_else(|| CoreError::not_found("user", user_id))?;
    if user.tenant_id != tenant_id {
        return Err(CoreError::TenantMismatch);
    }
    Ok(user)
}
