use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::admin::service::grant_admin;
use crate::config;
use crate::credits::ledger_service::{open_account, record_credit};
use crate::database::models::{CreditAccount, Organization, Tenant, TenantUser};
use crate::error::{CoreError, CoreResult};
use crate::hierarchy::HierarchyPath;
use crate::types::{CreditEntityType, OrganizationType, PoolSource, TenantOrganizationType, TenantStatus, TransactionType};

use super::cleanup::{PgLeafDeleter, PurgeReport, TenantPurger};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserInput {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub name: String,
    pub domain: String,
    #[serde(default = "default_organization_type")]
    pub organization_type: TenantOrganizationType,
    #[serde(default = "default_status")]
    pub status: TenantStatus,
    pub admin: AdminUserInput,
    /// Falls back to the configured trial credits
    pub initial_credits: Option<Decimal>,
    /// Falls back to the configured trial length; 0 means no expiry
    pub trial_days: Option<i64>,
}

fn default_organization_type() -> TenantOrganizationType {
    TenantOrganizationType::Standalone
}

fn default_status() -> TenantStatus {
    TenantStatus::Trial
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardedTenant {
    pub tenant: Tenant,
    pub admin: TenantUser,
    pub account: CreditAccount,
    pub root_organization: Option<Organization>,
}

/// Tenant lifecycle: onboarding, status changes and purge
#[derive(Clone)]
pub struct TenantService {
    pool: PgPool,
}

impl TenantService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a tenant with its administrator, credit account and, for
    /// parent-hierarchy tenants, a root organization. All or nothing.
    pub async fn onboard(&self, request: OnboardRequest) -> CoreResult<OnboardedTenant> {
        validate_tenant_name(&request.name)?;
        validate_domain(&request.domain)?;
        validate_email(&request.admin.email)?;
        if request.admin.name.trim().is_empty() {
            return Err(CoreError::Validation("admin name is required".to_string()));
        }

        let settings = &config::config().credits;
        let credits = request.initial_credits.unwrap_or(settings.default_trial_credits);
        if credits < Decimal::ZERO {
            return Err(CoreError::Validation("initialCredits cannot be negative".to_string()));
        }
        let trial_days = request.trial_days.unwrap_or(settings.trial_days);
        if trial_days < 0 {
            return Err(CoreError::Validation("trialDays cannot be negative".to_string()));
        }
        let trial_ends_at: Option<DateTime<Utc>> = (trial_days > 0).then(|| Utc::now() + Duration::days(trial_days));

        let mut tx = self.pool.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (tenant_id, name, domain, status, organization_type, trial_ends_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.name.trim())
        .bind(request.domain.trim().to_lowercase())
        .bind(request.status)
        .bind(request.organization_type)
        .bind(trial_ends_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::on_unique_violation(e, format!("domain {} is already registered", request.domain)))?;

        let admin = sqlx::query_as::<_, TenantUser>(
            r#"
            INSERT INTO tenant_users (user_id, tenant_id, email, name)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant.tenant_id)
        .bind(request.admin.email.trim())
        .bind(request.admin.name.trim())
        .fetch_one(&mut *tx)
        .await?;

        grant_admin(&mut tx, tenant.tenant_id, admin.user_id, admin.user_id).await?;

        let mut account = open_account(&mut tx, tenant.tenant_id, CreditEntityType::Tenant, tenant.tenant_id, None).await?;
        if credits > Decimal::ZERO {
            let source = if request.status == TenantStatus::Trial {
                PoolSource::Trial
            } else {
                PoolSource::Allocation
            };
            let transaction = record_credit(
                &mut tx,
                &account,
                credits,
                source,
                trial_ends_at,
                TransactionType::Allocation,
                "Initial tenant credits",
            )
            .await?;
            account.available_credits = transaction.balance_after;
            account.total_credits += credits;
        }

        let root_organization = match tenant.organization_type {
            TenantOrganizationType::Parent => {
                let path = HierarchyPath::root();
                let org = sqlx::query_as::<_, Organization>(
                    r#"
                    INSERT INTO organizations (
                        organization_id, tenant_id, parent_organization_id, organization_type,
                        organization_level, hierarchy_path, name, created_by
                    )
                    VALUES ($1, $2, NULL, $3, $4, $5, $6, $7)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(tenant.tenant_id)
                .bind(OrganizationType::Parent)
                .bind(path.level())
                .bind(&path)
                .bind(&tenant.name)
                .bind(admin.user_id)
                .fetch_one(&mut *tx)
                .await?;
                open_account(&mut tx, tenant.tenant_id, CreditEntityType::Organization, org.organization_id, None).await?;
                Some(org)
            }
            TenantOrganizationType::Standalone => None,
        };

        tx.commit().await?;

        info!(
            tenant_id = %tenant.tenant_id,
            domain = %tenant.domain,
            admin = %admin.user_id,
            credits = %credits,
            "Onboarded tenant"
        );
        Ok(OnboardedTenant {
            tenant,
            admin,
            account,
            root_organization,
        })
    }

    pub async fn get(&self, tenant_id: Uuid) -> CoreResult<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("tenant", tenant_id))
    }

    pub async fn set_status(&self, tenant_id: Uuid, status: TenantStatus) -> CoreResult<Tenant> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "UPDATE tenants SET status = $2, updated_at = NOW() WHERE tenant_id = $1 RETURNING *",
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("tenant", tenant_id))?;

        info!(tenant_id = %tenant_id, status = %status, "Tenant status changed");
        Ok(tenant)
    }

    /// Remove every row the tenant owns, leaves first
    pub async fn purge(&self, tenant_id: Uuid) -> CoreResult<PurgeReport> {
        self.get(tenant_id).await?;
        let settings = &config::config().credits;
        let purger = TenantPurger::new(PgLeafDeleter::new(self.pool.clone()), settings.purge_batch_size, settings.purge_max_passes);
        purger.purge(tenant_id).await
    }
}

/// Tenant names: 2 to 100 characters, not blank
pub fn validate_tenant_name(name: &str) -> CoreResult<()> {
    let name = name.trim();
    if name.chars().count() < 2 {
        return Err(CoreError::Validation("Tenant name must be at least 2 characters".to_string()));
    }
    if name.chars().count() > 100 {
        return Err(CoreError::Validation("Tenant name must be less than 100 characters".to_string()));
    }
    Ok(())
}

/// Domains are dot-separated labels of letters, digits and hyphens
pub fn validate_domain(domain: &str) -> CoreResult<()> {
    let domain = domain.trim();
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if domain.len() > 253 || !domain.contains('.') || !labels_ok {
        return Err(CoreError::Validation(format!("invalid domain: {}", domain)));
    }
    Ok(())
}

fn validate_email(email: &str) -> CoreResult<()> {
    match email.trim().split_once('@') {
        Some((local, host)) if !local.is_empty() && host.contains('.') => Ok(()),
        _ => Err(CoreError::Validation(format!("invalid email: {}", email))),
    }
}
