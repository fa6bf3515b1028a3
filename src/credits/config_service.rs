use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::database::advisory_xact_lock;
use crate::database::models::{CreditConfiguration, Location, Organization};
use crate::error::{CoreError, CoreResult};
use crate::scope::ScopeChain;
use crate::types::ConfigScope;

use super::cost::{is_redundant_override, resolve_effective, validate_operation_code, ConfigValues, EffectiveCost};

/// Writers for one tenant (or the nil id for global rows) serialize on this
const LOCK_NAMESPACE: &str = "credit-config";

/// Where a tenant-side override is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "entityId", rename_all = "lowercase")]
pub enum OverrideTarget {
    Tenant,
    Organization(Uuid),
    Location(Uuid),
}

impl OverrideTarget {
    fn scope(&self) -> ConfigScope {
        match self {
            OverrideTarget::Tenant => ConfigScope::Tenant,
            OverrideTarget::Organization(_) => ConfigScope::Organization,
            OverrideTarget::Location(_) => ConfigScope::Location,
        }
    }

    fn entity(&self) -> (Option<&'static str>, Option<Uuid>) {
        match self {
            OverrideTarget::Tenant => (None, None),
            OverrideTarget::Organization(id) => (Some("organization"), Some(*id)),
            OverrideTarget::Location(id) => (Some("location"), Some(*id)),
        }
    }
}

/// Every configuration row visible to a tenant, grouped for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveConfigurations {
    pub tenant_rows: Vec<CreditConfiguration>,
    pub entity_rows: Vec<CreditConfiguration>,
    pub global_rows: Vec<CreditConfiguration>,
}

#[derive(Clone)]
pub struct CreditConfigService {
    pool: PgPool,
}

impl CreditConfigService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the configuration that prices `operation_code` for `chain`
    pub async fn get_effective_cost(&self, operation_code: &str, chain: &ScopeChain) -> CoreResult<EffectiveCost> {
        validate_operation_code(operation_code)?;
        let rows = candidate_rows(&self.pool, operation_code, chain.tenant_id()).await?;
        resolve_effective(operation_code, &rows, chain, Utc::now())
    }

    /// Display-only listing of global, tenant and entity rows. Rows tied to
    /// another application are left out.
    pub async fn get_comprehensive_configurations(
        &self,
        tenant_id: Uuid,
        application_code: &str,
    ) -> CoreResult<ComprehensiveConfigurations> {
        let rows = sqlx::query_as::<_, CreditConfiguration>(
            r#"
            SELECT * FROM credit_configurations
            WHERE (scope = 'global' OR tenant_id = $1)
              AND (application_code IS NULL OR application_code = $2)
            ORDER BY operation_code, scope, priority DESC, updated_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(application_code)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped = ComprehensiveConfigurations {
            tenant_rows: Vec::new(),
            entity_rows: Vec::new(),
            global_rows: Vec::new(),
        };
        for row in rows {
            match row.scope {
                ConfigScope::Global => grouped.global_rows.push(row),
                ConfigScope::Tenant => grouped.tenant_rows.push(row),
                ConfigScope::Organization | ConfigScope::Location => grouped.entity_rows.push(row),
            }
        }
        Ok(grouped)
    }

    /// Create or replace a tenant or entity override, marking it customized.
    pub async fn upsert_override(
        &self,
        tenant_id: Uuid,
        target: OverrideTarget,
        operation_code: &str,
        values: ConfigValues,
    ) -> CoreResult<CreditConfiguration> {
        validate_operation_code(operation_code)?;
        let values = values.normalized();
        values.validate()?;

        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, tenant_id).await?;
        ensure_target(&mut tx, tenant_id, target).await?;
        let row = upsert_row(&mut tx, target.scope(), Some(tenant_id), target.entity(), operation_code, &values, true).await?;
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            operation_code,
            scope = %row.scope,
            credit_cost = %row.credit_cost,
            "Upserted credit override"
        );
        Ok(row)
    }

    /// Create or replace the platform default for an operation
    pub async fn upsert_global(&self, operation_code: &str, values: ConfigValues) -> CoreResult<CreditConfiguration> {
        validate_operation_code(operation_code)?;
        let values = values.normalized();
        values.validate()?;

        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, LOCK_NAMESPACE, Uuid::nil()).await?;
        let row = upsert_row(&mut tx, ConfigScope::Global, None, (None, None), operation_code, &values, false).await?;
        tx.commit().await?;

        info!(operation_code, credit_cost = %row.credit_cost, "Upserted global credit default");
        Ok(row)
    }

    /// Remove an override so resolution falls back to the next level.
    /// Returns the number of rows removed.
    pub async fn reset_override(
        &self,
        tenant_id: Uuid,
        target: OverrideTarget,
        operation_code: &str,
        application_code: Option<&str>,
    ) -> CoreResult<u64> {
        validate_operation_code(operation_code)?;
        let (_, entity_id) = target.entity();

        let result = sqlx::query(
            r#"
            DELETE FROM credit_configurations
            WHERE scope = $1
              AND tenant_id = $2
              AND entity_id IS NOT DISTINCT FROM $3
              AND operation_code = $4
              AND application_code IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(target.scope())
        .bind(tenant_id)
        .bind(entity_id)
        .bind(operation_code)
        .bind(application_code)
        .execute(&self.pool)
        .await?;

        info!(
            tenant_id = %tenant_id,
            operation_code,
            removed = result.rows_affected(),
            "Reset credit override"
        );
        Ok(result.rows_affected())
    }

    /// Delete tenant rows that only repeat the global default. Customized
    /// rows are always kept.
    pub async fn prune_inherited_overrides(&self, tenant_id: Uuid) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, CreditConfiguration>(
            "SELECT * FROM credit_configurations WHERE (scope = 'global' OR (scope = 'tenant' AND tenant_id = $1)) AND is_active",
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let (globals, tenant_rows): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.scope == ConfigScope::Global);
        let redundant: Vec<Uuid> = tenant_rows
            .iter()
            .filter(|row| globals.iter().any(|global| is_redundant_override(row, global)))
            .map(|row| row.config_id)
            .collect();

        if redundant.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM credit_configurations WHERE config_id = ANY($1) AND NOT is_customized")
            .bind(&redundant)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(tenant_id = %tenant_id, pruned = result.rows_affected(), "Pruned inherited credit overrides");
        Ok(result.rows_affected())
    }
}

/// Rows that could match `operation_code` for a tenant: its own plus every global row
async fn candidate_rows(pool: &PgPool, operation_code: &str, tenant_id: Uuid) -> CoreResult<Vec<CreditConfiguration>> {
    let rows = sqlx::query_as::<_, CreditConfiguration>(
        r#"
        SELECT * FROM credit_configurations
        WHERE operation_code = $1
          AND is_active
          AND (scope = 'global' OR tenant_id = $2)
        "#,
    )
    .bind(operation_code)
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn ensure_target(conn: &mut PgConnection, tenant_id: Uuid, target: OverrideTarget) -> CoreResult<()> {
    let owner = match target {
        OverrideTarget::Tenant => return Ok(()),
        OverrideTarget::Organization(id) => {
            sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE organization_id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .map(|o| o.tenant_id)
                .ok_or_else(|| CoreError::not_found("organization", id))?
        }
        OverrideTarget::Location(id) => {
            sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE location_id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .map(|l| l.tenant_id)
                .ok_or_else(|| CoreError::not_found("location", id))?
        }
    };
    if owner != tenant_id {
        return Err(CoreError::TenantMismatch);
    }
    Ok(())
}

async fn upsert_row(
    conn: &mut PgConnection,
    scope: ConfigScope,
    tenant_id: Option<Uuid>,
    (entity_type, entity_id): (Option<&'static str>, Option<Uuid>),
    operation_code: &str,
    values: &ConfigValues,
    customized: bool,
) -> CoreResult<CreditConfiguration> {
    let existing: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT config_id FROM credit_configurations
        WHERE scope = $1
          AND tenant_id IS NOT DISTINCT FROM $2
          AND entity_id IS NOT DISTINCT FROM $3
          AND operation_code = $4
          AND application_code IS NOT DISTINCT FROM $5
        ORDER BY priority DESC, updated_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(scope)
    .bind(tenant_id)
    .bind(entity_id)
    .bind(operation_code)
    .bind(&values.application_code)
    .fetch_optional(&mut *conn)
    .await?;

    let tiers = Json(values.volume_tiers.clone().unwrap_or_default());

    let row = match existing {
        Some((config_id,)) => {
            sqlx::query_as::<_, CreditConfiguration>(
                r#"
                UPDATE credit_configurations
                SET credit_cost = $2,
                    unit = COALESCE($3, unit),
                    unit_multiplier = COALESCE($4, unit_multiplier),
                    free_allowance = COALESCE($5, free_allowance),
                    free_allowance_period = $6,
                    volume_tiers = $7,
                    allow_overage = COALESCE($8, allow_overage),
                    overage_limit = $9,
                    overage_cost = $10,
                    priority = COALESCE($11, priority),
                    expires_at = $12,
                    is_customized = $13,
                    is_inherited = FALSE,
                    is_active = TRUE,
                    updated_at = NOW()
                WHERE config_id = $1
                RETURNING *
                "#,
            )
            .bind(config_id)
            .bind(values.credit_cost)
            .bind(&values.unit)
            .bind(values.unit_multiplier)
            .bind(values.free_allowance)
            .bind(values.free_allowance_period)
            .bind(&tiers)
            .bind(values.allow_overage)
            .bind(values.overage_limit)
            .bind(values.overage_cost)
            .bind(values.priority)
            .bind(values.expires_at)
            .bind(customized)
            .fetch_one(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, CreditConfiguration>(
                r#"
                INSERT INTO credit_configurations (
                    config_id, scope, tenant_id, entity_type, entity_id, application_code,
                    operation_code, credit_cost, unit, unit_multiplier, free_allowance,
                    free_allowance_period, volume_tiers, allow_overage, overage_limit,
                    overage_cost, priority, expires_at, is_customized
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, 'operation'), COALESCE($10, 1),
                    COALESCE($11, 0), $12, $13, COALESCE($14, FALSE), $15, $16, COALESCE($17, 0), $18, $19
                )
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(scope)
            .bind(tenant_id)
            .bind(entity_type)
            .bind(entity_id)
            .bind(&values.application_code)
            .bind(operation_code)
            .bind(values.credit_cost)
            .bind(&values.unit)
            .bind(values.unit_multiplier)
            .bind(values.free_allowance)
            .bind(values.free_allowance_period)
            .bind(&tiers)
            .bind(values.allow_overage)
            .bind(values.overage_limit)
            .bind(values.overage_cost)
            .bind(values.priority)
            .bind(values.expires_at)
            .bind(customized)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                CoreError::on_unique_violation(e, format!("a {} row for {} already exists", scope, operation_code))
            })?
        }
    };
    Ok(row)
}
