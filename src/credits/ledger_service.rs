use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{CreditAccount, CreditPool, CreditTransaction, LocationAssignment};
use crate::error::{CoreError, CoreResult};
use crate::scope::ScopeChain;
use crate::types::{AssignmentEntityType, ConfigScope, CreditEntityType, PoolSource, TransactionType};

use super::config_service::CreditConfigService;
use super::ledger::{
    ensure_positive, period_start, plan_consumption, plan_credit, plan_debit, plan_sharing, quote, spendable_total,
    CostQuote,
};

/// Recipient of an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocationTarget {
    Entity(Uuid),
    Application(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecord {
    pub transaction: CreditTransaction,
    pub quote: CostQuote,
    pub overage_charge: Decimal,
    pub resolved_scope: ConfigScope,
    pub is_customized: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecord {
    pub source_transaction: CreditTransaction,
    pub target_transaction: CreditTransaction,
    pub target_account: CreditAccount,
}

/// Everything needed to append one ledger row
struct LedgerEntry<'a> {
    account: &'a CreditAccount,
    transaction_type: TransactionType,
    amount: Decimal,
    balance_after: Decimal,
    operation_code: Option<&'a str>,
    quantity: Option<i64>,
    overage_amount: Decimal,
    related_entity_id: Option<Uuid>,
    description: &'a str,
}

/// Balance mutations. Each public operation is one transaction that locks
/// the affected `credits` rows in id order before touching pools.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
    configs: CreditConfigService,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        let configs = CreditConfigService::new(pool.clone());
        Self { pool, configs }
    }

    /// Charge `quantity` units of `operation_code` to `entity_id` at the
    /// price effective for `chain`.
    pub async fn consume(
        &self,
        chain: &ScopeChain,
        entity_id: Uuid,
        operation_code: &str,
        quantity: i64,
    ) -> CoreResult<ConsumptionRecord> {
        if quantity < 1 {
            return Err(CoreError::Validation("quantity must be at least 1".to_string()));
        }
        // The price has to come from the charged entity's own scope
        if !chain.includes(entity_id) && chain.user_id() != Some(entity_id) {
            return Err(CoreError::Validation(format!(
                "entity {} is outside the pricing scope of the request",
                entity_id
            )));
        }
        let effective = self.configs.get_effective_cost(operation_code, chain).await?;
        let config = &effective.configuration;
        let tenant_id = chain.tenant_id();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let account = find_account(&mut tx, tenant_id, entity_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for entity", entity_id))?;
        let account = lock_accounts(&mut tx, &[account.credit_id]).await?.remove(0);

        let used = match config.free_allowance_period {
            Some(period) if config.free_allowance > 0 => {
                units_consumed_since(&mut tx, account.credit_id, operation_code, Some(period_start(period, now))).await?
            }
            None if config.free_allowance > 0 => {
                units_consumed_since(&mut tx, account.credit_id, operation_code, None).await?
            }
            _ => 0,
        };
        let quote = quote(config, quantity, used)?;

        let pools = lock_pools(&mut tx, account.credit_id).await?;
        let plan = plan_consumption(
            config,
            &quote,
            &pools,
            account.available_credits,
            account.overage_used,
            entity_id,
            now,
        )?;

        apply_draws(&mut tx, &plan.debit.draws).await?;
        let total = plan.total();
        let updated = update_balance(&mut tx, account.credit_id, -total, plan.overage_charge, Decimal::ZERO).await?;

        let transaction = insert_transaction(
            &mut tx,
            LedgerEntry {
                account: &updated,
                transaction_type: TransactionType::Consumption,
                amount: -total,
                balance_after: updated.available_credits,
                operation_code: Some(operation_code),
                quantity: Some(quantity),
                overage_amount: plan.overage_charge,
                related_entity_id: None,
                description: &format!("{} x{}", operation_code, quantity),
            },
        )
        .await?;

        tx.commit().await?;

        if !plan.overage_charge.is_zero() {
            warn!(
                tenant_id = %tenant_id,
                entity_id = %entity_id,
                overage = %plan.overage_charge,
                "Consumption went into overage"
            );
        }
        info!(
            tenant_id = %tenant_id,
            entity_id = %entity_id,
            operation_code,
            quantity,
            cost = %total,
            balance = %updated.available_credits,
            "Consumed credits"
        );

        Ok(ConsumptionRecord {
            transaction,
            quote,
            overage_charge: plan.overage_charge,
            resolved_scope: effective.resolved_scope,
            is_customized: effective.is_customized,
        })
    }

    /// Move credits from one entity's account to another entity or to an
    /// application account owned by the source.
    pub async fn allocate(
        &self,
        tenant_id: Uuid,
        source_entity_id: Uuid,
        target: AllocationTarget,
        amount: Decimal,
        purpose: &str,
    ) -> CoreResult<AllocationRecord> {
        ensure_positive(amount, "creditAmount")?;
        if let AllocationTarget::Application(code) = &target {
            if code.trim().is_empty() {
                return Err(CoreError::Validation("targetApplication is required".to_string()));
            }
        }
        if target == AllocationTarget::Entity(source_entity_id) {
            return Err(CoreError::Validation("source and target must differ".to_string()));
        }
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let source = find_account(&mut tx, tenant_id, source_entity_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for entity", source_entity_id))?;

        let target_account = match &target {
            AllocationTarget::Entity(entity_id) => find_account(&mut tx, tenant_id, *entity_id, None)
                .await?
                .ok_or_else(|| CoreError::not_found("credit account for entity", *entity_id))?,
            AllocationTarget::Application(code) => {
                open_account(
                    &mut tx,
                    tenant_id,
                    CreditEntityType::Application,
                    source_entity_id,
                    Some(code.trim()),
                )
                .await?
            }
        };

        let locked = lock_accounts(&mut tx, &[source.credit_id, target_account.credit_id]).await?;
        let source = pick(&locked, source.credit_id)?;
        let target_account = pick(&locked, target_account.credit_id)?;

        let pools = lock_pools(&mut tx, source.credit_id).await?;
        let spendable = spendable_total(&pools, now).min(source.available_credits);
        if amount > spendable {
            return Err(CoreError::InsufficientSourceBalance {
                entity_id: source_entity_id,
                available: spendable,
                requested: amount,
                shortfall: amount - spendable,
            });
        }

        let debit = plan_debit(&pools, amount, now);
        apply_draws(&mut tx, &debit.draws).await?;
        let source_after = update_balance(&mut tx, source.credit_id, -amount, Decimal::ZERO, Decimal::ZERO).await?;
        let target_after = credit_account(&mut tx, &target_account, amount, PoolSource::Allocation, None).await?;

        let source_transaction = insert_transaction(
            &mut tx,
            LedgerEntry {
                account: &source_after,
                transaction_type: TransactionType::Transfer,
                amount: -amount,
                balance_after: source_after.available_credits,
                operation_code: None,
                quantity: None,
                overage_amount: Decimal::ZERO,
                related_entity_id: Some(target_after.entity_id),
                description: purpose,
            },
        )
        .await?;
        let target_transaction = insert_transaction(
            &mut tx,
            LedgerEntry {
                account: &target_after,
                transaction_type: TransactionType::Allocation,
                amount,
                balance_after: target_after.available_credits,
                operation_code: None,
                quantity: None,
                overage_amount: Decimal::ZERO,
                related_entity_id: Some(source_entity_id),
                description: purpose,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            source = %source_entity_id,
            target = ?target,
            amount = %amount,
            "Allocated credits"
        );
        Ok(AllocationRecord {
            source_transaction,
            target_transaction,
            target_account: target_after,
        })
    }

    /// Distribute `amount` from a location's account to the entities it
    /// shares credits with, in proportion to each assignment's percentage.
    pub async fn transfer_with_sharing(
        &self,
        tenant_id: Uuid,
        location_id: Uuid,
        amount: Decimal,
    ) -> CoreResult<Vec<CreditTransaction>> {
        ensure_positive(amount, "amount")?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let assignments = sqlx::query_as::<_, LocationAssignment>(
            r#"
            SELECT * FROM location_assignments
            WHERE location_id = $1 AND tenant_id = $2 AND is_active AND credit_sharing_enabled
            ORDER BY priority DESC, created_at
            "#,
        )
        .bind(location_id)
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let total_pct: Decimal = assignments.iter().map(|a| a.credit_sharing_percentage).sum();
        if total_pct > Decimal::ONE_HUNDRED {
            return Err(CoreError::SharingPercentagesInvalid {
                location_id,
                total: total_pct,
            });
        }
        if assignments.is_empty() {
            return Err(CoreError::Validation(format!(
                "location {} has no credit sharing assignments",
                location_id
            )));
        }

        // Tenant-level assignments credit the tenant's own account.
        let recipients: Vec<(Uuid, Decimal)> = assignments
            .iter()
            .map(|a| match a.entity_type {
                AssignmentEntityType::Tenant => (tenant_id, a.credit_sharing_percentage),
                AssignmentEntityType::Organization => (a.entity_id, a.credit_sharing_percentage),
            })
            .collect();
        let shares = plan_sharing(amount, &recipients);
        let total: Decimal = shares.iter().map(|(_, share)| *share).sum();
        if total.is_zero() {
            return Ok(Vec::new());
        }

        let location_account = find_account(&mut tx, tenant_id, location_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for location", location_id))?;
        let mut ids = vec![location_account.credit_id];
        let mut recipient_accounts = Vec::with_capacity(shares.len());
        for (entity_id, _) in &shares {
            let account = find_account(&mut tx, tenant_id, *entity_id, None)
                .await?
                .ok_or_else(|| CoreError::not_found("credit account for entity", *entity_id))?;
            ids.push(account.credit_id);
            recipient_accounts.push(account.credit_id);
        }

        let mut locked = lock_accounts(&mut tx, &ids).await?;
        let location_account = pick(&locked, location_account.credit_id)?;

        let pools = lock_pools(&mut tx, location_account.credit_id).await?;
        let spendable = spendable_total(&pools, now).min(location_account.available_credits);
        if total > spendable {
            return Err(CoreError::InsufficientSourceBalance {
                entity_id: location_id,
                available: spendable,
                requested: total,
                shortfall: total - spendable,
            });
        }

        let debit = plan_debit(&pools, total, now);
        apply_draws(&mut tx, &debit.draws).await?;
        let location_after = update_balance(&mut tx, location_account.credit_id, -total, Decimal::ZERO, Decimal::ZERO).await?;

        let mut records = Vec::with_capacity(shares.len() + 1);
        records.push(
            insert_transaction(
                &mut tx,
                LedgerEntry {
                    account: &location_after,
                    transaction_type: TransactionType::Transfer,
                    amount: -total,
                    balance_after: location_after.available_credits,
                    operation_code: None,
                    quantity: None,
                    overage_amount: Decimal::ZERO,
                    related_entity_id: None,
                    description: "location credit sharing",
                },
            )
            .await?,
        );

        for ((_, share), credit_id) in shares.iter().zip(recipient_accounts) {
            let account = pick(&locked, credit_id)?;
            let after = credit_account(&mut tx, &account, *share, PoolSource::Sharing, None).await?;
            if let Some(slot) = locked.iter_mut().find(|a| a.credit_id == credit_id) {
                *slot = after.clone();
            }
            records.push(
                insert_transaction(
                    &mut tx,
                    LedgerEntry {
                        account: &after,
                        transaction_type: TransactionType::Allocation,
                        amount: *share,
                        balance_after: after.available_credits,
                        operation_code: None,
                        quantity: None,
                        overage_amount: Decimal::ZERO,
                        related_entity_id: Some(location_id),
                        description: "location credit sharing",
                    },
                )
                .await?,
            );
        }

        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            location_id = %location_id,
            shared = %total,
            recipients = shares.len(),
            "Shared location credits"
        );
        Ok(records)
    }

    /// Add credits to an entity's account as a new pool
    pub async fn grant(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
        amount: Decimal,
        source: PoolSource,
        expires_at: Option<DateTime<Utc>>,
        description: &str,
    ) -> CoreResult<CreditTransaction> {
        self.credit(tenant_id, entity_id, amount, source, expires_at, TransactionType::Allocation, description)
            .await
    }

    pub async fn refund(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> CoreResult<CreditTransaction> {
        self.credit(tenant_id, entity_id, amount, PoolSource::Refund, None, TransactionType::Refund, description)
            .await
    }

    /// Zero every expired pool of the account and record one expiry row.
    /// Returns `None` when nothing had expired.
    pub async fn expire_pools(&self, tenant_id: Uuid, entity_id: Uuid) -> CoreResult<Option<CreditTransaction>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let account = find_account(&mut tx, tenant_id, entity_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for entity", entity_id))?;
        let account = lock_accounts(&mut tx, &[account.credit_id]).await?.remove(0);

        let pools = lock_pools(&mut tx, account.credit_id).await?;
        let expired: Vec<&CreditPool> = pools
            .iter()
            .filter(|p| p.amount > Decimal::ZERO && p.expires_at.map_or(false, |at| at <= now))
            .collect();
        let lapsed: Decimal = expired.iter().map(|p| p.amount).sum();
        if lapsed.is_zero() {
            return Ok(None);
        }

        let ids: Vec<Uuid> = expired.iter().map(|p| p.pool_id).collect();
        sqlx::query("UPDATE credit_pools SET amount = 0 WHERE pool_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        let updated = update_balance(&mut tx, account.credit_id, -lapsed, Decimal::ZERO, Decimal::ZERO).await?;

        let transaction = insert_transaction(
            &mut tx,
            LedgerEntry {
                account: &updated,
                transaction_type: TransactionType::Expiry,
                amount: -lapsed,
                balance_after: updated.available_credits,
                operation_code: None,
                quantity: None,
                overage_amount: Decimal::ZERO,
                related_entity_id: None,
                description: &format!("{} pool(s) expired", ids.len()),
            },
        )
        .await?;
        tx.commit().await?;

        info!(tenant_id = %tenant_id, entity_id = %entity_id, lapsed = %lapsed, "Expired credit pools");
        Ok(Some(transaction))
    }

    /// The entity's general account
    pub async fn balance(&self, tenant_id: Uuid, entity_id: Uuid) -> CoreResult<CreditAccount> {
        let mut conn = self.pool.acquire().await?;
        find_account(&mut conn, tenant_id, entity_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for entity", entity_id))
    }

    /// All accounts an entity holds, including per-application ones
    pub async fn accounts(&self, tenant_id: Uuid, entity_id: Uuid) -> CoreResult<Vec<CreditAccount>> {
        let rows = sqlx::query_as::<_, CreditAccount>(
            "SELECT * FROM credits WHERE tenant_id = $1 AND entity_id = $2 ORDER BY application_code NULLS FIRST",
        )
        .bind(tenant_id)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ledger rows for an entity, newest first
    pub async fn transactions(&self, tenant_id: Uuid, entity_id: Uuid, limit: i64) -> CoreResult<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT * FROM credit_transactions
            WHERE tenant_id = $1 AND entity_id = $2
            ORDER BY created_at DESC, transaction_id
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(entity_id)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    async fn credit(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
        amount: Decimal,
        source: PoolSource,
        expires_at: Option<DateTime<Utc>>,
        transaction_type: TransactionType,
        description: &str,
    ) -> CoreResult<CreditTransaction> {
        ensure_positive(amount, "amount")?;

        let mut tx = self.pool.begin().await?;
        let account = find_account(&mut tx, tenant_id, entity_id, None)
            .await?
            .ok_or_else(|| CoreError::not_found("credit account for entity", entity_id))?;
        let account = lock_accounts(&mut tx, &[account.credit_id]).await?.remove(0);
        let transaction =
            record_credit(&mut tx, &account, amount, source, expires_at, transaction_type, description).await?;
        tx.commit().await?;

        info!(
            tenant_id = %tenant_id,
            entity_id = %entity_id,
            amount = %amount,
            kind = %transaction_type,
            "Credited account"
        );
        Ok(transaction)
    }
}

/// Open the account for an entity if it does not exist yet and return it
pub(crate) async fn open_account(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    entity_type: CreditEntityType,
    entity_id: Uuid,
    application_code: Option<&str>,
) -> CoreResult<CreditAccount> {
    sqlx::query(
        r#"
        INSERT INTO credits (credit_id, tenant_id, entity_type, entity_id, application_code)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(entity_type)
    .bind(entity_id)
    .bind(application_code)
    .execute(&mut *conn)
    .await?;

    find_account(conn, tenant_id, entity_id, application_code)
        .await?
        .ok_or_else(|| CoreError::not_found("credit account for entity", entity_id))
}

pub(crate) async fn find_account(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    entity_id: Uuid,
    application_code: Option<&str>,
) -> CoreResult<Option<CreditAccount>> {
    let account = sqlx::query_as::<_, CreditAccount>(
        r#"
        SELECT * FROM credits
        WHERE tenant_id = $1 AND entity_id = $2 AND application_code IS NOT DISTINCT FROM $3 AND is_active
        "#,
    )
    .bind(tenant_id)
    .bind(entity_id)
    .bind(application_code)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(account)
}

/// Lock account rows in ascending id order so concurrent transfers cannot deadlock
async fn lock_accounts(conn: &mut PgConnection, credit_ids: &[Uuid]) -> CoreResult<Vec<CreditAccount>> {
    let mut ids = credit_ids.to_vec();
    ids.sort();
    ids.dedup();

    let rows = sqlx::query_as::<_, CreditAccount>(
        "SELECT * FROM credits WHERE credit_id = ANY($1) ORDER BY credit_id FOR UPDATE",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    if rows.len() != ids.len() {
        return Err(CoreError::NotFound("credit account disappeared while locking".to_string()));
    }
    Ok(rows)
}

fn pick(accounts: &[CreditAccount], credit_id: Uuid) -> CoreResult<CreditAccount> {
    accounts
        .iter()
        .find(|a| a.credit_id == credit_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found("credit account", credit_id))
}

async fn lock_pools(conn: &mut PgConnection, credit_id: Uuid) -> CoreResult<Vec<CreditPool>> {
    let rows = sqlx::query_as::<_, CreditPool>(
        "SELECT * FROM credit_pools WHERE credit_id = $1 AND amount > 0 ORDER BY pool_id FOR UPDATE",
    )
    .bind(credit_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

async fn apply_draws(conn: &mut PgConnection, draws: &[(Uuid, Decimal)]) -> CoreResult<()> {
    if draws.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = draws.iter().map(|(id, _)| *id).collect();
    let amounts: Vec<Decimal> = draws.iter().map(|(_, amount)| *amount).collect();

    sqlx::query(
        r#"
        UPDATE credit_pools AS p
        SET amount = p.amount - d.take
        FROM UNNEST($1::uuid[], $2::numeric[]) AS d(id, take)
        WHERE p.pool_id = d.id
        "#,
    )
    .bind(&ids)
    .bind(&amounts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Apply a signed change to `available_credits` together with the matching
/// overage and lifetime-total movement
async fn update_balance(
    conn: &mut PgConnection,
    credit_id: Uuid,
    available_delta: Decimal,
    overage_delta: Decimal,
    total_delta: Decimal,
) -> CoreResult<CreditAccount> {
    let account = sqlx::query_as::<_, CreditAccount>(
        r#"
        UPDATE credits
        SET available_credits = available_credits + $2,
            overage_used = overage_used + $3,
            total_credits = total_credits + $4,
            updated_at = NOW()
        WHERE credit_id = $1
        RETURNING *
        "#,
    )
    .bind(credit_id)
    .bind(available_delta)
    .bind(overage_delta)
    .bind(total_delta)
    .fetch_one(&mut *conn)
    .await?;
    Ok(account)
}

/// Add `amount` to a locked account: settle overage, then open a pool for the rest
async fn credit_account(
    conn: &mut PgConnection,
    account: &CreditAccount,
    amount: Decimal,
    source: PoolSource,
    expires_at: Option<DateTime<Utc>>,
) -> CoreResult<CreditAccount> {
    let plan = plan_credit(account.overage_used, amount);

    if plan.pool_amount > Decimal::ZERO {
        sqlx::query(
            r#"
            INSERT INTO credit_pools (pool_id, credit_id, amount, original_amount, source_type, expires_at)
            VALUES ($1, $2, $3, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.credit_id)
        .bind(plan.pool_amount)
        .bind(source)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;
    }

    update_balance(conn, account.credit_id, amount, -plan.settle_overage, amount).await
}

/// Credit a locked account and append the matching ledger row
pub(crate) async fn record_credit(
    conn: &mut PgConnection,
    account: &CreditAccount,
    amount: Decimal,
    source: PoolSource,
    expires_at: Option<DateTime<Utc>>,
    transaction_type: TransactionType,
    description: &str,
) -> CoreResult<CreditTransaction> {
    let updated = credit_account(conn, account, amount, source, expires_at).await?;
    insert_transaction(
        conn,
        LedgerEntry {
            account: &updated,
            transaction_type,
            amount,
            balance_after: updated.available_credits,
            operation_code: None,
            quantity: None,
            overage_amount: Decimal::ZERO,
            related_entity_id: None,
            description,
        },
    )
    .await
}

async fn units_consumed_since(
    conn: &mut PgConnection,
    credit_id: Uuid,
    operation_code: &str,
    since: Option<DateTime<Utc>>,
) -> CoreResult<i64> {
    let (used,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(quantity), 0)::BIGINT
        FROM credit_transactions
        WHERE credit_id = $1
          AND transaction_type = 'consumption'
          AND operation_code = $2
          AND ($3::timestamptz IS NULL OR created_at >= $3)
        "#,
    )
    .bind(credit_id)
    .bind(operation_code)
    .bind(since)
    .fetch_one(&mut *conn)
    .await?;
    Ok(used)
}

async fn insert_transaction(conn: &mut PgConnection, entry: LedgerEntry<'_>) -> CoreResult<CreditTransaction> {
    let row = sqlx::query_as::<_, CreditTransaction>(
        r#"
        INSERT INTO credit_transactions (
            transaction_id, tenant_id, credit_id, entity_id, transaction_type, amount,
            operation_code, quantity, overage_amount, balance_after, related_entity_id, description
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.account.tenant_id)
    .bind(entry.account.credit_id)
    .bind(entry.account.entity_id)
    .bind(entry.transaction_type)
    .bind(entry.amount)
    .bind(entry.operation_code)
    .bind(entry.quantity)
    .bind(entry.overage_amount)
    .bind(entry.balance_after)
    .bind(entry.related_entity_id)
    .bind(entry.description)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}
