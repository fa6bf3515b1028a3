//! Pure ledger arithmetic: quoting an operation, choosing which pools pay
//! for it, and how a credit settles overage. The service applies these plans
//! to locked rows.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use uuid::Uuid;

use crate::database::models::{CreditConfiguration, CreditPool};
use crate::error::{CoreError, CoreResult};
use crate::types::AllowancePeriod;

pub const AMOUNT_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostQuote {
    pub quantity: i64,
    pub free_units: i64,
    pub billable_units: i64,
    pub unit_cost: Decimal,
    pub unit_multiplier: Decimal,
    pub cost: Decimal,
}

/// Start of the allowance window containing `now`. Windows are calendar
/// aligned in UTC and weeks start on Monday.
pub fn period_start(period: AllowancePeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let start = match period {
        AllowancePeriod::Day => date,
        AllowancePeriod::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
        AllowancePeriod::Month => date - Duration::days(date.day0() as i64),
        AllowancePeriod::Year => date - Duration::days(date.ordinal0() as i64),
    };
    start.and_time(NaiveTime::MIN).and_utc()
}

/// Unit cost from the highest volume tier the quantity reaches, else the base cost
pub fn unit_cost_for(config: &CreditConfiguration, quantity: i64) -> Decimal {
    config
        .volume_tiers
        .0
        .iter()
        .filter(|tier| tier.threshold <= quantity)
        .max_by_key(|tier| tier.threshold)
        .map(|tier| tier.cost)
        .unwrap_or(config.credit_cost)
}

/// Price `quantity` units given the units already consumed in the current
/// allowance window.
pub fn quote(config: &CreditConfiguration, quantity: i64, used_this_period: i64) -> CoreResult<CostQuote> {
    if quantity < 1 {
        return Err(CoreError::Validation("quantity must be at least 1".to_string()));
    }

    let remaining_allowance = (config.free_allowance - used_this_period.max(0)).max(0);
    let free_units = quantity.min(remaining_allowance);
    let billable_units = quantity - free_units;
    let unit_cost = unit_cost_for(config, quantity);
    let cost = (unit_cost * Decimal::from(billable_units) * config.unit_multiplier)
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero);

    Ok(CostQuote {
        quantity,
        free_units,
        billable_units,
        unit_cost,
        unit_multiplier: config.unit_multiplier,
        cost,
    })
}

/// Spendable pools in the order they are drawn: soonest expiry first
/// (pools without expiry last), then oldest.
pub fn spending_order(pools: &[CreditPool], now: DateTime<Utc>) -> Vec<&CreditPool> {
    let mut spendable: Vec<&CreditPool> = pools.iter().filter(|p| p.is_spendable(now)).collect();
    spendable.sort_by(|a, b| {
        let by_expiry = match (a.expires_at, b.expires_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_expiry
            .then(a.created_at.cmp(&b.created_at))
            .then(a.pool_id.cmp(&b.pool_id))
    });
    spendable
}

pub fn spendable_total(pools: &[CreditPool], now: DateTime<Utc>) -> Decimal {
    pools.iter().filter(|p| p.is_spendable(now)).map(|p| p.amount).sum()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebitPlan {
    pub draws: Vec<(Uuid, Decimal)>,
    pub covered: Decimal,
    pub uncovered: Decimal,
}

/// Draw `amount` from spendable pools; whatever they cannot cover is `uncovered`.
pub fn plan_debit(pools: &[CreditPool], amount: Decimal, now: DateTime<Utc>) -> DebitPlan {
    let mut remaining = amount;
    let mut plan = DebitPlan::default();

    for pool in spending_order(pools, now) {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = pool.amount.min(remaining);
        plan.draws.push((pool.pool_id, take));
        plan.covered += take;
        remaining -= take;
    }

    plan.uncovered = remaining.max(Decimal::ZERO);
    plan
}

/// Outcome of charging an operation against an account
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionPlan {
    pub debit: DebitPlan,
    pub overage_charge: Decimal,
}

impl ConsumptionPlan {
    /// Total leaving the account; recorded as the negated transaction amount
    pub fn total(&self) -> Decimal {
        self.debit.covered + self.overage_charge
    }
}

/// Cover `quote.cost` from pools, falling back to overage when the
/// configuration allows it and the limit holds.
pub fn plan_consumption(
    config: &CreditConfiguration,
    quote: &CostQuote,
    pools: &[CreditPool],
    available: Decimal,
    overage_used: Decimal,
    entity_id: Uuid,
    now: DateTime<Utc>,
) -> CoreResult<ConsumptionPlan> {
    let debit = plan_debit(pools, quote.cost, now);
    // Expired pools still sit in the account balance until swept
    let available = spendable_total(pools, now).min(available);
    if debit.uncovered.is_zero() {
        return Ok(ConsumptionPlan {
            debit,
            overage_charge: Decimal::ZERO,
        });
    }

    let insufficient = || CoreError::InsufficientCredits {
        entity_id,
        available,
        required: quote.cost,
        shortfall: debit.uncovered,
    };

    if !config.allow_overage {
        return Err(insufficient());
    }

    // Uncovered units are repriced at the overage rate when one is set.
    let overage_charge = match config.overage_cost {
        Some(overage_cost) if !quote.unit_cost.is_zero() => (debit.uncovered * overage_cost / quote.unit_cost)
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero),
        _ => debit.uncovered,
    };

    if let Some(limit) = config.overage_limit {
        if overage_used + overage_charge > limit {
            return Err(insufficient());
        }
    }

    Ok(ConsumptionPlan { debit, overage_charge })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPlan {
    pub settle_overage: Decimal,
    pub pool_amount: Decimal,
}

/// Incoming credits settle outstanding overage before opening a pool
pub fn plan_credit(overage_used: Decimal, amount: Decimal) -> CreditPlan {
    let settle_overage = overage_used.max(Decimal::ZERO).min(amount);
    CreditPlan {
        settle_overage,
        pool_amount: amount - settle_overage,
    }
}

/// Split `amount` by percentage, rounding each share down to the ledger scale
pub fn plan_sharing(amount: Decimal, recipients: &[(Uuid, Decimal)]) -> Vec<(Uuid, Decimal)> {
    recipients
        .iter()
        .map(|(entity_id, pct)| {
            let share = (amount * *pct / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero);
            (*entity_id, share)
        })
        .filter(|(_, share)| *share > Decimal::ZERO)
        .collect()
}

pub fn ensure_positive(amount: Decimal, field: &str) -> CoreResult<()> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::Validation(format!("{} must be positive", field)));
    }
    if amount.scale() > AMOUNT_SCALE && amount.round_dp(AMOUNT_SCALE) != amount {
        return Err(CoreError::Validation(format!(
            "{} supports at most {} decimal places",
            field, AMOUNT_SCALE
        )));
    }
    Ok(())
}
