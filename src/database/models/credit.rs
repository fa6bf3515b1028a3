use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{AllowancePeriod, ConfigScope, CreditEntityType, PoolSource, TransactionType};

/// Unit cost that applies once a request's quantity reaches `threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeTier {
    pub threshold: i64,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditConfiguration {
    pub config_id: Uuid,
    pub scope: ConfigScope,
    pub tenant_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub application_code: Option<String>,
    pub operation_code: String,
    pub credit_cost: Decimal,
    pub unit: String,
    pub unit_multiplier: Decimal,
    pub free_allowance: i64,
    pub free_allowance_period: Option<AllowancePeriod>,
    pub volume_tiers: Json<Vec<VolumeTier>>,
    pub allow_overage: bool,
    pub overage_limit: Option<Decimal>,
    pub overage_cost: Option<Decimal>,
    pub is_inherited: bool,
    pub is_customized: bool,
    pub priority: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditConfiguration {
    /// Active and not past its expiry at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }

    /// Rows without an application code apply to every application
    pub fn applies_to(&self, application_code: &str) -> bool {
        self.application_code
            .as_deref()
            .map_or(true, |code| code.eq_ignore_ascii_case(application_code))
    }
}

/// A credit account. `available_credits` is always the sum of the remaining
/// pool amounts minus `overage_used`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccount {
    pub credit_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: CreditEntityType,
    pub entity_id: Uuid,
    pub application_code: Option<String>,
    pub available_credits: Decimal,
    pub total_credits: Decimal,
    pub overage_used: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditPool {
    pub pool_id: Uuid,
    pub credit_id: Uuid,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub source_type: PoolSource,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CreditPool {
    pub fn is_spendable(&self, now: DateTime<Utc>) -> bool {
        self.amount > Decimal::ZERO && self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub credit_id: Uuid,
    pub entity_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub operation_code: Option<String>,
    pub quantity: Option<i64>,
    pub overage_amount: Decimal,
    pub balance_after: Decimal,
    pub related_entity_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
