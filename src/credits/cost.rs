use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{CreditConfiguration, VolumeTier};
use crate::error::{CoreError, CoreResult};
use crate::scope::{ScopeChain, ScopeLevel};
use crate::types::{AllowancePeriod, ConfigScope};

/// One place a configuration row may come from, tried in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Location { tenant_id: Uuid, location_id: Uuid },
    Organization { tenant_id: Uuid, organization_id: Uuid },
    Tenant(Uuid),
    Global,
}

impl ConfigSource {
    pub fn scope(&self) -> ConfigScope {
        match self {
            ConfigSource::Location { .. } => ConfigScope::Location,
            ConfigSource::Organization { .. } => ConfigScope::Organization,
            ConfigSource::Tenant(_) => ConfigScope::Tenant,
            ConfigSource::Global => ConfigScope::Global,
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ConfigSource::Location { location_id, .. } => Some(*location_id),
            ConfigSource::Organization { organization_id, .. } => Some(*organization_id),
            ConfigSource::Tenant(id) => Some(*id),
            ConfigSource::Global => None,
        }
    }

    /// Whether `row` is defined at exactly this source
    pub fn matches(&self, row: &CreditConfiguration) -> bool {
        if row.scope != self.scope() {
            return false;
        }
        match self {
            ConfigSource::Location { tenant_id, location_id } => {
                row.tenant_id == Some(*tenant_id) && row.entity_id == Some(*location_id)
            }
            ConfigSource::Organization {
                tenant_id,
                organization_id,
            } => row.tenant_id == Some(*tenant_id) && row.entity_id == Some(*organization_id),
            ConfigSource::Tenant(tenant_id) => row.tenant_id == Some(*tenant_id),
            ConfigSource::Global => true,
        }
    }
}

/// Sources for a chain: `[location?, organizations nearest-first…, tenant, global]`
pub fn sources_for(chain: &ScopeChain) -> Vec<ConfigSource> {
    let tenant_id = chain.tenant_id();
    let mut sources: Vec<ConfigSource> = chain
        .levels()
        .iter()
        .map(|level| match *level {
            ScopeLevel::Location(location_id) => ConfigSource::Location { tenant_id, location_id },
            ScopeLevel::Organization(organization_id) => ConfigSource::Organization {
                tenant_id,
                organization_id,
            },
            ScopeLevel::Tenant(id) => ConfigSource::Tenant(id),
        })
        .collect();
    sources.push(ConfigSource::Global);
    sources
}

/// The configuration that applies to an operation for one scope chain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveCost {
    pub operation: String,
    pub credit_cost: Decimal,
    pub unit: String,
    pub unit_multiplier: Decimal,
    pub is_customized: bool,
    pub resolved_scope: ConfigScope,
    pub resolved_entity_id: Option<Uuid>,
    /// Index into the source list that produced the match; global is last
    pub chain_position: usize,
    pub configuration: CreditConfiguration,
}

/// Winner among the rows defined at one source.
///
/// A row for the caller's application beats a generic one, then higher
/// `priority`, then the most recently updated.
pub fn pick_at_level<'a>(
    rows: &'a [CreditConfiguration],
    source: &ConfigSource,
    application_code: &str,
    now: DateTime<Utc>,
) -> Option<&'a CreditConfiguration> {
    rows.iter()
        .filter(|row| source.matches(row) && row.is_live(now) && row.applies_to(application_code))
        .max_by(|a, b| {
            a.application_code
                .is_some()
                .cmp(&b.application_code.is_some())
                .then(a.priority.cmp(&b.priority))
                .then(a.updated_at.cmp(&b.updated_at))
        })
}

/// Walk the sources most specific first; the first level with a live row wins.
pub fn resolve_effective(
    operation_code: &str,
    rows: &[CreditConfiguration],
    chain: &ScopeChain,
    now: DateTime<Utc>,
) -> CoreResult<EffectiveCost> {
    let candidates: Vec<CreditConfiguration> = rows
        .iter()
        .filter(|row| row.operation_code == operation_code)
        .cloned()
        .collect();

    for (position, source) in sources_for(chain).iter().enumerate() {
        if let Some(row) = pick_at_level(&candidates, source, chain.application_code(), now) {
            return Ok(EffectiveCost {
                operation: operation_code.to_string(),
                credit_cost: row.credit_cost,
                unit: row.unit.clone(),
                unit_multiplier: row.unit_multiplier,
                is_customized: row.scope != ConfigScope::Global,
                resolved_scope: row.scope,
                resolved_entity_id: source.entity_id(),
                chain_position: position,
                configuration: row.clone(),
            });
        }
    }

    Err(CoreError::OperationCostNotConfigured(operation_code.to_string()))
}

/// Dotted identifier such as `crm.leads.create`, each segment `[a-z0-9_]+`
pub fn validate_operation_code(code: &str) -> CoreResult<()> {
    let valid = !code.is_empty()
        && code.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("invalid operation code '{}'", code)))
    }
}

/// Writable fields of a configuration row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValues {
    pub credit_cost: Decimal,
    pub unit: Option<String>,
    pub unit_multiplier: Option<Decimal>,
    pub free_allowance: Option<i64>,
    pub free_allowance_period: Option<AllowancePeriod>,
    pub volume_tiers: Option<Vec<VolumeTier>>,
    pub allow_overage: Option<bool>,
    pub overage_limit: Option<Decimal>,
    pub overage_cost: Option<Decimal>,
    pub priority: Option<i32>,
    pub application_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConfigValues {
    /// Application codes are stored lower-case, matching the request header.
    /// A blank code means "every application".
    pub fn normalized(mut self) -> Self {
        self.application_code = self
            .application_code
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty());
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.credit_cost < Decimal::ZERO {
            return Err(CoreError::Validation("creditCost must not be negative".to_string()));
        }
        if let Some(multiplier) = self.unit_multiplier {
            if multiplier <= Decimal::ZERO {
                return Err(CoreError::Validation("unitMultiplier must be positive".to_string()));
            }
        }
        if matches!(self.free_allowance, Some(n) if n < 0) {
            return Err(CoreError::Validation("freeAllowance must not be negative".to_string()));
        }
        for tier in self.volume_tiers.iter().flatten() {
            if tier.threshold < 1 || tier.cost < Decimal::ZERO {
                return Err(CoreError::Validation(
                    "volume tiers need a positive threshold and a non-negative cost".to_string(),
                ));
            }
        }
        for (name, value) in [("overageLimit", self.overage_limit), ("overageCost", self.overage_cost)] {
            if matches!(value, Some(v) if v < Decimal::ZERO) {
                return Err(CoreError::Validation(format!("{} must not be negative", name)));
            }
        }
        Ok(())
    }
}

/// A tenant row that merely repeats the global default and was never
/// deliberately customized
pub fn is_redundant_override(tenant_row: &CreditConfiguration, global_row: &CreditConfiguration) -> bool {
    !tenant_row.is_customized
        && tenant_row.operation_code == global_row.operation_code
        && tenant_row.application_code == global_row.application_code
        && tenant_row.credit_cost == global_row.credit_cost
        && tenant_row.unit == global_row.unit
        && tenant_row.unit_multiplier == global_row.unit_multiplier
        && tenant_row.free_allowance == global_row.free_allowance
        && tenant_row.free_allowance_period == global_row.free_allowance_period
        && tenant_row.volume_tiers.0 == global_row.volume_tiers.0
        && tenant_row.allow_overage == global_row.allow_overage
        && tenant_row.overage_limit == global_row.overage_limit
        && tenant_row.overage_cost == global_row.overage_cost
}
