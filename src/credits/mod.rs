//! Credit configuration resolution and the credit ledger.

pub mod config_service;
pub mod cost;
pub mod ledger;
pub mod ledger_service;

pub use config_service::{ComprehensiveConfigurations, CreditConfigService, OverrideTarget};
pub use cost::{ConfigValues, EffectiveCost};
pub use ledger::CostQuote;
pub use ledger_service::{AllocationRecord, AllocationTarget, ConsumptionRecord, LedgerService};
