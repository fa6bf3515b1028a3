//! System Administrator singleton: state machine and transactional service.

pub mod service;
pub mod state;

pub use service::{AdminService, CurrentAdmin, PromoteRequest, PromotionOutcome};
pub use state::{AdminState, PromotionImpact, PromotionStep};
