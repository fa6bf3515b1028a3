//! Tenant, organization, location and application boundaries.

pub mod context;
pub mod gate;

pub use context::{AccessContext, Visibility};
pub use gate::DataIsolationGate;
