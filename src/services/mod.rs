pub mod cleanup;
pub mod tenant_service;

pub use cleanup::{PurgeReport, TenantPurger};
pub use tenant_service::{AdminUserInput, OnboardRequest, OnboardedTenant, TenantService};
