pub mod credit;
pub mod location;
pub mod membership;
pub mod organization;
pub mod role;
pub mod tenant;

pub use credit::{CreditAccount, CreditConfiguration, CreditPool, CreditTransaction, VolumeTier};
pub use location::{Location, LocationAssignment, LocationResource};
pub use membership::OrganizationMembership;
pub use organization::Organization;
pub use role::{AdminTransferConfirmation, CustomRole, UserRoleAssignment};
pub use tenant::{Tenant, TenantUser};
