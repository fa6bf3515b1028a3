//! Organization tree: materialized-path algebra, tree assembly and the
//! transactional store.

pub mod path;
pub mod service;
pub mod tree;

pub use path::{HierarchyPath, PathUpdate};
pub use service::{HierarchyService, NewMembership, NewOrganization, OrganizationUpdate};
pub use tree::{OrganizationNode, TenantHierarchy};
