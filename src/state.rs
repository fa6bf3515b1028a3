use sqlx::PgPool;

use crate::admin::AdminService;
use crate::credits::{CreditConfigService, LedgerService};
use crate::hierarchy::HierarchyService;
use crate::isolation::DataIsolationGate;
use crate::locations::LocationService;
use crate::scope::ScopeResolver;
use crate::services::TenantService;

/// Services shared by every request handler. All of them wrap the same pool.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub hierarchy: HierarchyService,
    pub scopes: ScopeResolver,
    pub configs: CreditConfigService,
    pub ledger: LedgerService,
    pub admin: AdminService,
    pub gate: DataIsolationGate,
    pub locations: LocationService,
    pub tenants: TenantService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            hierarchy: HierarchyService::new(pool.clone()),
            scopes: ScopeResolver::new(pool.clone()),
            configs: CreditConfigService::new(pool.clone()),
            ledger: LedgerService::new(pool.clone()),
            admin: AdminService::new(pool.clone()),
            gate: DataIsolationGate::new(pool.clone()),
            locations: LocationService::new(pool.clone()),
            tenants: TenantService::new(pool.clone()),
            pool,
        }
    }
}
