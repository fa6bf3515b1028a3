//! Tenant purge as a bounded fixed-point loop.
//!
//! Tables are visited leaves first. Every table is emptied in batches, and
//! the whole list is swept again until a pass deletes nothing. Organizations
//! go leaf nodes first, deepest level first, so parent references never block.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// SQLSTATE for "relation does not exist"
const UNDEFINED_TABLE: &str = "42P01";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// A table owned by a tenant and the condition selecting the tenant's rows.
/// `$1` is the tenant id.
#[derive(Debug, Clone, Copy)]
pub struct LeafTable {
    pub name: &'static str,
    pub predicate: &'static str,
    pub order_by: Option<&'static str>,
}

const fn table(name: &'static str, predicate: &'static str) -> LeafTable {
    LeafTable {
        name,
        predicate,
        order_by: None,
    }
}

pub const LEAF_TABLES: &[LeafTable] = &[
    table("credit_transactions", "tenant_id = $1"),
    table(
        "credit_pools",
        "credit_id IN (SELECT credit_id FROM credits WHERE tenant_id = $1)",
    ),
    table("credits", "tenant_id = $1"),
    table("credit_configurations", "tenant_id = $1"),
    table(
        "location_usage",
        "location_id IN (SELECT location_id FROM locations WHERE tenant_id = $1)",
    ),
    table(
        "location_resources",
        "location_id IN (SELECT location_id FROM locations WHERE tenant_id = $1)",
    ),
    table("location_assignments", "tenant_id = $1"),
    table("locations", "tenant_id = $1"),
    table("admin_transfer_confirmations", "tenant_id = $1"),
    table("user_role_assignments", "tenant_id = $1"),
    table("organization_memberships", "tenant_id = $1"),
    table("custom_roles", "tenant_id = $1"),
    LeafTable {
        name: "organizations",
        predicate: "tenant_id = $1 AND NOT EXISTS (SELECT 1 FROM organizations c WHERE c.parent_organization_id = organizations.organization_id)",
        order_by: Some("organization_level DESC"),
    },
    table("tenant_users", "tenant_id = $1"),
    table("tenants", "tenant_id = $1"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Deleted(u64),
    /// Rows are still referenced; retried on the next pass
    Blocked,
    MissingRelation,
}

/// Deletes one batch of a tenant's rows from one table
#[async_trait]
pub trait LeafDeleter: Send + Sync {
    async fn delete_batch(&self, table: &LeafTable, tenant_id: Uuid, limit: i64) -> CoreResult<BatchOutcome>;
}

pub struct PgLeafDeleter {
    pool: PgPool,
}

impl PgLeafDeleter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeafDeleter for PgLeafDeleter {
    async fn delete_batch(&self, table: &LeafTable, tenant_id: Uuid, limit: i64) -> CoreResult<BatchOutcome> {
        let order = table.order_by.map(|o| format!(" ORDER BY {}", o)).unwrap_or_default();
        let sql = format!(
            "DELETE FROM {name} WHERE ctid IN (SELECT ctid FROM {name} WHERE {predicate}{order} LIMIT $2)",
            name = table.name,
            predicate = table.predicate,
            order = order,
        );

        match sqlx::query(&sql).bind(tenant_id).bind(limit).execute(&self.pool).await {
            Ok(result) => Ok(BatchOutcome::Deleted(result.rows_affected())),
            Err(sqlx::Error::Database(db)) => {
                let code = db.code().map(|c| c.into_owned());
                match code.as_deref() {
                    Some(UNDEFINED_TABLE) => Ok(BatchOutcome::MissingRelation),
                    Some(FOREIGN_KEY_VIOLATION) => Ok(BatchOutcome::Blocked),
                    _ => Err(sqlx::Error::Database(db).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub tenant_id: Uuid,
    pub passes: u32,
    pub deleted: BTreeMap<String, u64>,
    pub skipped_tables: Vec<String>,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.deleted.values().sum()
    }
}

pub struct TenantPurger<D> {
    deleter: D,
    batch_size: i64,
    max_passes: u32,
}

impl<D: LeafDeleter> TenantPurger<D> {
    pub fn new(deleter: D, batch_size: i64, max_passes: u32) -> Self {
        Self {
            deleter,
            batch_size: batch_size.max(1),
            max_passes: max_passes.max(1),
        }
    }

    pub async fn purge(&self, tenant_id: Uuid) -> CoreResult<PurgeReport> {
        let mut report = PurgeReport {
            tenant_id,
            ..PurgeReport::default()
        };
        let mut skipped: HashSet<&'static str> = HashSet::new();

        for pass in 1..=self.max_passes {
            let mut deleted_this_pass = 0u64;

            for table in LEAF_TABLES {
                if skipped.contains(table.name) {
                    continue;
                }
                loop {
                    match self.deleter.delete_batch(table, tenant_id, self.batch_size).await? {
                        BatchOutcome::Deleted(n) => {
                            if n > 0 {
                                *report.deleted.entry(table.name.to_string()).or_default() += n;
                                deleted_this_pass += n;
                            }
                            if n < self.batch_size as u64 {
                                break;
                            }
                        }
                        BatchOutcome::Blocked => {
                            debug!(table = table.name, pass, "Rows still referenced, retrying next pass");
                            break;
                        }
                        BatchOutcome::MissingRelation => {
                            warn!(table = table.name, "Skipping missing relation during purge");
                            skipped.insert(table.name);
                            report.skipped_tables.push(table.name.to_string());
                            break;
                        }
                    }
                }
            }

            debug!(tenant_id = %tenant_id, pass, deleted = deleted_this_pass, "Purge pass finished");
            if deleted_this_pass == 0 {
                report.passes = pass;
                info!(tenant_id = %tenant_id, passes = pass, deleted = report.total(), "Purged tenant");
                return Ok(report);
            }
        }

        Err(CoreError::Conflict(format!(
            "purge of tenant {} did not settle after {} passes",
            tenant_id, self.max_passes
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory row counts per table. Organizations are modelled per level
    /// and only the deepest remaining level is deletable.
    struct FakeDeleter {
        rows: Mutex<HashMap<&'static str, u64>>,
        org_levels: Mutex<Vec<u64>>,
        missing: HashSet<&'static str>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeDeleter {
        fn new(rows: &[(&'static str, u64)], org_levels: Vec<u64>) -> Self {
            Self {
                rows: Mutex::new(rows.iter().copied().collect()),
                org_levels: Mutex::new(org_levels),
                missing: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LeafDeleter for FakeDeleter {
        async fn delete_batch(&self, table: &LeafTable, _tenant_id: Uuid, limit: i64) -> CoreResult<BatchOutcome> {
            self.calls.lock().unwrap().push(table.name);
            if self.missing.contains(table.name) {
                return Ok(BatchOutcome::MissingRelation);
            }
            let limit = limit as u64;

            if table.name == "organizations" {
                let mut levels = self.org_levels.lock().unwrap();
                while levels.last() == Some(&0) {
                    levels.pop();
                }
                return Ok(match levels.last_mut() {
                    Some(deepest) => {
                        let n = (*deepest).min(limit);
                        *deepest -= n;
                        BatchOutcome::Deleted(n)
                    }
                    None => BatchOutcome::Deleted(0),
                });
            }

            let mut rows = self.rows.lock().unwrap();
            let remaining = rows.entry(table.name).or_insert(0);
            let n = (*remaining).min(limit);
            *remaining -= n;
            Ok(BatchOutcome::Deleted(n))
        }
    }

    #[tokio::test]
    async fn purge_reaches_fixed_point() {
        let deleter = FakeDeleter::new(
            &[("credit_transactions", 7), ("credits", 3), ("tenant_users", 2), ("tenants", 1)],
            vec![1, 3, 5],
        );
        let purger = TenantPurger::new(deleter, 2, 10);
        let report = purger.purge(Uuid::new_v4()).await.unwrap();

        assert_eq!(report.deleted["credit_transactions"], 7);
        assert_eq!(report.deleted["organizations"], 9);
        assert_eq!(report.deleted["tenants"], 1);
        assert_eq!(report.total(), 7 + 3 + 2 + 1 + 9);
        assert!(report.skipped_tables.is_empty());
        assert!(report.passes >= 2);
    }

    #[tokio::test]
    async fn missing_relations_are_skipped_once() {
        let mut deleter = FakeDeleter::new(&[("tenants", 1)], vec![]);
        deleter.missing.insert("location_usage");
        let purger = TenantPurger::new(deleter, 100, 5);
        let report = purger.purge(Uuid::new_v4()).await.unwrap();

        assert_eq!(report.skipped_tables, vec!["location_usage".to_string()]);
        let calls = purger.deleter.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|t| **t == "location_usage").count(), 1);
    }

    /// `tenants` stays blocked until organizations are gone
    struct ReferencedDeleter {
        orgs: Mutex<u64>,
        tenants: Mutex<u64>,
    }

    #[async_trait]
    impl LeafDeleter for ReferencedDeleter {
        async fn delete_batch(&self, table: &LeafTable, _tenant_id: Uuid, _limit: i64) -> CoreResult<BatchOutcome> {
            match table.name {
                "organizations" => {
                    let mut orgs = self.orgs.lock().unwrap();
                    let n = (*orgs).min(1);
                    *orgs -= n;
                    Ok(BatchOutcome::Deleted(n))
                }
                "tenants" if *self.orgs.lock().unwrap() > 0 => Ok(BatchOutcome::Blocked),
                "tenants" => {
                    let mut tenants = self.tenants.lock().unwrap();
                    let n = *tenants;
                    *tenants = 0;
                    Ok(BatchOutcome::Deleted(n))
                }
                _ => Ok(BatchOutcome::Deleted(0)),
            }
        }
    }

    #[tokio::test]
    async fn blocked_tables_are_retried_next_pass() {
        let deleter = ReferencedDeleter {
            orgs: Mutex::new(2),
            tenants: Mutex::new(1),
        };
        // One organization per call is a partial batch, so one per pass
        let purger = TenantPurger::new(deleter, 2, 10);
        let report = purger.purge(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.deleted["organizations"], 2);
        assert_eq!(report.deleted["tenants"], 1);
        assert_eq!(report.passes, 3);
    }

    struct EndlessDeleter;

    #[async_trait]
    impl LeafDeleter for EndlessDeleter {
        async fn delete_batch(&self, _table: &LeafTable, _tenant_id: Uuid, _limit: i64) -> CoreResult<BatchOutcome> {
            Ok(BatchOutcome::Deleted(1))
        }
    }

    #[tokio::test]
    async fn purge_is_bounded() {
        let purger = TenantPurger::new(EndlessDeleter, 10, 3);
        let err = purger.purge(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn tenants_row_goes_last() {
        assert_eq!(LEAF_TABLES.last().map(|t| t.name), Some("tenants"));
        let position = |name: &str| LEAF_TABLES.iter().position(|t| t.name == name).unwrap();
        assert!(position("credit_pools") < position("credits"));
        assert!(position("user_role_assignments") < position("custom_roles"));
        assert!(position("organizations") < position("tenant_users"));
    }
}
