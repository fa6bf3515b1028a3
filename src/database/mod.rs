pub mod manager;
pub mod models;

pub use manager::{DatabaseError, DatabaseManager};

/// Transaction-scoped advisory lock keyed by a namespaced string.
///
/// Released automatically at commit or rollback.
pub async fn advisory_xact_lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    namespace: &str,
    key: uuid::Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{}:{}", namespace, key))
        .execute(&mut **tx)
        .await?;
    Ok(())
}
