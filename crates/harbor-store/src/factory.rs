use std::sync::Arc;

use crate::error::StoreError;
use crate::memory::InMemoryStore;
use crate::postgres_store::PostgresStore;
use crate::redb_store::RedbStore;
use crate::store::StateStore;

/// Builds the [`StateStore`] selected by `settings.store_dsn`:
/// `memory://` (the default, data lost on exit), `redb:///path/to/file`
/// (embedded, single-file), or `postgres://...` (shared, needs a reachable
/// database). Mirrors `harbor_driver::build_driver`'s scheme dispatch.
pub async fn build_store(dsn: &str) -> Result<Arc<dyn StateStore>, StoreError> {
    if dsn == "memory://" || dsn == "memory" {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    if let Some(path) = dsn.strip_prefix("redb://") {
        return Ok(Arc::new(RedbStore::open(path)?));
    }
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        return Ok(Arc::new(PostgresStore::connect(dsn).await?));
    }
    Err(StoreError::Internal(format!("unrecognized store dsn: {dsn}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_dsn_builds() {
        assert!(build_store("memory://").await.is_ok());
    }

    #[tokio::test]
    async fn redb_dsn_builds_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("redb://{}", dir.path().join("state.redb").display());
        assert!(build_store(&dsn).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        assert!(build_store("sqlite://foo").await.is_err());
    }
}
