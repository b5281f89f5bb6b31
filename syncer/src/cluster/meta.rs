use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cluster::{Backend, TableMeta};
use crate::error::{ErrorCategory, SyncError};
use crate::spec::Frontend;

/// Cached metadata lookups for one cluster database.
///
/// Lookup failures surface as [`ErrorCategory::Meta`] errors so the job's
/// error triage can re-bootstrap on stale metadata.
#[async_trait]
pub trait ClusterMeta: Send + Sync {
    /// Refreshes and returns the table list of the bound database.
    async fn get_tables(&self) -> Result<Vec<TableMeta>, SyncError>;

    /// Returns the last known table list without refreshing. May be stale or
    /// contain tables dropped since the last refresh.
    async fn dirty_get_tables(&self) -> HashMap<i64, TableMeta>;

    async fn get_table_id(&self, name: &str) -> Result<i64, SyncError>;

    async fn get_table_name_by_id(&self, id: i64) -> Result<String, SyncError>;

    /// Refreshes the entry for the given table and returns it.
    async fn update_table(&self, name: &str) -> Result<TableMeta, SyncError>;

    async fn get_db_id(&self) -> Result<i64, SyncError>;

    async fn get_backends(&self) -> Result<Vec<Backend>, SyncError>;

    async fn get_frontends(&self) -> Result<Vec<Frontend>, SyncError>;

    async fn get_master_token(&self) -> Result<String, SyncError>;

    /// Errors if the cluster does not support binlogs.
    async fn check_binlog_feature(&self) -> Result<(), SyncError>;

    /// Drops the cached entry for one table of the given database.
    async fn clear_table(&self, database: &str, table: &str);
}

/// The uncached lookups [`MetaCache`] is layered over.
#[async_trait]
pub trait MetaFetch: Send + Sync {
    async fn fetch_tables(&self) -> Result<Vec<TableMeta>, SyncError>;

    async fn fetch_db_id(&self) -> Result<i64, SyncError>;

    async fn fetch_backends(&self) -> Result<Vec<Backend>, SyncError>;

    async fn fetch_frontends(&self) -> Result<Vec<Frontend>, SyncError>;

    async fn fetch_master_token(&self) -> Result<String, SyncError>;

    async fn check_binlog_feature(&self) -> Result<(), SyncError>;
}

#[derive(Default)]
struct Inner {
    tables_by_id: HashMap<i64, TableMeta>,
    ids_by_name: HashMap<String, i64>,
    db_id: Option<i64>,
    backends: Option<Vec<Backend>>,
    master_token: Option<String>,
}

impl Inner {
    fn replace_tables(&mut self, tables: &[TableMeta]) {
        self.tables_by_id.clear();
        self.ids_by_name.clear();
        for table in tables {
            self.tables_by_id.insert(table.id, table.clone());
            self.ids_by_name.insert(table.name.clone(), table.id);
        }
    }
}

/// Caching [`ClusterMeta`] over any [`MetaFetch`].
///
/// Table lookups miss into a full refresh; ids, backends and the master token
/// are fetched once and kept.
pub struct MetaCache {
    database: String,
    fetch: Arc<dyn MetaFetch>,
    inner: RwLock<Inner>,
}

impl MetaCache {
    pub fn new(database: impl Into<String>, fetch: Arc<dyn MetaFetch>) -> Self {
        Self {
            database: database.into(),
            fetch,
            inner: RwLock::new(Inner::default()),
        }
    }

    async fn refresh_tables(&self) -> Result<Vec<TableMeta>, SyncError> {
        let tables = self.fetch.fetch_tables().await?;
        let mut inner = self.inner.write().await;
        inner.replace_tables(&tables);
        Ok(tables)
    }
}

#[async_trait]
impl ClusterMeta for MetaCache {
    async fn get_tables(&self) -> Result<Vec<TableMeta>, SyncError> {
        self.refresh_tables().await
    }

    async fn dirty_get_tables(&self) -> HashMap<i64, TableMeta> {
        let inner = self.inner.read().await;
        inner.tables_by_id.clone()
    }

    async fn get_table_id(&self, name: &str) -> Result<i64, SyncError> {
        {
            let inner = self.inner.read().await;
            if let Some(id) = inner.ids_by_name.get(name) {
                return Ok(*id);
            }
        }

        self.refresh_tables().await?;

        let inner = self.inner.read().await;
        inner.ids_by_name.get(name).copied().ok_or_else(|| {
            SyncError::new(
                ErrorCategory::Meta,
                format!("table {}.{name} not found", self.database),
            )
        })
    }

    async fn get_table_name_by_id(&self, id: i64) -> Result<String, SyncError> {
        {
            let inner = self.inner.read().await;
            if let Some(table) = inner.tables_by_id.get(&id) {
                return Ok(table.name.clone());
            }
        }

        self.refresh_tables().await?;

        let inner = self.inner.read().await;
        inner
            .tables_by_id
            .get(&id)
            .map(|table| table.name.clone())
            .ok_or_else(|| {
                SyncError::new(
                    ErrorCategory::Meta,
                    format!("table id {id} not found in {}", self.database),
                )
            })
    }

    async fn update_table(&self, name: &str) -> Result<TableMeta, SyncError> {
        let tables = self.refresh_tables().await?;
        tables
            .into_iter()
            .find(|table| table.name == name)
            .ok_or_else(|| {
                SyncError::new(
                    ErrorCategory::Meta,
                    format!("table {}.{name} not found", self.database),
                )
            })
    }

    async fn get_db_id(&self) -> Result<i64, SyncError> {
        {
            let inner = self.inner.read().await;
            if let Some(db_id) = inner.db_id {
                return Ok(db_id);
            }
        }

        let db_id = self.fetch.fetch_db_id().await?;
        let mut inner = self.inner.write().await;
        inner.db_id = Some(db_id);
        Ok(db_id)
    }

    async fn get_backends(&self) -> Result<Vec<Backend>, SyncError> {
        {
            let inner = self.inner.read().await;
            if let Some(backends) = &inner.backends {
                return Ok(backends.clone());
            }
        }

        let backends = self.fetch.fetch_backends().await?;
        let mut inner = self.inner.write().await;
        inner.backends = Some(backends.clone());
        Ok(backends)
    }

    async fn get_frontends(&self) -> Result<Vec<Frontend>, SyncError> {
        self.fetch.fetch_frontends().await
    }

    async fn get_master_token(&self) -> Result<String, SyncError> {
        {
            let inner = self.inner.read().await;
            if let Some(token) = &inner.master_token {
                return Ok(token.clone());
            }
        }

        let token = self.fetch.fetch_master_token().await?;
        let mut inner = self.inner.write().await;
        inner.master_token = Some(token.clone());
        Ok(token)
    }

    async fn check_binlog_feature(&self) -> Result<(), SyncError> {
        self.fetch.check_binlog_feature().await
    }

    async fn clear_table(&self, database: &str, table: &str) {
        if database != self.database {
            return;
        }

        let mut inner = self.inner.write().await;
        if let Some(id) = inner.ids_by_name.remove(table) {
            inner.tables_by_id.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFetch {
        tables: Vec<TableMeta>,
    }

    #[async_trait]
    impl MetaFetch for FixedFetch {
        async fn fetch_tables(&self) -> Result<Vec<TableMeta>, SyncError> {
            Ok(self.tables.clone())
        }

        async fn fetch_db_id(&self) -> Result<i64, SyncError> {
            Ok(77)
        }

        async fn fetch_backends(&self) -> Result<Vec<Backend>, SyncError> {
            Ok(vec![Backend {
                id: 1,
                host: "be1".to_string(),
                http_port: 8040,
            }])
        }

        async fn fetch_frontends(&self) -> Result<Vec<Frontend>, SyncError> {
            Ok(vec![])
        }

        async fn fetch_master_token(&self) -> Result<String, SyncError> {
            Ok("token".to_string())
        }

        async fn check_binlog_feature(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn cache() -> MetaCache {
        MetaCache::new(
            "db1",
            Arc::new(FixedFetch {
                tables: vec![
                    TableMeta {
                        id: 1,
                        name: "a".to_string(),
                    },
                    TableMeta {
                        id: 2,
                        name: "b".to_string(),
                    },
                ],
            }),
        )
    }

    #[tokio::test]
    async fn lookup_misses_trigger_refresh() {
        let cache = cache();
        assert!(cache.dirty_get_tables().await.is_empty());

        assert_eq!(cache.get_table_id("a").await.expect("id of a"), 1);
        assert_eq!(
            cache.get_table_name_by_id(2).await.expect("name of 2"),
            "b"
        );
        assert_eq!(cache.dirty_get_tables().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_table_is_a_meta_error() {
        let cache = cache();
        let err = cache.get_table_id("missing").await.expect_err("must miss");
        assert_eq!(err.category(), ErrorCategory::Meta);
    }

    #[tokio::test]
    async fn clear_table_only_hits_own_database() {
        let cache = cache();
        cache.get_tables().await.expect("warm up");

        cache.clear_table("other_db", "a").await;
        assert_eq!(cache.dirty_get_tables().await.len(), 2);

        cache.clear_table("db1", "a").await;
        assert_eq!(cache.dirty_get_tables().await.len(), 1);
    }
}
