// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use syncer::cluster::memory::{MemoryCluster, MemoryClusterFactory};
use syncer::cluster::ClusterFactory;
use syncer::config::{RetryConfig, SyncConfig};
use syncer::job::{Job, JobDefinition};
use syncer::progress::ProgressRecord;
use syncer::record::{PartitionRecord, TableRecord, Upsert};
use syncer::rpc::{Binlog, BinlogType};
use syncer::spec::ClusterSpec;
use syncer::storage::memory::MemoryStore;
use syncer::storage::Store;

pub const SRC_HOST: &str = "src-cluster";
pub const DEST_HOST: &str = "dest-cluster";
pub const DATABASE: &str = "db1";
pub const SRC_DB_ID: i64 = 1000;

/// Two seeded memory clusters plus the store and factory a job needs.
pub struct TestEnv {
    pub store: MemoryStore,
    pub factory: Arc<MemoryClusterFactory>,
    pub src: MemoryCluster,
    pub dest: MemoryCluster,
    pub config: SyncConfig,
}

impl TestEnv {
    pub async fn new() -> Self {
        let factory = Arc::new(MemoryClusterFactory::new());
        let src = factory.cluster(SRC_HOST);
        let dest = factory.cluster(DEST_HOST);
        src.add_database(DATABASE, SRC_DB_ID, true).await;

        Self {
            store: MemoryStore::new(),
            factory,
            src,
            dest,
            config: fast_config(),
        }
    }

    pub fn spec(&self, host: &str, table: &str) -> ClusterSpec {
        ClusterSpec {
            host: host.to_string(),
            port: 9030,
            user: "root".to_string(),
            password: String::new(),
            database: DATABASE.to_string(),
            db_id: 0,
            table: table.to_string(),
            table_id: 0,
            frontends: vec![],
        }
    }

    /// A validated, persisted and started table-sync job mirroring `orders`.
    /// The source table must be seeded first.
    pub async fn create_table_job(&self, name: &str, skip_error: bool) -> Job {
        self.create_job(name, "orders", skip_error).await
    }

    /// A validated, persisted and started db-sync job.
    pub async fn create_db_job(&self, name: &str, skip_error: bool) -> Job {
        self.create_job(name, "", skip_error).await
    }

    async fn create_job(&self, name: &str, table: &str, skip_error: bool) -> Job {
        let job = Job::new(
            name,
            self.spec(SRC_HOST, table),
            self.spec(DEST_HOST, table),
            skip_error,
            Arc::new(self.store.clone()),
            self.factory.clone() as Arc<dyn ClusterFactory>,
            self.config.clone(),
        )
        .await
        .expect("job is valid");
        job.first_run().await.expect("first run checks pass");
        job.persist().await.expect("job persists");
        job.start().await.expect("job starts");
        job
    }

    /// Rebuilds a job from the store, the way a restarted process would.
    pub async fn reload_job(&self, name: &str) -> Job {
        let definition = self.definition(name).await;
        let job = Job::from_definition(
            definition,
            Arc::new(self.store.clone()),
            self.factory.clone() as Arc<dyn ClusterFactory>,
            self.config.clone(),
        );
        job.start().await.expect("job recovers progress");
        job
    }

    pub async fn progress(&self, name: &str) -> ProgressRecord {
        let body = self
            .store
            .get_progress(name)
            .await
            .expect("progress stored");
        serde_json::from_str(&body).expect("progress decodes")
    }

    pub async fn definition(&self, name: &str) -> JobDefinition {
        let body = self.store.get_job(name).await.expect("job stored");
        serde_json::from_str(&body).expect("job decodes")
    }
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        sync_interval: Duration::from_millis(10),
        restore_check_retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        },
    }
}

/// An upsert binlog touching the given source tables.
pub fn upsert_binlog(commit_seq: i64, table_ids: &[i64]) -> Binlog {
    let mut table_records = HashMap::new();
    for &id in table_ids {
        table_records.insert(
            id,
            TableRecord {
                id,
                partition_records: vec![PartitionRecord {
                    partition_id: id * 10,
                    version: commit_seq,
                }],
            },
        );
    }

    let upsert = Upsert {
        commit_seq,
        table_records,
    };
    Binlog {
        binlog_type: BinlogType::Upsert,
        commit_seq,
        data: serde_json::to_string(&upsert).expect("upsert encodes"),
    }
}

pub fn ddl_binlog(binlog_type: BinlogType, commit_seq: i64, data: serde_json::Value) -> Binlog {
    Binlog {
        binlog_type,
        commit_seq,
        data: data.to_string(),
    }
}
