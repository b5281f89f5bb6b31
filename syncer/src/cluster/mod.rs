pub mod memory;
pub mod meta;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::SyncError;
use crate::ingest::BinlogIngestor;
use crate::rpc::FrontendClient;
use crate::spec::ClusterSpec;

pub use meta::{ClusterMeta, MetaCache, MetaFetch};

/// A table as the cluster reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableMeta {
    pub id: i64,
    pub name: String,
}

/// A backend node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Backend {
    pub id: i64,
    pub host: String,
    pub http_port: u16,
}

/// Side-effecting operations against one cluster, bound to a spec.
///
/// Everything the replication core does to a cluster that is not a typed
/// frontend RPC goes through here: existence and feature probes, snapshot
/// creation, restore polling, and arbitrary SQL.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Checks that the bound spec can reach the cluster at all.
    async fn valid(&self) -> Result<(), SyncError>;

    async fn check_database_exists(&self) -> Result<bool, SyncError>;

    async fn check_table_exists(&self) -> Result<bool, SyncError>;

    async fn is_database_binlog_enabled(&self) -> Result<bool, SyncError>;

    async fn is_table_binlog_enabled(&self) -> Result<bool, SyncError>;

    async fn create_database(&self) -> Result<(), SyncError>;

    /// Drops every table in the bound database.
    async fn clear_database(&self) -> Result<(), SyncError>;

    /// Creates a backup of the given tables and blocks until it is complete.
    /// Returns the snapshot name.
    async fn create_snapshot_and_wait(&self, tables: &[String]) -> Result<String, SyncError>;

    async fn check_restore_finished(&self, restore_name: &str) -> Result<bool, SyncError>;

    /// Runs SQL with the bound database selected.
    async fn db_exec(&self, sql: &str) -> Result<(), SyncError>;

    /// Runs SQL with no database selected.
    async fn exec(&self, sql: &str) -> Result<(), SyncError>;

    /// Blocks until the given transaction reaches a terminal state.
    async fn wait_transaction_done(&self, txn_id: i64) -> Result<(), SyncError>;
}

/// Produces the per-cluster collaborators a job needs, bound to a spec.
///
/// Jobs hold these as shared handles; the factory may cache connections
/// behind the returned objects.
pub trait ClusterFactory: Send + Sync {
    fn ops(&self, spec: &ClusterSpec) -> Arc<dyn ClusterOps>;

    fn meta(&self, spec: &ClusterSpec) -> Arc<dyn ClusterMeta>;

    fn frontend(&self, spec: &ClusterSpec) -> Result<Arc<dyn FrontendClient>, SyncError>;

    fn ingestor(&self) -> Arc<dyn BinlogIngestor>;
}
