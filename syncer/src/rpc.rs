use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;
use crate::spec::ClusterSpec;

/// Status codes a cluster frontend can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    /// The transaction committed but publishing to replicas timed out; the
    /// caller must wait for the transaction to finish on its own.
    PublishTimeout,
    /// The requested commit sequence is older than the retained binlog.
    TooOldCommitSeq,
    /// Nothing newer than the requested commit sequence exists yet.
    TooNewCommitSeq,
    BinlogDisabled,
    DbNotFound,
    TableNotFound,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub code: StatusCode,
    #[serde(default)]
    pub error_msgs: Vec<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            error_msgs: vec![],
        }
    }

    pub fn error(code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        if !self.error_msgs.is_empty() {
            write!(f, " ({})", self.error_msgs.join("; "))?;
        }
        Ok(())
    }
}

/// The kind of change a binlog record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinlogType {
    Upsert,
    AddPartition,
    CreateTable,
    DropPartition,
    DropTable,
    AlterJob,
    ModifyTableAddOrDropColumns,
    Dummy,
    AlterDatabaseProperty,
    ModifyTableProperty,
    Barrier,
    TruncateTable,
}

impl fmt::Display for BinlogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinlogType::Upsert => "upsert",
            BinlogType::AddPartition => "add_partition",
            BinlogType::CreateTable => "create_table",
            BinlogType::DropPartition => "drop_partition",
            BinlogType::DropTable => "drop_table",
            BinlogType::AlterJob => "alter_job",
            BinlogType::ModifyTableAddOrDropColumns => "modify_table_add_or_drop_columns",
            BinlogType::Dummy => "dummy",
            BinlogType::AlterDatabaseProperty => "alter_database_property",
            BinlogType::ModifyTableProperty => "modify_table_property",
            BinlogType::Barrier => "barrier",
            BinlogType::TruncateTable => "truncate_table",
        };
        write!(f, "{name}")
    }
}

/// One record of the source cluster's ordered change stream. The payload in
/// `data` is JSON whose shape depends on `binlog_type` (see [`crate::record`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Binlog {
    pub binlog_type: BinlogType,
    pub commit_seq: i64,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct GetBinlogResponse {
    pub status: Status,
    pub binlogs: Vec<Binlog>,
}

#[derive(Debug, Clone)]
pub struct GetBinlogLagResponse {
    pub status: Status,
    pub lag: i64,
}

/// Answer to `get_snapshot`. `job_info` is an opaque JSON document produced by
/// the source; the full-sync pipeline mutates it before restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotResponse {
    pub status: Status,
    pub job_info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestoreSnapshotResponse {
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct BeginTxnResponse {
    pub status: Status,
    pub txn_id: i64,
    pub db_id: i64,
}

#[derive(Debug, Clone)]
pub struct CommitTxnResponse {
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct RollbackTxnResponse {
    pub status: Status,
}

/// Renames a table while restoring a snapshot under a different name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub alias_name: String,
}

/// Where one tablet's data landed during ingest; handed back to the frontend
/// on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TabletCommitInfo {
    pub tablet_id: i64,
    pub backend_id: i64,
}

/// Typed calls to a cluster frontend, as consumed by the replication core.
///
/// Implementations are shared references with internal synchronization; the
/// factory may cache connections behind them.
#[async_trait]
pub trait FrontendClient: Send + Sync {
    /// Fetches the binlog records with commit sequence greater than
    /// `commit_seq`.
    async fn get_binlog(
        &self,
        spec: &ClusterSpec,
        commit_seq: i64,
    ) -> Result<GetBinlogResponse, SyncError>;

    async fn get_binlog_lag(
        &self,
        spec: &ClusterSpec,
        commit_seq: i64,
    ) -> Result<GetBinlogLagResponse, SyncError>;

    async fn get_snapshot(
        &self,
        spec: &ClusterSpec,
        snapshot_name: &str,
    ) -> Result<SnapshotResponse, SyncError>;

    async fn restore_snapshot(
        &self,
        spec: &ClusterSpec,
        table_refs: &[TableRef],
        restore_name: &str,
        snapshot: &SnapshotResponse,
    ) -> Result<RestoreSnapshotResponse, SyncError>;

    async fn begin_transaction(
        &self,
        spec: &ClusterSpec,
        label: &str,
        table_ids: &[i64],
    ) -> Result<BeginTxnResponse, SyncError>;

    async fn commit_transaction(
        &self,
        spec: &ClusterSpec,
        txn_id: i64,
        commit_infos: &[TabletCommitInfo],
    ) -> Result<CommitTxnResponse, SyncError>;

    async fn rollback_transaction(
        &self,
        spec: &ClusterSpec,
        txn_id: i64,
    ) -> Result<RollbackTxnResponse, SyncError>;

    async fn get_master_token(&self, spec: &ClusterSpec) -> Result<String, SyncError>;
}
