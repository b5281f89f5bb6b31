//! In-memory clusters.
//!
//! A [`MemoryCluster`] models just enough of a cluster for the replication
//! core to run against: databases and tables with ids, a binlog queue per
//! database, snapshots whose `job_info` carries the per-table commit-seq
//! floors, restores, and write transactions. The [`MemoryClusterFactory`]
//! hands out every seam the core consumes, backed by one shared registry of
//! clusters keyed by host.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cluster::{Backend, ClusterFactory, ClusterMeta, ClusterOps, MetaCache, MetaFetch, TableMeta};
use crate::error::{ErrorCategory, SyncError};
use crate::ingest::BinlogIngestor;
use crate::record::TableRecord;
use crate::rpc::{
    BeginTxnResponse, Binlog, CommitTxnResponse, FrontendClient, GetBinlogLagResponse,
    GetBinlogResponse, RestoreSnapshotResponse, RollbackTxnResponse, SnapshotResponse, Status,
    StatusCode, TableRef, TabletCommitInfo,
};
use crate::spec::{ClusterSpec, Frontend};

/// One write that reached the cluster through a committed transaction.
#[derive(Debug, Clone)]
pub struct AppliedWrite {
    pub txn_id: i64,
    pub label: String,
    pub dest_table_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Open,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct TxnState {
    label: String,
    status: TxnStatus,
    pending_tables: Vec<i64>,
}

#[derive(Debug)]
struct TableState {
    id: i64,
    commit_seq: i64,
    binlog_enabled: bool,
}

#[derive(Debug)]
struct DatabaseState {
    id: i64,
    binlog_enabled: bool,
    tables: HashMap<String, TableState>,
    binlogs: Vec<Binlog>,
}

#[derive(Debug)]
struct SnapshotState {
    job_info: String,
}

#[derive(Debug)]
struct ClusterState {
    databases: HashMap<String, DatabaseState>,
    backends: Vec<Backend>,
    frontends: Vec<Frontend>,
    master_token: String,
    binlog_feature_enabled: bool,
    snapshots: HashMap<String, SnapshotState>,
    /// Restore name to the number of unfinished polls left before it reports
    /// finished.
    restores: HashMap<String, u32>,
    restored_job_infos: Vec<String>,
    transactions: HashMap<i64, TxnState>,
    applied_writes: Vec<AppliedWrite>,
    executed_sql: Vec<String>,
    commit_outcomes: VecDeque<StatusCode>,
    ingest_failures: u32,
    exec_failures: u32,
    next_binlog_status: Option<StatusCode>,
    restore_delay_polls: u32,
    next_db_id: i64,
    next_table_id: i64,
    next_txn_id: i64,
    snapshot_counter: u64,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            databases: HashMap::new(),
            backends: vec![Backend {
                id: 1,
                host: "be1".to_string(),
                http_port: 8040,
            }],
            frontends: vec![],
            master_token: "master-token".to_string(),
            binlog_feature_enabled: true,
            snapshots: HashMap::new(),
            restores: HashMap::new(),
            restored_job_infos: vec![],
            transactions: HashMap::new(),
            applied_writes: vec![],
            executed_sql: vec![],
            commit_outcomes: VecDeque::new(),
            ingest_failures: 0,
            exec_failures: 0,
            next_binlog_status: None,
            restore_delay_polls: 0,
            next_db_id: 10_000,
            next_table_id: 20_000,
            next_txn_id: 1,
            snapshot_counter: 0,
        }
    }
}

/// A shared in-memory cluster. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<RwLock<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_database(&self, name: &str, db_id: i64, binlog_enabled: bool) {
        let mut state = self.state.write().await;
        state.databases.insert(
            name.to_string(),
            DatabaseState {
                id: db_id,
                binlog_enabled,
                tables: HashMap::new(),
                binlogs: vec![],
            },
        );
    }

    /// Seeds a table; `commit_seq` is the floor a snapshot of the table will
    /// report.
    pub async fn add_table(&self, database: &str, name: &str, table_id: i64, commit_seq: i64) {
        let mut state = self.state.write().await;
        if let Some(db) = state.databases.get_mut(database) {
            db.tables.insert(
                name.to_string(),
                TableState {
                    id: table_id,
                    commit_seq,
                    binlog_enabled: true,
                },
            );
        }
    }

    pub async fn push_binlog(&self, database: &str, binlog: Binlog) {
        let mut state = self.state.write().await;
        if let Some(db) = state.databases.get_mut(database) {
            db.binlogs.push(binlog);
        }
    }

    /// Queues the status the next commit answers with instead of OK.
    pub async fn push_commit_outcome(&self, code: StatusCode) {
        let mut state = self.state.write().await;
        state.commit_outcomes.push_back(code);
    }

    /// Fails the next `count` ingest calls against this cluster.
    pub async fn fail_next_ingests(&self, count: u32) {
        let mut state = self.state.write().await;
        state.ingest_failures = count;
    }

    /// Fails the next `count` SQL executions against this cluster.
    pub async fn fail_next_execs(&self, count: u32) {
        let mut state = self.state.write().await;
        state.exec_failures = count;
    }

    /// Overrides the status of the next binlog fetch.
    pub async fn set_next_binlog_status(&self, code: StatusCode) {
        let mut state = self.state.write().await;
        state.next_binlog_status = Some(code);
    }

    /// Makes every future restore report unfinished for `polls` checks.
    pub async fn set_restore_delay_polls(&self, polls: u32) {
        let mut state = self.state.write().await;
        state.restore_delay_polls = polls;
    }

    pub async fn table_id_of(&self, database: &str, table: &str) -> Option<i64> {
        let state = self.state.read().await;
        state
            .databases
            .get(database)
            .and_then(|db| db.tables.get(table))
            .map(|t| t.id)
    }

    pub async fn has_database(&self, database: &str) -> bool {
        let state = self.state.read().await;
        state.databases.contains_key(database)
    }

    pub async fn applied_writes(&self) -> Vec<AppliedWrite> {
        let state = self.state.read().await;
        state.applied_writes.clone()
    }

    pub async fn executed_sql(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.executed_sql.clone()
    }

    pub async fn restored_job_infos(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.restored_job_infos.clone()
    }

    pub async fn transaction_count(&self) -> usize {
        let state = self.state.read().await;
        state.transactions.len()
    }

    pub async fn snapshot_count(&self) -> u64 {
        let state = self.state.read().await;
        state.snapshot_counter
    }

    /// Takes a snapshot of the given tables of `database`, exactly as the
    /// ops seam does.
    pub async fn create_snapshot(
        &self,
        database: &str,
        tables: &[String],
    ) -> Result<String, SyncError> {
        let mut state = self.state.write().await;
        state.snapshot_counter += 1;
        let snapshot_name = format!("snap_{}", state.snapshot_counter);

        let Some(db) = state.databases.get(database) else {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("database {database} not found"),
            ));
        };

        let mut floors = serde_json::Map::new();
        let mut names = serde_json::Map::new();
        for table_name in tables {
            let Some(table) = db.tables.get(table_name) else {
                return Err(SyncError::new(
                    ErrorCategory::Normal,
                    format!("table {table_name} not found"),
                ));
            };
            floors.insert(table.id.to_string(), json!(table.commit_seq));
            names.insert(table_name.clone(), json!(table.id));
        }

        let job_info = json!({
            "backup_name": snapshot_name,
            "table_commit_seq_map": floors,
            "tables": names,
        })
        .to_string();

        state
            .snapshots
            .insert(snapshot_name.clone(), SnapshotState { job_info });
        Ok(snapshot_name)
    }
}

fn commit_txn(state: &mut ClusterState, txn_id: i64) {
    let Some(txn) = state.transactions.get_mut(&txn_id) else {
        return;
    };
    if txn.status != TxnStatus::Open {
        return;
    }

    txn.status = TxnStatus::Committed;
    let write = AppliedWrite {
        txn_id,
        label: txn.label.clone(),
        dest_table_ids: std::mem::take(&mut txn.pending_tables),
    };
    state.applied_writes.push(write);
}

/// Strips backticks and anything from the first parenthesis on, leaving a
/// bare table name.
fn clean_identifier(token: &str) -> String {
    let token = token.split('(').next().unwrap_or(token);
    token.trim_matches('`').trim_end_matches(';').to_string()
}

fn execute_sql(
    state: &mut ClusterState,
    database: Option<&str>,
    sql: &str,
) -> Result<(), SyncError> {
    state.executed_sql.push(sql.to_string());
    if state.exec_failures > 0 {
        state.exec_failures -= 1;
        return Err(SyncError::new(
            ErrorCategory::Normal,
            format!("exec failed (injected), sql: {sql}"),
        ));
    }

    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let upper = sql.to_uppercase();

    // Resolve "db.table" when no database is selected.
    let resolve = |token: &str| -> (Option<String>, String) {
        let cleaned = clean_identifier(token);
        match cleaned.split_once('.') {
            Some((db, table)) => (Some(db.to_string()), table.to_string()),
            None => (database.map(str::to_string), cleaned),
        }
    };

    if upper.starts_with("CREATE TABLE") {
        let Some(token) = tokens.get(2) else {
            return Err(SyncError::new(ErrorCategory::Normal, "malformed create table"));
        };
        let (db_name, table_name) = resolve(token);
        let next_table_id = state.next_table_id;
        let Some(db) = db_name.as_deref().and_then(|name| state.databases.get_mut(name)) else {
            return Err(SyncError::new(ErrorCategory::Normal, "database not selected"));
        };
        db.tables.insert(
            table_name,
            TableState {
                id: next_table_id,
                commit_seq: 0,
                binlog_enabled: true,
            },
        );
        state.next_table_id += 1;
        return Ok(());
    }

    if upper.starts_with("DROP TABLE") {
        let Some(token) = tokens.get(2) else {
            return Err(SyncError::new(ErrorCategory::Normal, "malformed drop table"));
        };
        let (db_name, table_name) = resolve(token);
        let Some(db) = db_name.as_deref().and_then(|name| state.databases.get_mut(name)) else {
            return Err(SyncError::new(ErrorCategory::Normal, "database not selected"));
        };
        if db.tables.remove(&table_name).is_none() {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("table {table_name} not found"),
            ));
        }
        return Ok(());
    }

    if upper.starts_with("TRUNCATE TABLE") {
        let Some(token) = tokens.get(2) else {
            return Err(SyncError::new(ErrorCategory::Normal, "malformed truncate table"));
        };
        let (db_name, table_name) = resolve(token);
        let known = db_name
            .as_deref()
            .and_then(|name| state.databases.get(name))
            .map(|db| db.tables.contains_key(&table_name))
            .unwrap_or(false);
        if !known {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("table {table_name} not found"),
            ));
        }
        return Ok(());
    }

    // Everything else (ALTER TABLE and friends) has no structural effect on
    // the model; recording the statement is enough.
    Ok(())
}

/// [`ClusterOps`] over a memory cluster, bound to one spec.
pub struct MemoryClusterOps {
    cluster: MemoryCluster,
    spec: ClusterSpec,
}

#[async_trait]
impl ClusterOps for MemoryClusterOps {
    async fn valid(&self) -> Result<(), SyncError> {
        self.spec.validate()
    }

    async fn check_database_exists(&self) -> Result<bool, SyncError> {
        Ok(self.cluster.has_database(&self.spec.database).await)
    }

    async fn check_table_exists(&self) -> Result<bool, SyncError> {
        Ok(self
            .cluster
            .table_id_of(&self.spec.database, &self.spec.table)
            .await
            .is_some())
    }

    async fn is_database_binlog_enabled(&self) -> Result<bool, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state
            .databases
            .get(&self.spec.database)
            .map(|db| db.binlog_enabled)
            .unwrap_or(false))
    }

    async fn is_table_binlog_enabled(&self) -> Result<bool, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state
            .databases
            .get(&self.spec.database)
            .and_then(|db| db.tables.get(&self.spec.table))
            .map(|table| table.binlog_enabled)
            .unwrap_or(false))
    }

    async fn create_database(&self) -> Result<(), SyncError> {
        let mut state = self.cluster.state.write().await;
        let db_id = state.next_db_id;
        state.next_db_id += 1;
        state.databases.entry(self.spec.database.clone()).or_insert(DatabaseState {
            id: db_id,
            binlog_enabled: true,
            tables: HashMap::new(),
            binlogs: vec![],
        });
        Ok(())
    }

    async fn clear_database(&self) -> Result<(), SyncError> {
        let mut state = self.cluster.state.write().await;
        if let Some(db) = state.databases.get_mut(&self.spec.database) {
            db.tables.clear();
        }
        Ok(())
    }

    async fn create_snapshot_and_wait(&self, tables: &[String]) -> Result<String, SyncError> {
        self.cluster.create_snapshot(&self.spec.database, tables).await
    }

    async fn check_restore_finished(&self, restore_name: &str) -> Result<bool, SyncError> {
        let mut state = self.cluster.state.write().await;
        match state.restores.get_mut(restore_name) {
            Some(0) => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
            None => Err(SyncError::new(
                ErrorCategory::Normal,
                format!("restore {restore_name} not found"),
            )),
        }
    }

    async fn db_exec(&self, sql: &str) -> Result<(), SyncError> {
        let mut state = self.cluster.state.write().await;
        execute_sql(&mut state, Some(&self.spec.database), sql)
    }

    async fn exec(&self, sql: &str) -> Result<(), SyncError> {
        let mut state = self.cluster.state.write().await;
        execute_sql(&mut state, None, sql)
    }

    async fn wait_transaction_done(&self, txn_id: i64) -> Result<(), SyncError> {
        let mut state = self.cluster.state.write().await;
        let Some(txn) = state.transactions.get(&txn_id) else {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("transaction [{txn_id}] not found"),
            ));
        };
        match txn.status {
            TxnStatus::Committed => Ok(()),
            TxnStatus::Open => {
                commit_txn(&mut state, txn_id);
                Ok(())
            }
            TxnStatus::Aborted => Err(SyncError::new(
                ErrorCategory::Normal,
                format!("transaction [{txn_id}] is already aborted"),
            )),
        }
    }
}

/// [`FrontendClient`] over a memory cluster.
pub struct MemoryFrontend {
    cluster: MemoryCluster,
}

#[async_trait]
impl FrontendClient for MemoryFrontend {
    async fn get_binlog(
        &self,
        spec: &ClusterSpec,
        commit_seq: i64,
    ) -> Result<GetBinlogResponse, SyncError> {
        let mut state = self.cluster.state.write().await;
        let override_code = state.next_binlog_status.take();

        let Some(db) = state.databases.get(&spec.database) else {
            return Ok(GetBinlogResponse {
                status: Status::error(StatusCode::DbNotFound, "database not found"),
                binlogs: vec![],
            });
        };

        let mut binlogs: Vec<Binlog> = db
            .binlogs
            .iter()
            .filter(|binlog| binlog.commit_seq > commit_seq)
            .cloned()
            .collect();
        binlogs.sort_by_key(|binlog| binlog.commit_seq);

        if let Some(code) = override_code {
            return Ok(GetBinlogResponse {
                status: Status {
                    code,
                    error_msgs: vec![],
                },
                binlogs,
            });
        }

        if binlogs.is_empty() {
            return Ok(GetBinlogResponse {
                status: Status {
                    code: StatusCode::TooNewCommitSeq,
                    error_msgs: vec![],
                },
                binlogs: vec![],
            });
        }

        Ok(GetBinlogResponse {
            status: Status::ok(),
            binlogs,
        })
    }

    async fn get_binlog_lag(
        &self,
        spec: &ClusterSpec,
        commit_seq: i64,
    ) -> Result<GetBinlogLagResponse, SyncError> {
        let state = self.cluster.state.read().await;
        let newest = state
            .databases
            .get(&spec.database)
            .and_then(|db| db.binlogs.iter().map(|binlog| binlog.commit_seq).max())
            .unwrap_or(commit_seq);

        Ok(GetBinlogLagResponse {
            status: Status::ok(),
            lag: (newest - commit_seq).max(0),
        })
    }

    async fn get_snapshot(
        &self,
        _spec: &ClusterSpec,
        snapshot_name: &str,
    ) -> Result<SnapshotResponse, SyncError> {
        let state = self.cluster.state.read().await;
        match state.snapshots.get(snapshot_name) {
            Some(snapshot) => Ok(SnapshotResponse {
                status: Status::ok(),
                job_info: Some(snapshot.job_info.clone()),
            }),
            None => Ok(SnapshotResponse {
                status: Status::error(
                    StatusCode::InternalError,
                    format!("snapshot {snapshot_name} not found"),
                ),
                job_info: None,
            }),
        }
    }

    async fn restore_snapshot(
        &self,
        spec: &ClusterSpec,
        table_refs: &[TableRef],
        restore_name: &str,
        snapshot: &SnapshotResponse,
    ) -> Result<RestoreSnapshotResponse, SyncError> {
        let Some(job_info) = snapshot.job_info.as_deref() else {
            return Ok(RestoreSnapshotResponse {
                status: Status::error(StatusCode::InternalError, "job info is not set"),
            });
        };

        let parsed: serde_json::Value = serde_json::from_str(job_info).map_err(|err| {
            SyncError::wrap(err, ErrorCategory::Normal, "unmarshal job info failed")
        })?;
        let Some(tables) = parsed.get("tables").and_then(serde_json::Value::as_object) else {
            return Ok(RestoreSnapshotResponse {
                status: Status::error(StatusCode::InternalError, "job info has no tables"),
            });
        };

        // Snapshot tables land under their alias when the restore renames
        // them.
        let restored_names: Vec<String> = tables
            .keys()
            .map(|table_name| {
                table_refs
                    .iter()
                    .find(|table_ref| &table_ref.table == table_name)
                    .map(|table_ref| table_ref.alias_name.clone())
                    .unwrap_or_else(|| table_name.clone())
            })
            .collect();

        let mut state = self.cluster.state.write().await;
        state.restored_job_infos.push(job_info.to_string());
        let delay = state.restore_delay_polls;

        let next_id = state.next_table_id;
        let Some(db) = state.databases.get_mut(&spec.database) else {
            return Ok(RestoreSnapshotResponse {
                status: Status::error(StatusCode::DbNotFound, "database not found"),
            });
        };
        let mut assigned = 0;
        for restored_name in restored_names {
            db.tables.insert(
                restored_name,
                TableState {
                    id: next_id + assigned,
                    commit_seq: 0,
                    binlog_enabled: true,
                },
            );
            assigned += 1;
        }
        state.next_table_id = next_id + assigned;

        state.restores.insert(restore_name.to_string(), delay);

        Ok(RestoreSnapshotResponse {
            status: Status::ok(),
        })
    }

    async fn begin_transaction(
        &self,
        spec: &ClusterSpec,
        label: &str,
        _table_ids: &[i64],
    ) -> Result<BeginTxnResponse, SyncError> {
        let mut state = self.cluster.state.write().await;
        let txn_id = state.next_txn_id;
        state.next_txn_id += 1;
        state.transactions.insert(
            txn_id,
            TxnState {
                label: label.to_string(),
                status: TxnStatus::Open,
                pending_tables: vec![],
            },
        );

        let db_id = state
            .databases
            .get(&spec.database)
            .map(|db| db.id)
            .unwrap_or_default();

        Ok(BeginTxnResponse {
            status: Status::ok(),
            txn_id,
            db_id,
        })
    }

    async fn commit_transaction(
        &self,
        _spec: &ClusterSpec,
        txn_id: i64,
        _commit_infos: &[TabletCommitInfo],
    ) -> Result<CommitTxnResponse, SyncError> {
        let mut state = self.cluster.state.write().await;

        let status = match state.transactions.get(&txn_id).map(|txn| txn.status) {
            None => {
                return Ok(CommitTxnResponse {
                    status: Status::error(
                        StatusCode::InternalError,
                        format!("transaction [{txn_id}] not found"),
                    ),
                })
            }
            Some(TxnStatus::Committed) => {
                return Ok(CommitTxnResponse {
                    status: Status::error(
                        StatusCode::InternalError,
                        format!("transaction [{txn_id}] is already COMMITTED"),
                    ),
                })
            }
            Some(TxnStatus::Aborted) => {
                return Ok(CommitTxnResponse {
                    status: Status::error(
                        StatusCode::InternalError,
                        format!("transaction [{txn_id}] is already aborted"),
                    ),
                })
            }
            Some(TxnStatus::Open) => state.commit_outcomes.pop_front(),
        };

        match status {
            None | Some(StatusCode::Ok) => {
                commit_txn(&mut state, txn_id);
                Ok(CommitTxnResponse {
                    status: Status::ok(),
                })
            }
            Some(StatusCode::PublishTimeout) => {
                // The commit lands; only replica publishing is slow.
                commit_txn(&mut state, txn_id);
                Ok(CommitTxnResponse {
                    status: Status {
                        code: StatusCode::PublishTimeout,
                        error_msgs: vec![],
                    },
                })
            }
            Some(code) => Ok(CommitTxnResponse {
                status: Status::error(code, "commit rejected (injected)"),
            }),
        }
    }

    async fn rollback_transaction(
        &self,
        _spec: &ClusterSpec,
        txn_id: i64,
    ) -> Result<RollbackTxnResponse, SyncError> {
        let mut state = self.cluster.state.write().await;

        let Some(txn) = state.transactions.get_mut(&txn_id) else {
            return Ok(RollbackTxnResponse {
                status: Status::error(
                    StatusCode::InternalError,
                    format!("transaction [{txn_id}] not found"),
                ),
            });
        };

        match txn.status {
            TxnStatus::Committed => Ok(RollbackTxnResponse {
                status: Status::error(
                    StatusCode::InternalError,
                    format!("transaction [{txn_id}] is already COMMITTED"),
                ),
            }),
            TxnStatus::Aborted => Ok(RollbackTxnResponse {
                status: Status::error(
                    StatusCode::InternalError,
                    format!("transaction [{txn_id}] is already aborted"),
                ),
            }),
            TxnStatus::Open => {
                txn.status = TxnStatus::Aborted;
                txn.pending_tables.clear();
                Ok(RollbackTxnResponse {
                    status: Status::ok(),
                })
            }
        }
    }

    async fn get_master_token(&self, _spec: &ClusterSpec) -> Result<String, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state.master_token.clone())
    }
}

/// [`MetaFetch`] over a memory cluster, bound to one database.
pub struct MemoryMetaFetch {
    cluster: MemoryCluster,
    database: String,
}

#[async_trait]
impl MetaFetch for MemoryMetaFetch {
    async fn fetch_tables(&self) -> Result<Vec<TableMeta>, SyncError> {
        let state = self.cluster.state.read().await;
        let Some(db) = state.databases.get(&self.database) else {
            return Err(SyncError::new(
                ErrorCategory::Meta,
                format!("database {} not found", self.database),
            ));
        };

        Ok(db
            .tables
            .iter()
            .map(|(name, table)| TableMeta {
                id: table.id,
                name: name.clone(),
            })
            .collect())
    }

    async fn fetch_db_id(&self) -> Result<i64, SyncError> {
        let state = self.cluster.state.read().await;
        state
            .databases
            .get(&self.database)
            .map(|db| db.id)
            .ok_or_else(|| {
                SyncError::new(
                    ErrorCategory::Meta,
                    format!("database {} not found", self.database),
                )
            })
    }

    async fn fetch_backends(&self) -> Result<Vec<Backend>, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state.backends.clone())
    }

    async fn fetch_frontends(&self) -> Result<Vec<Frontend>, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state.frontends.clone())
    }

    async fn fetch_master_token(&self) -> Result<String, SyncError> {
        let state = self.cluster.state.read().await;
        Ok(state.master_token.clone())
    }

    async fn check_binlog_feature(&self) -> Result<(), SyncError> {
        let state = self.cluster.state.read().await;
        if state.binlog_feature_enabled {
            Ok(())
        } else {
            Err(SyncError::new(
                ErrorCategory::Normal,
                "cluster does not support binlog",
            ))
        }
    }
}

#[derive(Default)]
struct ClusterRegistry {
    clusters: std::sync::RwLock<HashMap<String, MemoryCluster>>,
}

impl ClusterRegistry {
    fn cluster(&self, host: &str) -> MemoryCluster {
        {
            let clusters = self.clusters.read().expect("registry lock poisoned");
            if let Some(cluster) = clusters.get(host) {
                return cluster.clone();
            }
        }

        let mut clusters = self.clusters.write().expect("registry lock poisoned");
        clusters.entry(host.to_string()).or_default().clone()
    }
}

/// Tablet ingest against memory clusters: records the destination tables of
/// the open transaction and returns one commit info per table.
pub struct MemoryIngestor {
    registry: Arc<ClusterRegistry>,
}

#[async_trait]
impl BinlogIngestor for MemoryIngestor {
    async fn ingest(
        &self,
        _src: &ClusterSpec,
        dest: &ClusterSpec,
        txn_id: i64,
        _table_records: &[TableRecord],
        dest_table_ids: &[i64],
    ) -> Result<Vec<TabletCommitInfo>, SyncError> {
        let cluster = self.registry.cluster(&dest.host);
        let mut state = cluster.state.write().await;

        if state.ingest_failures > 0 {
            state.ingest_failures -= 1;
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("ingest failed (injected), txn id: {txn_id}"),
            ));
        }

        let backend_id = state.backends.first().map(|backend| backend.id).unwrap_or(1);
        let Some(txn) = state.transactions.get_mut(&txn_id) else {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("transaction [{txn_id}] not found"),
            ));
        };
        if txn.status != TxnStatus::Open {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("transaction [{txn_id}] is not open"),
            ));
        }

        txn.pending_tables = dest_table_ids.to_vec();

        Ok(dest_table_ids
            .iter()
            .map(|&table_id| TabletCommitInfo {
                tablet_id: table_id,
                backend_id,
            })
            .collect())
    }
}

/// A [`ClusterFactory`] over a registry of memory clusters keyed by host.
#[derive(Default)]
pub struct MemoryClusterFactory {
    registry: Arc<ClusterRegistry>,
}

impl MemoryClusterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cluster behind `host`, created empty on first use. Seed it before
    /// creating jobs that point at it.
    pub fn cluster(&self, host: &str) -> MemoryCluster {
        self.registry.cluster(host)
    }
}

impl ClusterFactory for MemoryClusterFactory {
    fn ops(&self, spec: &ClusterSpec) -> Arc<dyn ClusterOps> {
        Arc::new(MemoryClusterOps {
            cluster: self.registry.cluster(&spec.host),
            spec: spec.clone(),
        })
    }

    fn meta(&self, spec: &ClusterSpec) -> Arc<dyn ClusterMeta> {
        Arc::new(MetaCache::new(
            &spec.database,
            Arc::new(MemoryMetaFetch {
                cluster: self.registry.cluster(&spec.host),
                database: spec.database.clone(),
            }),
        ))
    }

    fn frontend(&self, spec: &ClusterSpec) -> Result<Arc<dyn FrontendClient>, SyncError> {
        Ok(Arc::new(MemoryFrontend {
            cluster: self.registry.cluster(&spec.host),
        }))
    }

    fn ingestor(&self) -> Arc<dyn BinlogIngestor> {
        Arc::new(MemoryIngestor {
            registry: Arc::clone(&self.registry),
        })
    }
}
