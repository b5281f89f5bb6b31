mod full_sync;
mod handlers;
mod incremental;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterFactory, ClusterMeta, ClusterOps};
use crate::config::SyncConfig;
use crate::error::{ErrorCategory, SyncError};
use crate::ingest::BinlogIngestor;
use crate::progress::{JobProgress, SyncPhase, SyncState};
use crate::rpc::{FrontendClient, Status};
use crate::shutdown::{create_shutdown_channel, ShutdownTx};
use crate::spec::ClusterSpec;
use crate::storage::Store;

/// Whether a job mirrors a whole database or a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    DbSync,
    TableSync,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::DbSync => write!(f, "db_sync"),
            SyncType::TableSync => write!(f, "table_sync"),
        }
    }
}

/// Administrative state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Paused,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Paused => write!(f, "paused"),
        }
    }
}

/// The persisted shape of a job, string-keyed by job name in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobDefinition {
    pub name: String,
    pub sync_type: SyncType,
    pub src: ClusterSpec,
    pub dest: ClusterSpec,
    pub skip_error: bool,
    pub state: JobState,
}

/// Answer to the status admin call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobStatus {
    pub name: String,
    pub state: String,
    pub progress_state: String,
}

/// Everything about a job that changes after construction, guarded by one
/// mutex so admin calls linearize with sync ticks.
pub(crate) struct JobInner {
    pub(crate) src: ClusterSpec,
    pub(crate) dest: ClusterSpec,
    pub(crate) skip_error: bool,
    pub(crate) state: JobState,
    pub(crate) progress: Option<JobProgress>,
}

/// A replication job: continuously mirrors a table or a whole database from
/// a source cluster to a destination cluster, bootstrapping via snapshot and
/// restore and then streaming the source's binlog.
///
/// One worker owns the job; it ticks every [`SyncConfig::sync_interval`] and
/// advances a checkpointed state machine that survives restarts.
pub struct Job {
    name: String,
    sync_type: SyncType,
    store: Arc<dyn Store>,
    factory: Arc<dyn ClusterFactory>,
    config: SyncConfig,
    pub(crate) src_ops: Arc<dyn ClusterOps>,
    pub(crate) dest_ops: Arc<dyn ClusterOps>,
    pub(crate) src_meta: Arc<dyn ClusterMeta>,
    pub(crate) dest_meta: Arc<dyn ClusterMeta>,
    pub(crate) ingestor: Arc<dyn BinlogIngestor>,
    pub(crate) inner: Mutex<JobInner>,
    deleted: AtomicBool,
    shutdown: ShutdownTx,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("sync_type", &self.sync_type)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Creates a new job from an admin request and validates it. The job is
    /// not persisted or scheduled yet; see [`crate::manager::JobManager`].
    pub async fn new(
        name: impl Into<String>,
        src: ClusterSpec,
        dest: ClusterSpec,
        skip_error: bool,
        store: Arc<dyn Store>,
        factory: Arc<dyn ClusterFactory>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let name = name.into();

        if name.is_empty() {
            return Err(SyncError::new(ErrorCategory::Normal, "name is empty"));
        }
        if store.job_exists(&name).await? {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("job {name} already exists"),
            ));
        }
        src.validate()
            .map_err(|err| SyncError::wrap(err, ErrorCategory::Normal, "src spec is invalid"))?;
        dest.validate()
            .map_err(|err| SyncError::wrap(err, ErrorCategory::Normal, "dest spec is invalid"))?;
        if src.is_table_scoped() != dest.is_table_scoped() {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                "src/dest are not both db or table sync",
            ));
        }

        let sync_type = if src.is_table_scoped() {
            SyncType::TableSync
        } else {
            SyncType::DbSync
        };

        Ok(Self::assemble(
            name, sync_type, src, dest, skip_error, JobState::Running, store, factory, config,
        ))
    }

    /// Rebuilds a job from its persisted definition, without validation.
    pub fn from_definition(
        definition: JobDefinition,
        store: Arc<dyn Store>,
        factory: Arc<dyn ClusterFactory>,
        config: SyncConfig,
    ) -> Self {
        Self::assemble(
            definition.name,
            definition.sync_type,
            definition.src,
            definition.dest,
            definition.skip_error,
            definition.state,
            store,
            factory,
            config,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        name: String,
        sync_type: SyncType,
        src: ClusterSpec,
        dest: ClusterSpec,
        skip_error: bool,
        state: JobState,
        store: Arc<dyn Store>,
        factory: Arc<dyn ClusterFactory>,
        config: SyncConfig,
    ) -> Self {
        let (shutdown, _) = create_shutdown_channel();
        Self {
            src_ops: factory.ops(&src),
            dest_ops: factory.ops(&dest),
            src_meta: factory.meta(&src),
            dest_meta: factory.meta(&dest),
            ingestor: factory.ingestor(),
            inner: Mutex::new(JobInner {
                src,
                dest,
                skip_error,
                state,
                progress: None,
            }),
            name,
            sync_type,
            store,
            factory,
            config,
            deleted: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// Preconditions checked once before the job is scheduled: frontends are
    /// discovered, both sides support binlogs, the source exists and has
    /// binlogs enabled, the destination database exists (or is created) and
    /// the destination table does not.
    pub async fn first_run(&self) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().await;
        info!(
            "first run check, job: {}, src: {}, dest: {}",
            self.name, inner.src, inner.dest
        );

        let src_frontends = self.src_meta.get_frontends().await?;
        inner.src.frontends.extend(src_frontends);
        let dest_frontends = self.dest_meta.get_frontends().await?;
        inner.dest.frontends.extend(dest_frontends);

        self.src_meta.check_binlog_feature().await?;
        self.dest_meta.check_binlog_feature().await?;

        if !self.src_ops.check_database_exists().await? {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("src database {} not exists", inner.src.database),
            ));
        }
        if self.sync_type == SyncType::DbSync && !self.src_ops.is_database_binlog_enabled().await? {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("src database {} not enable binlog", inner.src.database),
            ));
        }
        inner.src.db_id = self.src_meta.get_db_id().await?;

        if self.sync_type == SyncType::TableSync {
            if !self.src_ops.check_table_exists().await? {
                return Err(SyncError::new(
                    ErrorCategory::Normal,
                    format!(
                        "src table {}.{} not exists",
                        inner.src.database, inner.src.table
                    ),
                ));
            }
            if !self.src_ops.is_table_binlog_enabled().await? {
                return Err(SyncError::new(
                    ErrorCategory::Normal,
                    format!(
                        "src table {}.{} not enable binlog",
                        inner.src.database, inner.src.table
                    ),
                ));
            }
            inner.src.table_id = self.src_meta.get_table_id(&inner.src.table).await?;
        }

        if !self.dest_ops.check_database_exists().await? {
            self.dest_ops.create_database().await?;
        }
        inner.dest.db_id = self.dest_meta.get_db_id().await?;
        if self.sync_type == SyncType::TableSync && self.dest_ops.check_table_exists().await? {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!(
                    "dest table {}.{} already exists",
                    inner.dest.database, inner.dest.table
                ),
            ));
        }

        Ok(())
    }

    /// Loads or creates the job's progress and warms the meta caches. Must
    /// run before the first tick; [`Job::run`] calls it.
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut progress_exists = false;
        let mut last_err = None;
        for _ in 0..3 {
            match self.store.progress_exists(&self.name).await {
                Ok(exists) => {
                    progress_exists = exists;
                    last_err = None;
                    break;
                }
                Err(err) => {
                    error!("check progress exists failed, job: {}: {err:#}", self.name);
                    last_err = Some(err);
                }
            }
        }
        if let Some(err) = last_err {
            return Err(err);
        }

        let mut inner = self.inner.lock().await;
        if progress_exists {
            let progress = JobProgress::from_store(&self.name, self.store.clone())
                .await
                .map_err(|err| {
                    error!("recover progress failed, job: {}: {err:#}", self.name);
                    err
                })?;
            inner.progress = Some(progress);
        } else {
            let initial_state = match self.sync_type {
                SyncType::TableSync => SyncState::TableFullSync,
                SyncType::DbSync => SyncState::DbFullSync,
            };
            let mut progress = JobProgress::new(&self.name, initial_state, self.store.clone());
            self.new_snapshot(&mut progress, 0).await?;
            inner.progress = Some(progress);
        }

        if self.sync_type == SyncType::DbSync {
            // Warm both table caches so drop-table records can resolve names
            // even when the source has already forgotten the table.
            let _ = self.src_meta.get_tables().await;
            let _ = self.dest_meta.get_tables().await;
        }

        Ok(())
    }

    /// The job worker: ticks until the job is stopped or deleted. Sync
    /// failures are triaged and retried; only a panic-severity error stops
    /// processing (while still ticking so the operator can pause or delete).
    pub async fn run(&self) -> Result<(), SyncError> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut fatal: Option<SyncError> = None;
        loop {
            // Check deletion before waiting so a delete racing the stop
            // signal still removes the stored row.
            if self.maybe_deleted().await {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    // A delete signals stop after setting its flag; remove the
                    // stored row before exiting.
                    if self.maybe_deleted().await {
                        return Ok(());
                    }
                    info!("job stopped, job: {}", self.name);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if self.job_state().await != JobState::Running {
                        continue;
                    }
                    if let Some(err) = &fatal {
                        error!("job panic, job: {}: {err:#}", self.name);
                        continue;
                    }
                    if let Err(err) = self.sync_once().await {
                        warn!("job sync failed, job: {}: {err:#}", self.name);
                        fatal = self.handle_error(err).await;
                    }
                }
            }
        }
    }

    /// Advances the state machine by one tick. Serialized with admin calls
    /// on the job's lock.
    pub async fn sync_once(&self) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().await;
        self.sync(&mut inner).await
    }

    async fn sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        match self.sync_type {
            SyncType::TableSync => self.table_sync(inner).await,
            SyncType::DbSync => self.db_sync(inner).await,
        }
    }

    async fn table_sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        let sync_state = require_progress(inner)?.sync_state();
        match sync_state {
            SyncState::TableFullSync => {
                debug!("table full sync, job: {}", self.name);
                self.full_sync(inner).await
            }
            SyncState::TableIncrementalSync => {
                debug!("table incremental sync, job: {}", self.name);
                self.incremental_sync(inner).await
            }
            other => Err(SyncError::new(
                ErrorCategory::Normal,
                format!("unknown table sync state: {other}"),
            )),
        }
    }

    async fn db_sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        let sync_state = require_progress(inner)?.sync_state();
        match sync_state {
            SyncState::DbFullSync => {
                debug!("db full sync, job: {}", self.name);
                self.full_sync(inner).await
            }
            SyncState::DbTablesIncrementalSync => {
                debug!("db tables incremental sync, job: {}", self.name);
                self.incremental_sync(inner).await
            }
            SyncState::DbSpecificTableFullSync => {
                debug!("db specific table full sync, job: {}", self.name);
                Ok(())
            }
            SyncState::DbIncrementalSync => {
                debug!("db incremental sync, job: {}", self.name);
                self.incremental_sync(inner).await
            }
            other => Err(SyncError::new(
                ErrorCategory::Normal,
                format!("unknown db sync state: {other}"),
            )),
        }
    }

    /// Per-tick error triage. A panic error is returned to the run loop and
    /// blocks further syncing; stale metadata re-bootstraps; anything else
    /// is dropped and retried on the next tick.
    async fn handle_error(&self, err: SyncError) -> Option<SyncError> {
        if err.is_panic() {
            return Some(err);
        }

        if err.category() == ErrorCategory::Meta {
            let mut inner = self.inner.lock().await;
            if let Some(progress) = inner.progress.as_mut() {
                let commit_seq = progress.commit_seq();
                if let Err(snapshot_err) = self.new_snapshot(progress, commit_seq).await {
                    warn!(
                        "restarting snapshot after meta error failed, job: {}: {snapshot_err:#}",
                        self.name
                    );
                }
            }
        }

        None
    }

    /// Rewinds the job into a fresh bootstrap starting at `commit_seq`.
    pub(crate) async fn new_snapshot(
        &self,
        progress: &mut JobProgress,
        commit_seq: i64,
    ) -> Result<(), SyncError> {
        info!("new snapshot, job: {}, commit seq: {commit_seq}", self.name);

        let sync_state = match self.sync_type {
            SyncType::TableSync => SyncState::TableFullSync,
            SyncType::DbSync => SyncState::DbFullSync,
        };
        progress
            .next_with_persist(commit_seq, sync_state, SyncPhase::BeginCreateSnapshot, "")
            .await
    }

    pub(crate) fn is_incremental_sync(&self, sync_state: SyncState) -> bool {
        matches!(
            sync_state,
            SyncState::TableIncrementalSync
                | SyncState::DbIncrementalSync
                | SyncState::DbTablesIncrementalSync
        )
    }

    /// The destination transaction label: deterministic in the sync scope
    /// and commit sequence, salted so the server can tell attempts apart.
    pub(crate) fn transaction_label(
        &self,
        src: &ClusterSpec,
        dest: &ClusterSpec,
        commit_seq: i64,
    ) -> String {
        let salt = rand::random::<u16>();
        match self.sync_type {
            SyncType::DbSync => format!(
                "ccrj-{salt:x}:{}:{}:{}:{commit_seq}",
                self.sync_type, src.db_id, dest.db_id
            ),
            SyncType::TableSync => format!(
                "ccrj-{salt:x}:{}:{}_{}:{}_{}:{commit_seq}",
                self.sync_type, src.db_id, src.table_id, dest.db_id, dest.table_id
            ),
        }
    }

    async fn persist_job(&self, inner: &JobInner) -> Result<(), SyncError> {
        let definition = JobDefinition {
            name: self.name.clone(),
            sync_type: self.sync_type,
            src: inner.src.clone(),
            dest: inner.dest.clone(),
            skip_error: inner.skip_error,
            state: inner.state,
        };
        let body = serde_json::to_string(&definition)
            .map_err(|err| SyncError::wrap(err, ErrorCategory::Normal, "marshal job failed"))?;
        self.store.put_job(&self.name, &body).await
    }

    /// Persists the current job definition.
    pub async fn persist(&self) -> Result<(), SyncError> {
        let inner = self.inner.lock().await;
        self.persist_job(&inner).await
    }

    async fn job_state(&self) -> JobState {
        let inner = self.inner.lock().await;
        inner.state
    }

    async fn change_state(&self, state: JobState) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().await;
        if inner.state == state {
            debug!("job {} state is already {state}", self.name);
            return Ok(());
        }

        let origin = inner.state;
        inner.state = state;
        if let Err(err) = self.persist_job(&inner).await {
            inner.state = origin;
            return Err(err);
        }
        debug!("change job {} state from {origin} to {state}", self.name);
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), SyncError> {
        info!("pause job {}", self.name);
        self.change_state(JobState::Paused).await
    }

    pub async fn resume(&self) -> Result<(), SyncError> {
        info!("resume job {}", self.name);
        self.change_state(JobState::Running).await
    }

    pub async fn update_skip_error(&self, skip_error: bool) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().await;
        if inner.skip_error == skip_error {
            return Ok(());
        }

        inner.skip_error = skip_error;
        if let Err(err) = self.persist_job(&inner).await {
            inner.skip_error = !skip_error;
            return Err(err);
        }
        Ok(())
    }

    /// Stops the worker. In-memory only; the job row stays in the store.
    pub fn stop(&self) {
        self.shutdown.shutdown();
    }

    /// Marks the job deleted and stops the worker; the worker removes the
    /// stored row on its way out.
    pub fn delete(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.shutdown.shutdown();
    }

    async fn maybe_deleted(&self) -> bool {
        if !self.deleted.load(Ordering::SeqCst) {
            return false;
        }

        info!("job deleted, job: {}, removing stored row", self.name);
        if let Err(err) = self.store.remove_job(&self.name).await {
            error!("remove job failed, job: {}: {err:#}", self.name);
        }
        true
    }

    pub async fn status(&self) -> JobStatus {
        let inner = self.inner.lock().await;
        let progress_state = inner
            .progress
            .as_ref()
            .map(|progress| progress.sync_state().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        JobStatus {
            name: self.name.clone(),
            state: inner.state.to_string(),
            progress_state,
        }
    }

    /// How far the destination lags behind the source's binlog.
    pub async fn get_lag(&self) -> Result<i64, SyncError> {
        let inner = self.inner.lock().await;
        let progress = require_progress_ref(&inner)?;

        let frontend = self.factory.frontend(&inner.src)?;
        let resp = frontend
            .get_binlog_lag(&inner.src, progress.commit_seq())
            .await?;
        Ok(resp.lag)
    }

    /// Strips the synced marker from the destination so it becomes an
    /// ordinary writable database/table again.
    pub async fn desync(&self) -> Result<(), SyncError> {
        match self.sync_type {
            SyncType::DbSync => self.desync_db().await,
            SyncType::TableSync => self.desync_table().await,
        }
    }

    async fn desync_table(&self) -> Result<(), SyncError> {
        let inner = self.inner.lock().await;
        let table_name = self
            .dest_meta
            .get_table_name_by_id(inner.dest.table_id)
            .await?;

        let desync_sql = format!("ALTER TABLE {table_name} SET (\"is_being_synced\"=\"false\")");
        debug!("db exec: {desync_sql}");
        self.dest_ops.db_exec(&desync_sql).await.map_err(|err| {
            SyncError::wrap(
                err,
                ErrorCategory::Frontend,
                format!("failed tables: {table_name}"),
            )
        })
    }

    async fn desync_db(&self) -> Result<(), SyncError> {
        let _inner = self.inner.lock().await;

        let mut failed_tables = Vec::new();
        let tables = self.dest_meta.get_tables().await?;
        for table in tables {
            let desync_sql = format!(
                "ALTER TABLE {} SET (\"is_being_synced\"=\"false\")",
                table.name
            );
            debug!("db exec: {desync_sql}");
            if self.dest_ops.db_exec(&desync_sql).await.is_err() {
                failed_tables.push(table.name);
            }
        }

        if !failed_tables.is_empty() {
            return Err(SyncError::new(
                ErrorCategory::Frontend,
                format!("failed tables: {}", failed_tables.join(" ")),
            ));
        }
        Ok(())
    }
}

pub(crate) fn require_progress(inner: &mut JobInner) -> Result<&mut JobProgress, SyncError> {
    inner
        .progress
        .as_mut()
        .ok_or_else(|| SyncError::new(ErrorCategory::Normal, "job progress not initialized"))
}

fn require_progress_ref(inner: &JobInner) -> Result<&JobProgress, SyncError> {
    inner
        .progress
        .as_ref()
        .ok_or_else(|| SyncError::new(ErrorCategory::Normal, "job progress not initialized"))
}

/// Restore names are derived from the snapshot name plus the current second,
/// so re-restores of the same snapshot stay distinguishable.
pub(crate) fn restore_snapshot_name(snapshot_name: &str) -> String {
    if snapshot_name.is_empty() {
        return String::new();
    }

    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("{snapshot_name}_r_{seconds}")
}

pub(crate) fn is_txn_committed(status: &Status) -> bool {
    status
        .error_msgs
        .iter()
        .any(|msg| msg.contains("is already COMMITTED"))
}

pub(crate) fn is_txn_aborted(status: &Status) -> bool {
    status
        .error_msgs
        .iter()
        .any(|msg| msg.contains("is already aborted"))
}

pub(crate) fn is_txn_not_found(status: &Status) -> bool {
    status.error_msgs.iter().any(|msg| {
        msg.contains("transaction not found") || contains_bracketed_txn_not_found(msg)
    })
}

// Newer frontends answer "transaction [12356] not found".
fn contains_bracketed_txn_not_found(msg: &str) -> bool {
    let Some(start) = msg.find("transaction [") else {
        return false;
    };
    let rest = &msg[start + "transaction [".len()..];
    let Some(end) = rest.find(']') else {
        return false;
    };

    let digits = &rest[..end];
    !digits.is_empty()
        && digits.bytes().all(|byte| byte.is_ascii_digit())
        && rest[end + 1..].starts_with(" not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::StatusCode;

    #[test]
    fn restore_name_embeds_snapshot_name() {
        let name = restore_snapshot_name("snap_1");
        assert!(name.starts_with("snap_1_r_"));
        let suffix = &name["snap_1_r_".len()..];
        assert!(suffix.bytes().all(|byte| byte.is_ascii_digit()));

        assert_eq!(restore_snapshot_name(""), "");
    }

    #[test]
    fn committed_and_aborted_classifiers_match_messages() {
        let committed = Status::error(
            StatusCode::InternalError,
            "transaction [42] is already COMMITTED",
        );
        assert!(is_txn_committed(&committed));
        assert!(!is_txn_aborted(&committed));

        let aborted = Status::error(StatusCode::InternalError, "transaction is already aborted");
        assert!(is_txn_aborted(&aborted));
        assert!(!is_txn_committed(&aborted));
    }

    #[test]
    fn job_definition_round_trip_preserves_persisted_fields() {
        let spec = |host: &str, table_id: i64| ClusterSpec {
            host: host.to_string(),
            port: 9030,
            user: "root".to_string(),
            password: "pw".to_string(),
            database: "db1".to_string(),
            db_id: 7,
            table: "orders".to_string(),
            table_id,
            frontends: vec![],
        };
        let definition = JobDefinition {
            name: "j1".to_string(),
            sync_type: SyncType::TableSync,
            src: spec("src", 100),
            dest: spec("dest", 200),
            skip_error: true,
            state: JobState::Paused,
        };

        let encoded = serde_json::to_string(&definition).expect("encode");
        let decoded: JobDefinition = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.name, "j1");
        assert_eq!(decoded.sync_type, SyncType::TableSync);
        assert_eq!(decoded.state, JobState::Paused);
        assert!(decoded.skip_error);
        assert_eq!(decoded.src.table_id, 100);
        assert_eq!(decoded.dest.table_id, 200);
    }

    #[test]
    fn not_found_classifier_accepts_both_shapes() {
        let plain = Status::error(StatusCode::InternalError, "transaction not found");
        assert!(is_txn_not_found(&plain));

        let bracketed = Status::error(StatusCode::InternalError, "transaction [12356] not found");
        assert!(is_txn_not_found(&bracketed));

        let wrong = Status::error(StatusCode::InternalError, "transaction [x] not found");
        assert!(!is_txn_not_found(&wrong));

        let other = Status::error(StatusCode::InternalError, "some other failure");
        assert!(!is_txn_not_found(&other));
    }
}
