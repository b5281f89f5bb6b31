//! The durable cursor of a job.
//!
//! Progress is a two-level state machine: a major [`SyncState`] and a
//! [`SubSyncState`] phase within it. Transitions either checkpoint (persist
//! the whole record atomically) or stay volatile (in-memory only); a crash
//! rewinds to the last checkpointed sub-state, which must be safe to
//! re-execute.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorCategory, SyncError};
use crate::record::TableRecord;
use crate::rpc::{BinlogType, SnapshotResponse, TabletCommitInfo};
use crate::storage::Store;

/// The major state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    DbFullSync,
    /// Streaming binlogs while per-table commit-seq floors from the bootstrap
    /// snapshot are still suppressing already-restored writes.
    DbTablesIncrementalSync,
    DbIncrementalSync,
    DbSpecificTableFullSync,
    TableFullSync,
    TableIncrementalSync,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::DbFullSync => "db_full_sync",
            SyncState::DbTablesIncrementalSync => "db_tables_incremental_sync",
            SyncState::DbIncrementalSync => "db_incremental_sync",
            SyncState::DbSpecificTableFullSync => "db_specific_table_full_sync",
            SyncState::TableFullSync => "table_full_sync",
            SyncState::TableIncrementalSync => "table_incremental_sync",
        };
        write!(f, "{name}")
    }
}

/// A phase within a major state. `Done` means no step is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Done,
    BeginCreateSnapshot,
    GetSnapshotInfo,
    AddExtraInfo,
    RestoreSnapshot,
    PersistRestoreInfo,
    BeginTransaction,
    IngestBinlog,
    CommitTransaction,
    RollbackTransaction,
}

/// The minor state: a phase tagged with the binlog type currently being
/// handled, so recovery knows which handler to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubSyncState {
    pub phase: SyncPhase,
    pub binlog_type: Option<BinlogType>,
}

impl SubSyncState {
    pub const DONE: SubSyncState = SubSyncState {
        phase: SyncPhase::Done,
        binlog_type: None,
    };
}

impl fmt::Display for SubSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.binlog_type {
            Some(binlog_type) => write!(f, "{:?}({binlog_type})", self.phase),
            None => write!(f, "{:?}", self.phase),
        }
    }
}

/// Volatile twin of the full-sync checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FullSyncMemory {
    pub snapshot_name: String,
    pub snapshot_resp: SnapshotResponse,
    pub table_commit_seq_map: HashMap<i64, i64>,
}

/// Volatile twin of the upsert checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpsertMemory {
    pub commit_seq: i64,
    #[serde(default)]
    pub txn_id: i64,
    pub dest_table_ids: Vec<i64>,
    pub table_records: Vec<TableRecord>,
    #[serde(default)]
    pub commit_infos: Vec<TabletCommitInfo>,
}

/// The decoded form of [`JobProgress::persist_data`]. Kept in sync with the
/// string by marshalling once on every checkpointed transition and decoding
/// lazily after a restart.
#[derive(Debug, Clone)]
pub enum InMemoryData {
    FullSync(FullSyncMemory),
    Upsert(UpsertMemory),
}

impl InMemoryData {
    fn to_persist_data(&self) -> Result<String, SyncError> {
        let encoded = match self {
            InMemoryData::FullSync(data) => serde_json::to_string(data),
            InMemoryData::Upsert(data) => serde_json::to_string(data),
        };
        encoded.map_err(|err| {
            SyncError::wrap(err, ErrorCategory::Normal, "marshal in-memory data failed")
        })
    }
}

/// The persisted shape of a job's progress, string-keyed by job name in the
/// store. Every checkpoint writes the whole record in one atomic put.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProgressRecord {
    pub name: String,
    pub sync_state: SyncState,
    pub sub_sync_state: SubSyncState,
    pub commit_seq: i64,
    #[serde(default)]
    pub persist_data: String,
    pub table_commit_seq_map: Option<HashMap<i64, i64>>,
    pub table_mapping: Option<HashMap<i64, i64>>,
}

/// A job's cursor plus the transition primitives the sync state machines run
/// on. Only ever mutated by the owning job worker (or an admin call holding
/// the job's lock).
pub struct JobProgress {
    store: Arc<dyn Store>,
    name: String,
    pub(crate) sync_state: SyncState,
    pub(crate) sub_sync_state: SubSyncState,
    pub(crate) commit_seq: i64,
    pub(crate) persist_data: String,
    /// Per-source-table commit-seq floor during a database bootstrap.
    pub(crate) table_commit_seq_map: Option<HashMap<i64, i64>>,
    /// Source table id to destination table id.
    pub(crate) table_mapping: Option<HashMap<i64, i64>>,
    pub(crate) in_memory: Option<InMemoryData>,
}

impl JobProgress {
    pub fn new(name: impl Into<String>, initial_state: SyncState, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            name: name.into(),
            sync_state: initial_state,
            sub_sync_state: SubSyncState::DONE,
            commit_seq: 0,
            persist_data: String::new(),
            table_commit_seq_map: None,
            table_mapping: None,
            in_memory: None,
        }
    }

    /// Loads the progress persisted under `name`.
    pub async fn from_store(name: &str, store: Arc<dyn Store>) -> Result<Self, SyncError> {
        let body = store.get_progress(name).await?;
        let record: ProgressRecord = serde_json::from_str(&body).map_err(|err| {
            SyncError::wrap(
                err,
                ErrorCategory::Normal,
                format!("unmarshal progress failed, body: {body}"),
            )
        })?;

        Ok(Self {
            store,
            name: record.name,
            sync_state: record.sync_state,
            sub_sync_state: record.sub_sync_state,
            commit_seq: record.commit_seq,
            persist_data: record.persist_data,
            table_commit_seq_map: record.table_commit_seq_map,
            table_mapping: record.table_mapping,
            in_memory: None,
        })
    }

    pub fn commit_seq(&self) -> i64 {
        self.commit_seq
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn sub_sync_state(&self) -> SubSyncState {
        self.sub_sync_state
    }

    /// No step is in flight. A binlog tag left by [`JobProgress::start_handle`]
    /// counts as in-flight so the dispatcher checkpoints the cursor once the
    /// handler finishes.
    pub fn is_done(&self) -> bool {
        self.sub_sync_state == SubSyncState::DONE
    }

    /// Called before dispatching a binlog: moves the cursor to the record and
    /// tags the sub-state with its type. Volatile.
    pub fn start_handle(&mut self, commit_seq: i64, binlog_type: BinlogType) {
        self.commit_seq = commit_seq;
        self.sub_sync_state.binlog_type = Some(binlog_type);
    }

    /// Advances the phase carrying new in-memory data, without persisting.
    /// A crash rewinds to the previous checkpointed phase.
    pub fn next_sub_volatile(&mut self, phase: SyncPhase, data: InMemoryData) {
        self.sub_sync_state.phase = phase;
        self.in_memory = Some(data);
    }

    /// Advances the phase and persists with the given opaque payload.
    pub async fn next_sub_checkpoint(
        &mut self,
        phase: SyncPhase,
        persist_data: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.sub_sync_state.phase = phase;
        self.persist_data = persist_data.into();
        self.persist().await
    }

    /// Advances the phase and persists the marshalled in-memory data,
    /// keeping both forms in sync.
    pub async fn next_sub_checkpoint_data(
        &mut self,
        phase: SyncPhase,
        data: InMemoryData,
    ) -> Result<(), SyncError> {
        self.persist_data = data.to_persist_data()?;
        self.in_memory = Some(data);
        self.sub_sync_state.phase = phase;
        self.persist().await
    }

    /// Moves the cursor and advances the phase in one atomic persist, so the
    /// cursor can never be observed ahead of the data it belongs to.
    pub async fn commit_next_sub_with_persist(
        &mut self,
        commit_seq: i64,
        phase: SyncPhase,
        data: InMemoryData,
    ) -> Result<(), SyncError> {
        self.commit_seq = commit_seq;
        self.next_sub_checkpoint_data(phase, data).await
    }

    /// Changes the major state, phase and cursor together and persists.
    pub async fn next_with_persist(
        &mut self,
        commit_seq: i64,
        sync_state: SyncState,
        phase: SyncPhase,
        persist_data: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.commit_seq = commit_seq;
        self.sync_state = sync_state;
        self.sub_sync_state = SubSyncState {
            phase,
            binlog_type: None,
        };
        self.persist_data = persist_data.into();
        self.in_memory = None;
        self.persist().await
    }

    /// Marks the in-flight step finished.
    pub async fn done(&mut self) -> Result<(), SyncError> {
        self.sub_sync_state = SubSyncState::DONE;
        self.in_memory = None;
        self.persist().await
    }

    /// Abandons the in-flight record. Without `skip_error` the cursor steps
    /// back to just before the record so the next fetch re-reads it; with
    /// `skip_error` the cursor stays on the record so the next fetch moves
    /// past it.
    pub async fn rollback(&mut self, skip_error: bool) -> Result<(), SyncError> {
        self.sub_sync_state = SubSyncState::DONE;
        self.in_memory = None;
        if !skip_error {
            self.commit_seq -= 1;
        }
        self.persist().await
    }

    /// Forces a write of the current record.
    pub async fn persist(&mut self) -> Result<(), SyncError> {
        let record = ProgressRecord {
            name: self.name.clone(),
            sync_state: self.sync_state,
            sub_sync_state: self.sub_sync_state,
            commit_seq: self.commit_seq,
            persist_data: self.persist_data.clone(),
            table_commit_seq_map: self.table_commit_seq_map.clone(),
            table_mapping: self.table_mapping.clone(),
        };
        let body = serde_json::to_string(&record).map_err(|err| {
            SyncError::wrap(err, ErrorCategory::Normal, "marshal progress failed")
        })?;

        self.store.put_progress(&self.name, &body).await
    }

    /// The full-sync payload, decoded from `persist_data` if a restart
    /// dropped the in-memory form.
    pub(crate) fn full_sync_memory(&mut self) -> Result<FullSyncMemory, SyncError> {
        if self.in_memory.is_none() {
            let decoded: FullSyncMemory =
                serde_json::from_str(&self.persist_data).map_err(|err| {
                    SyncError::wrap(
                        err,
                        ErrorCategory::Normal,
                        format!("unmarshal persist data failed: {}", self.persist_data),
                    )
                })?;
            self.in_memory = Some(InMemoryData::FullSync(decoded));
        }

        match &self.in_memory {
            Some(InMemoryData::FullSync(data)) => Ok(data.clone()),
            _ => Err(SyncError::new(
                ErrorCategory::Normal,
                "in-memory data is not a full-sync payload",
            )),
        }
    }

    /// The upsert payload, decoded from `persist_data` if a restart dropped
    /// the in-memory form.
    pub(crate) fn upsert_memory(&mut self) -> Result<UpsertMemory, SyncError> {
        if self.in_memory.is_none() {
            let decoded: UpsertMemory =
                serde_json::from_str(&self.persist_data).map_err(|err| {
                    SyncError::wrap(
                        err,
                        ErrorCategory::Normal,
                        format!("unmarshal persist data failed: {}", self.persist_data),
                    )
                })?;
            self.in_memory = Some(InMemoryData::Upsert(decoded));
        }

        match &self.in_memory {
            Some(InMemoryData::Upsert(data)) => Ok(data.clone()),
            _ => Err(SyncError::new(
                ErrorCategory::Normal,
                "in-memory data is not an upsert payload",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn progress(store: MemoryStore) -> JobProgress {
        JobProgress::new("j1", SyncState::TableFullSync, Arc::new(store))
    }

    async fn stored(store: &MemoryStore) -> ProgressRecord {
        let body = store.get_progress("j1").await.expect("progress stored");
        serde_json::from_str(&body).expect("progress decodes")
    }

    fn upsert_memory(commit_seq: i64) -> UpsertMemory {
        UpsertMemory {
            commit_seq,
            txn_id: 0,
            dest_table_ids: vec![11],
            table_records: vec![],
            commit_infos: vec![],
        }
    }

    #[tokio::test]
    async fn volatile_transitions_do_not_persist() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());
        progress.persist().await.expect("initial persist");

        progress.next_sub_volatile(
            SyncPhase::BeginTransaction,
            InMemoryData::Upsert(upsert_memory(10)),
        );

        // The store still has the initial record.
        assert_eq!(stored(&store).await.sub_sync_state.phase, SyncPhase::Done);
        assert_eq!(progress.sub_sync_state().phase, SyncPhase::BeginTransaction);
    }

    #[tokio::test]
    async fn checkpoint_persists_phase_and_payload() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());

        progress
            .next_sub_checkpoint(SyncPhase::GetSnapshotInfo, "snap_1")
            .await
            .expect("checkpoint");

        let record = stored(&store).await;
        assert_eq!(record.sub_sync_state.phase, SyncPhase::GetSnapshotInfo);
        assert_eq!(record.persist_data, "snap_1");
    }

    #[tokio::test]
    async fn commit_checkpoint_moves_cursor_atomically() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());

        progress
            .commit_next_sub_with_persist(
                80,
                SyncPhase::RestoreSnapshot,
                InMemoryData::Upsert(upsert_memory(80)),
            )
            .await
            .expect("checkpoint");

        let record = stored(&store).await;
        assert_eq!(record.commit_seq, 80);
        assert_eq!(record.sub_sync_state.phase, SyncPhase::RestoreSnapshot);
        let decoded: UpsertMemory = serde_json::from_str(&record.persist_data).expect("payload");
        assert_eq!(decoded.commit_seq, 80);
    }

    #[tokio::test]
    async fn rollback_without_skip_steps_cursor_back() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());
        progress.start_handle(701, BinlogType::Upsert);
        progress.next_sub_volatile(
            SyncPhase::RollbackTransaction,
            InMemoryData::Upsert(upsert_memory(701)),
        );

        progress.rollback(false).await.expect("rollback");

        assert!(progress.is_done());
        // The next fetch asks for records after 700 and re-reads 701.
        assert_eq!(progress.commit_seq(), 700);
    }

    #[tokio::test]
    async fn rollback_with_skip_leaves_cursor_on_record() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());
        progress.start_handle(701, BinlogType::Upsert);

        progress.rollback(true).await.expect("rollback");

        // The next fetch asks for records after 701; the poison record is
        // never retried.
        assert_eq!(progress.commit_seq(), 701);
    }

    #[tokio::test]
    async fn done_clears_binlog_tag() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());
        progress.start_handle(5, BinlogType::AddPartition);

        progress.done().await.expect("done");

        assert_eq!(progress.sub_sync_state(), SubSyncState::DONE);
        assert_eq!(stored(&store).await.sub_sync_state.binlog_type, None);
    }

    #[tokio::test]
    async fn upsert_payload_survives_restart() {
        let store = MemoryStore::new();
        let mut progress = progress(store.clone());
        let mut payload = upsert_memory(800);
        payload.txn_id = 42;
        progress
            .next_sub_checkpoint_data(SyncPhase::IngestBinlog, InMemoryData::Upsert(payload))
            .await
            .expect("checkpoint");

        // A restart reloads the record and decodes the payload lazily.
        let mut recovered = JobProgress::from_store("j1", Arc::new(store))
            .await
            .expect("recover");
        assert!(recovered.in_memory.is_none());
        let decoded = recovered.upsert_memory().expect("decode payload");
        assert_eq!(decoded.txn_id, 42);
        assert_eq!(decoded.commit_seq, 800);
        assert_eq!(decoded.dest_table_ids, vec![11]);
    }

    #[tokio::test]
    async fn record_round_trip_preserves_maps() {
        let record = ProgressRecord {
            name: "j1".to_string(),
            sync_state: SyncState::DbTablesIncrementalSync,
            sub_sync_state: SubSyncState {
                phase: SyncPhase::IngestBinlog,
                binlog_type: Some(BinlogType::Upsert),
            },
            commit_seq: 120,
            persist_data: "payload".to_string(),
            table_commit_seq_map: Some(HashMap::from([(1, 120), (2, 80)])),
            table_mapping: Some(HashMap::from([(1, 11), (2, 22)])),
        };

        let encoded = serde_json::to_string(&record).expect("encode");
        let decoded: ProgressRecord = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.sync_state, record.sync_state);
        assert_eq!(decoded.sub_sync_state, record.sub_sync_state);
        assert_eq!(decoded.commit_seq, 120);
        assert_eq!(decoded.table_commit_seq_map, record.table_commit_seq_map);
        assert_eq!(decoded.table_mapping, record.table_mapping);
    }
}
