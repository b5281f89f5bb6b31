//! The incremental engine: fetches binlog batches in commit-seq order and
//! routes every record through its handler. Upserts run a checkpointed
//! transaction state machine (begin / ingest / commit / rollback) that can
//! resume mid-flight after a restart.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterFactory, ClusterMeta, ClusterOps};
use crate::error::{ErrorCategory, SyncError};
use crate::ingest::BinlogIngestor;
use crate::progress::{InMemoryData, SyncPhase, SyncState, UpsertMemory};
use crate::record::{TableRecord, Upsert};
use crate::rpc::{Binlog, BinlogType, FrontendClient, StatusCode};

use super::{
    is_txn_aborted, is_txn_committed, is_txn_not_found, require_progress, Job, JobInner, SyncType,
};

impl Job {
    pub(crate) async fn incremental_sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        {
            let progress = require_progress(inner)?;
            if !progress.is_done() {
                info!(
                    "job progress is not done, state is ({}), need recover",
                    progress.sub_sync_state()
                );
                return self.recover_incremental_sync(inner).await;
            }
        }

        debug!("start incremental sync, job: {}", self.name());
        let frontend = self.factory.frontend(&inner.src)?;

        loop {
            let commit_seq = require_progress(inner)?.commit_seq();
            debug!("src: {}, commit seq: {commit_seq}", inner.src);

            let resp = frontend.get_binlog(&inner.src, commit_seq).await?;
            match resp.status.code {
                // Too-old means the source dropped history; the returned
                // records carry a dummy that forces a re-bootstrap.
                StatusCode::Ok | StatusCode::TooOldCommitSeq => {}
                StatusCode::TooNewCommitSeq => return Ok(()),
                StatusCode::BinlogDisabled => {
                    return Err(SyncError::new(ErrorCategory::Normal, "binlog is disabled"));
                }
                StatusCode::DbNotFound => {
                    return Err(SyncError::new(ErrorCategory::Normal, "can't find db"));
                }
                StatusCode::TableNotFound => {
                    return Err(SyncError::new(ErrorCategory::Normal, "can't find table"));
                }
                other => {
                    return Err(SyncError::new(
                        ErrorCategory::Normal,
                        format!("invalid binlog status type: {other:?}"),
                    ));
                }
            }

            if resp.binlogs.is_empty() {
                return Err(SyncError::new(
                    ErrorCategory::Normal,
                    format!("no binlog, but status code is: {:?}", resp.status.code),
                ));
            }

            if self.handle_binlogs(inner, &resp.binlogs).await? {
                return Ok(());
            }
        }
    }

    /// The job restarted mid-record. An in-flight upsert resumes from its
    /// checkpointed phase; an in-flight DDL is one-shot and simply re-read.
    async fn recover_incremental_sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        match require_progress(inner)?.sub_sync_state().binlog_type {
            Some(BinlogType::Upsert) => self.handle_upsert(inner, None).await,
            _ => {
                let skip_error = inner.skip_error;
                require_progress(inner)?.rollback(skip_error).await
            }
        }
    }

    /// Dispatches a batch in order. Returns `true` when a handler changed
    /// the major state and the run loop must revisit the dispatcher.
    async fn handle_binlogs(
        &self,
        inner: &mut JobInner,
        binlogs: &[Binlog],
    ) -> Result<bool, SyncError> {
        info!("handle binlogs, binlogs size: {}", binlogs.len());

        for binlog in binlogs {
            self.handle_binlog(inner, binlog).await?;

            // Once every bootstrap floor is at or below the stream position
            // the suppression map has done its job, exactly once.
            let progress = require_progress(inner)?;
            if self.sync_type() == SyncType::DbSync {
                if let Some(map) = &progress.table_commit_seq_map {
                    let reached = map.values().all(|&floor| floor <= binlog.commit_seq);
                    if reached {
                        progress.table_commit_seq_map = None;
                        let commit_seq = progress.commit_seq();
                        progress
                            .next_with_persist(
                                commit_seq,
                                SyncState::DbIncrementalSync,
                                SyncPhase::Done,
                                "",
                            )
                            .await?;
                    }
                }
            }

            let progress = require_progress(inner)?;
            if !progress.is_done() {
                progress.done().await?;
            }

            let sync_state = require_progress(inner)?.sync_state();
            if !self.is_incremental_sync(sync_state) {
                debug!("job state is not incremental sync, back to run loop, state: {sync_state}");
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn handle_binlog(&self, inner: &mut JobInner, binlog: &Binlog) -> Result<(), SyncError> {
        debug!(
            "binlog type: {}, commit seq: {}",
            binlog.binlog_type, binlog.commit_seq
        );
        require_progress(inner)?.start_handle(binlog.commit_seq, binlog.binlog_type);

        match binlog.binlog_type {
            BinlogType::Upsert => self.handle_upsert(inner, Some(binlog)).await,
            BinlogType::AddPartition => self.handle_add_partition(inner, binlog).await,
            BinlogType::CreateTable => self.handle_create_table(inner, binlog).await,
            BinlogType::DropPartition => self.handle_drop_partition(inner, binlog).await,
            BinlogType::DropTable => self.handle_drop_table(inner, binlog).await,
            BinlogType::AlterJob => self.handle_alter_job(inner, binlog).await,
            BinlogType::ModifyTableAddOrDropColumns => {
                self.handle_schema_change(inner, binlog).await
            }
            BinlogType::Dummy => self.handle_dummy(inner, binlog).await,
            BinlogType::TruncateTable => self.handle_truncate_table(inner, binlog).await,
            BinlogType::AlterDatabaseProperty => {
                info!("handle alter database property binlog, ignore it");
                Ok(())
            }
            BinlogType::ModifyTableProperty => {
                info!("handle modify table property binlog, ignore it");
                Ok(())
            }
            BinlogType::Barrier => {
                info!("handle barrier binlog, ignore it");
                Ok(())
            }
        }
    }

    /// The upsert transaction machine. `binlog` is `None` when resuming after
    /// a restart; the checkpointed payload then carries everything needed.
    pub(crate) async fn handle_upsert(
        &self,
        inner: &mut JobInner,
        binlog: Option<&Binlog>,
    ) -> Result<(), SyncError> {
        info!(
            "handle upsert binlog, sub sync state: {}",
            require_progress(inner)?.sub_sync_state()
        );

        loop {
            let phase = require_progress(inner)?.sub_sync_state().phase;
            match phase {
                SyncPhase::Done => {
                    let Some(binlog) = binlog else {
                        warn!("handle nil upsert binlog");
                        return Ok(());
                    };

                    let upsert = Upsert::from_json(&binlog.data)?;
                    debug!("upsert: {upsert:?}");

                    let table_records = self.related_table_records(inner, &upsert)?;
                    if table_records.is_empty() {
                        debug!("no related table records");
                        return Ok(());
                    }

                    let mut dest_table_ids = Vec::with_capacity(table_records.len());
                    match self.sync_type() {
                        SyncType::DbSync => {
                            for record in &table_records {
                                dest_table_ids
                                    .push(self.dest_table_id_for_src(inner, record.id).await?);
                            }
                        }
                        SyncType::TableSync => dest_table_ids.push(inner.dest.table_id),
                    }

                    let data = UpsertMemory {
                        commit_seq: upsert.commit_seq,
                        txn_id: 0,
                        dest_table_ids,
                        table_records,
                        commit_infos: vec![],
                    };
                    require_progress(inner)?
                        .next_sub_volatile(SyncPhase::BeginTransaction, InMemoryData::Upsert(data));
                }

                SyncPhase::BeginTransaction => {
                    let mut data = require_progress(inner)?.upsert_memory()?;
                    debug!("begin txn, dest: {}, commit seq: {}", inner.dest, data.commit_seq);

                    let frontend = self.factory.frontend(&inner.dest)?;
                    let label = self.transaction_label(&inner.src, &inner.dest, data.commit_seq);
                    let resp = frontend
                        .begin_transaction(&inner.dest, &label, &data.dest_table_ids)
                        .await?;
                    if !resp.status.is_ok() {
                        return Err(SyncError::new(
                            ErrorCategory::Normal,
                            format!("begin txn failed, status: {}", resp.status),
                        ));
                    }
                    debug!("txn id: {}, db id: {}", resp.txn_id, resp.db_id);

                    // From here on the txn id is durable; a crash resumes the
                    // same transaction instead of beginning a new one.
                    data.txn_id = resp.txn_id;
                    require_progress(inner)?
                        .next_sub_checkpoint_data(SyncPhase::IngestBinlog, InMemoryData::Upsert(data))
                        .await?;
                }

                SyncPhase::IngestBinlog => {
                    debug!("ingest binlog");
                    let mut data = require_progress(inner)?.upsert_memory()?;

                    match self
                        .ingestor
                        .ingest(
                            &inner.src,
                            &inner.dest,
                            data.txn_id,
                            &data.table_records,
                            &data.dest_table_ids,
                        )
                        .await
                    {
                        Err(err) => {
                            warn!("ingest failed, need rollback, txn id: {}: {err:#}", data.txn_id);
                            require_progress(inner)?
                                .next_sub_checkpoint_data(
                                    SyncPhase::RollbackTransaction,
                                    InMemoryData::Upsert(data),
                                )
                                .await?;
                        }
                        Ok(commit_infos) => {
                            debug!("commit infos: {commit_infos:?}");
                            data.commit_infos = commit_infos;
                            require_progress(inner)?
                                .next_sub_checkpoint_data(
                                    SyncPhase::CommitTransaction,
                                    InMemoryData::Upsert(data),
                                )
                                .await?;
                        }
                    }
                }

                SyncPhase::CommitTransaction => {
                    debug!("commit txn");
                    let data = require_progress(inner)?.upsert_memory()?;

                    let resp = match self.factory.frontend(&inner.dest) {
                        Ok(frontend) => {
                            frontend
                                .commit_transaction(&inner.dest, data.txn_id, &data.commit_infos)
                                .await
                        }
                        Err(err) => Err(err),
                    };
                    let resp = match resp {
                        Ok(resp) => resp,
                        Err(err) => {
                            warn!("commit failed, need rollback, txn id: {}: {err:#}", data.txn_id);
                            require_progress(inner)?
                                .next_sub_checkpoint_data(
                                    SyncPhase::RollbackTransaction,
                                    InMemoryData::Upsert(data),
                                )
                                .await?;
                            continue;
                        }
                    };

                    match resp.status.code {
                        StatusCode::Ok => {}
                        StatusCode::PublishTimeout => {
                            // The commit landed; only publishing to replicas is
                            // slow. Wait it out instead of rolling back.
                            self.dest_ops.wait_transaction_done(data.txn_id).await?;
                        }
                        _ => {
                            warn!("commit txn failed, status: {}", resp.status);
                            require_progress(inner)?
                                .next_sub_checkpoint_data(
                                    SyncPhase::RollbackTransaction,
                                    InMemoryData::Upsert(data),
                                )
                                .await?;
                            continue;
                        }
                    }

                    info!("txn id: {} committed", data.txn_id);
                    self.upsert_committed(inner).await?;
                    return Ok(());
                }

                SyncPhase::RollbackTransaction => {
                    debug!("rollback txn");
                    let data = require_progress(inner)?.upsert_memory()?;

                    let frontend = self.factory.frontend(&inner.dest)?;
                    let resp = frontend.rollback_transaction(&inner.dest, data.txn_id).await?;
                    if !resp.status.is_ok() {
                        if is_txn_not_found(&resp.status) {
                            warn!("txn not found, txn id: {}", data.txn_id);
                        } else if is_txn_aborted(&resp.status) {
                            info!("txn already aborted, txn id: {}", data.txn_id);
                        } else if is_txn_committed(&resp.status) {
                            info!("txn already committed, txn id: {}", data.txn_id);
                            self.upsert_committed(inner).await?;
                            return Ok(());
                        } else {
                            return Err(SyncError::new(
                                ErrorCategory::Normal,
                                format!("rollback txn failed, status: {}", resp.status),
                            ));
                        }
                    }

                    info!("rollback txn id: {} done", data.txn_id);
                    let skip_error = inner.skip_error;
                    require_progress(inner)?.rollback(skip_error).await?;
                    return Ok(());
                }

                other => {
                    return Err(SyncError::new(
                        ErrorCategory::Normal,
                        format!("invalid upsert phase: {other:?}"),
                    ));
                }
            }
        }
    }

    /// After a commit: lift the bootstrap floor of every table the record
    /// touched, then mark the step done.
    async fn upsert_committed(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        let progress = require_progress(inner)?;
        info!("txn committed, commit seq: {}, cleanup", progress.commit_seq());

        let data = progress.upsert_memory()?;
        let commit_seq = progress.commit_seq();
        if self.sync_type() == SyncType::DbSync && progress.table_commit_seq_map.is_some() {
            if let Some(map) = progress.table_commit_seq_map.as_mut() {
                for record in &data.table_records {
                    if let Some(floor) = map.get_mut(&record.id) {
                        if *floor < commit_seq {
                            *floor = commit_seq;
                        }
                    }
                }
            }
            progress.persist().await?;
        }

        progress.done().await
    }

    /// The slice of an upsert this job must apply.
    fn related_table_records(
        &self,
        inner: &mut JobInner,
        upsert: &Upsert,
    ) -> Result<Vec<TableRecord>, SyncError> {
        match self.sync_type() {
            SyncType::DbSync => {
                let progress = require_progress(inner)?;
                let mut records = Vec::with_capacity(upsert.table_records.len());
                for (table_id, record) in &upsert.table_records {
                    match progress.table_commit_seq_map.as_ref() {
                        None => records.push(record.clone()),
                        Some(map) => match map.get(table_id) {
                            // The restore already contains this write.
                            Some(&floor) if upsert.commit_seq <= floor => {}
                            Some(_) => records.push(record.clone()),
                            // Unknown during bootstrap: created after the
                            // snapshot, picked up via its create-table record.
                            None => {}
                        },
                    }
                }
                Ok(records)
            }
            SyncType::TableSync => {
                let record = upsert
                    .table_records
                    .get(&inner.src.table_id)
                    .ok_or_else(|| {
                        SyncError::new(
                            ErrorCategory::Normal,
                            format!("table record not found, table: {}", inner.src.table),
                        )
                    })?;
                Ok(vec![record.clone()])
            }
        }
    }

    /// Resolves a source table id through the mapping, populating it lazily
    /// from both metas on a miss. Db-sync only; table-sync ids live in the
    /// specs.
    pub(crate) async fn dest_table_id_for_src(
        &self,
        inner: &mut JobInner,
        src_table_id: i64,
    ) -> Result<i64, SyncError> {
        {
            let progress = require_progress(inner)?;
            match progress.table_mapping.as_ref() {
                Some(mapping) => {
                    if let Some(&dest_table_id) = mapping.get(&src_table_id) {
                        return Ok(dest_table_id);
                    }
                    warn!("table mapping not found, src table id: {src_table_id}");
                }
                None => {
                    warn!("table mapping not found, src table id: {src_table_id}");
                    progress.table_mapping = Some(HashMap::new());
                }
            }
        }

        let src_table_name = self.src_meta.get_table_name_by_id(src_table_id).await?;
        let dest_table_id = self.dest_meta.get_table_id(&src_table_name).await?;
        if let Some(mapping) = require_progress(inner)?.table_mapping.as_mut() {
            mapping.insert(src_table_id, dest_table_id);
        }
        Ok(dest_table_id)
    }
}
