//! The bootstrap pipeline: snapshot the source, enrich the snapshot's
//! `job_info`, restore it on the destination and record the table identity
//! mapping. Each phase is idempotent and ends in a checkpoint, so a crashed
//! job re-executes at most one phase.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::cluster::{ClusterFactory, ClusterMeta, ClusterOps};
use crate::error::{ErrorCategory, SyncError};
use crate::progress::{FullSyncMemory, InMemoryData, SyncPhase, SyncState};
use crate::rpc::{FrontendClient, TableRef};
use crate::spec::{ExtraInfo, NetworkAddr};

use super::{require_progress, restore_snapshot_name, Job, JobInner, SyncType};

impl Job {
    /// Drives the full-sync state machine until the incremental handoff.
    /// Phases advance within one tick as long as the involved I/O succeeds.
    pub(crate) async fn full_sync(&self, inner: &mut JobInner) -> Result<(), SyncError> {
        loop {
            let phase = require_progress(inner)?.sub_sync_state().phase;
            match phase {
                SyncPhase::Done => {
                    info!("fullsync status: done, job: {}", self.name());
                    let progress = require_progress(inner)?;
                    let commit_seq = progress.commit_seq();
                    self.new_snapshot(progress, commit_seq).await?;
                }

                SyncPhase::BeginCreateSnapshot => {
                    info!("fullsync status: create snapshot, job: {}", self.name());

                    let mut backup_table_list = Vec::new();
                    match self.sync_type() {
                        SyncType::DbSync => {
                            for table in self.src_meta.get_tables().await? {
                                backup_table_list.push(table.name);
                            }
                        }
                        SyncType::TableSync => backup_table_list.push(inner.src.table.clone()),
                    }

                    let snapshot_name = self
                        .src_ops
                        .create_snapshot_and_wait(&backup_table_list)
                        .await?;
                    require_progress(inner)?
                        .next_sub_checkpoint(SyncPhase::GetSnapshotInfo, snapshot_name)
                        .await?;
                }

                SyncPhase::GetSnapshotInfo => {
                    info!("fullsync status: get snapshot info, job: {}", self.name());

                    let snapshot_name = require_progress(inner)?.persist_data.clone();
                    let frontend = self.factory.frontend(&inner.src)?;

                    debug!("begin get snapshot {snapshot_name}");
                    let snapshot_resp = frontend.get_snapshot(&inner.src, &snapshot_name).await?;
                    if !snapshot_resp.status.is_ok() {
                        return Err(SyncError::new(
                            ErrorCategory::Frontend,
                            format!("get snapshot failed, status: {}", snapshot_resp.status),
                        ));
                    }
                    let Some(job_info) = snapshot_resp.job_info.as_deref() else {
                        return Err(SyncError::new(ErrorCategory::Normal, "job info is not set"));
                    };

                    let table_commit_seq_map = extract_table_commit_seq_map(job_info)?;
                    if self.sync_type() == SyncType::TableSync
                        && !table_commit_seq_map.contains_key(&inner.src.table_id)
                    {
                        return Err(SyncError::new(
                            ErrorCategory::Normal,
                            format!("table id {}, commit seq not found", inner.src.table_id),
                        ));
                    }

                    let data = FullSyncMemory {
                        snapshot_name,
                        snapshot_resp,
                        table_commit_seq_map,
                    };
                    require_progress(inner)?
                        .next_sub_volatile(SyncPhase::AddExtraInfo, InMemoryData::FullSync(data));
                }

                SyncPhase::AddExtraInfo => {
                    info!("fullsync status: add extra info, job: {}", self.name());

                    let mut data = require_progress(inner)?.full_sync_memory()?;
                    let Some(job_info) = data.snapshot_resp.job_info.as_deref() else {
                        return Err(SyncError::new(ErrorCategory::Normal, "job info is not set"));
                    };

                    let mut job_info_map: serde_json::Map<String, Value> =
                        serde_json::from_str(job_info).map_err(|err| {
                            SyncError::wrap(
                                err,
                                ErrorCategory::Normal,
                                format!("unmarshal job info failed, job info: {job_info}"),
                            )
                        })?;

                    let extra_info = self.gen_extra_info().await?;
                    debug!("extra info: {extra_info:?}");
                    let extra_info = serde_json::to_value(&extra_info).map_err(|err| {
                        SyncError::wrap(err, ErrorCategory::Normal, "marshal extra info failed")
                    })?;
                    job_info_map.insert("extra_info".to_string(), extra_info);

                    let rewritten =
                        serde_json::to_string(&job_info_map).map_err(|err| {
                            SyncError::wrap(err, ErrorCategory::Normal, "marshal job info failed")
                        })?;
                    data.snapshot_resp.job_info = Some(rewritten);

                    // The restore baseline: everything at or below this commit
                    // sequence is already inside the snapshot.
                    let commit_seq = match self.sync_type() {
                        SyncType::DbSync => {
                            let progress = require_progress(inner)?;
                            progress.table_commit_seq_map =
                                Some(data.table_commit_seq_map.clone());
                            data.table_commit_seq_map
                                .values()
                                .copied()
                                .min()
                                .unwrap_or(progress.commit_seq())
                        }
                        SyncType::TableSync => *data
                            .table_commit_seq_map
                            .get(&inner.src.table_id)
                            .ok_or_else(|| {
                                SyncError::new(
                                    ErrorCategory::Normal,
                                    format!("table id {}, commit seq not found", inner.src.table_id),
                                )
                            })?,
                    };

                    require_progress(inner)?
                        .commit_next_sub_with_persist(
                            commit_seq,
                            SyncPhase::RestoreSnapshot,
                            InMemoryData::FullSync(data),
                        )
                        .await?;
                }

                SyncPhase::RestoreSnapshot => {
                    info!("fullsync status: restore snapshot, job: {}", self.name());

                    let data = require_progress(inner)?.full_sync_memory()?;
                    let restore_name = restore_snapshot_name(&data.snapshot_name);

                    let mut table_refs = Vec::new();
                    if self.sync_type() == SyncType::TableSync && inner.src.table != inner.dest.table
                    {
                        debug!(
                            "restoring under a different table name, src: {}, dest: {}",
                            inner.src.table, inner.dest.table
                        );
                        table_refs.push(TableRef {
                            table: inner.src.table.clone(),
                            alias_name: inner.dest.table.clone(),
                        });
                    }

                    let frontend = self.factory.frontend(&inner.dest)?;
                    debug!(
                        "begin restore snapshot {} as {restore_name}",
                        data.snapshot_name
                    );
                    let restore_resp = frontend
                        .restore_snapshot(&inner.dest, &table_refs, &restore_name, &data.snapshot_resp)
                        .await?;
                    if !restore_resp.status.is_ok() {
                        return Err(SyncError::new(
                            ErrorCategory::Normal,
                            format!("restore snapshot failed, status: {}", restore_resp.status),
                        ));
                    }

                    let retry = &self.config.restore_check_retry;
                    let mut finished = false;
                    for attempt in 0..retry.max_attempts {
                        if self.dest_ops.check_restore_finished(&restore_name).await? {
                            finished = true;
                            break;
                        }
                        tokio::time::sleep(retry.calculate_delay(attempt)).await;
                    }
                    if !finished {
                        // Re-submitting the restore on a later tick is safe;
                        // the new restore runs under a fresh name.
                        return Err(SyncError::new(
                            ErrorCategory::Normal,
                            format!("restore {restore_name} not finished"),
                        ));
                    }

                    require_progress(inner)?
                        .next_sub_checkpoint(SyncPhase::PersistRestoreInfo, restore_name)
                        .await?;
                }

                SyncPhase::PersistRestoreInfo => {
                    info!("fullsync status: persist restore info, job: {}", self.name());

                    match self.sync_type() {
                        SyncType::DbSync => {
                            let src_table_ids: Vec<i64> = require_progress(inner)?
                                .table_commit_seq_map
                                .as_ref()
                                .map(|map| map.keys().copied().collect())
                                .unwrap_or_default();

                            let mut table_mapping = HashMap::new();
                            for src_table_id in src_table_ids {
                                let src_table_name =
                                    self.src_meta.get_table_name_by_id(src_table_id).await?;
                                let dest_table_id =
                                    self.dest_meta.get_table_id(&src_table_name).await?;
                                table_mapping.insert(src_table_id, dest_table_id);
                            }

                            let progress = require_progress(inner)?;
                            progress.table_mapping = Some(table_mapping);
                            let commit_seq = progress.commit_seq();
                            progress
                                .next_with_persist(
                                    commit_seq,
                                    SyncState::DbTablesIncrementalSync,
                                    SyncPhase::Done,
                                    "",
                                )
                                .await?;
                        }
                        SyncType::TableSync => {
                            // The restore created the destination table, so its
                            // id exists only now.
                            let dest_table =
                                self.dest_meta.update_table(&inner.dest.table).await?;
                            inner.dest.table_id = dest_table.id;
                            self.persist_job(inner).await?;

                            let progress = require_progress(inner)?;
                            progress.table_commit_seq_map = None;
                            progress.table_mapping = None;
                            let commit_seq = progress.commit_seq();
                            progress
                                .next_with_persist(
                                    commit_seq,
                                    SyncState::TableIncrementalSync,
                                    SyncPhase::Done,
                                    "",
                                )
                                .await?;
                        }
                    }

                    return Ok(());
                }

                other => {
                    return Err(SyncError::new(
                        ErrorCategory::Normal,
                        format!("invalid full sync phase: {other:?}"),
                    ));
                }
            }
        }
    }

    /// The backend map and master token the destination needs to pull tablet
    /// data directly from source backends.
    async fn gen_extra_info(&self) -> Result<ExtraInfo, SyncError> {
        let master_token = self.src_meta.get_master_token().await?;
        let backends = self.src_meta.get_backends().await?;
        debug!("found backends: {backends:?}");

        let mut be_network_map = HashMap::new();
        for backend in backends {
            be_network_map.insert(
                backend.id,
                NetworkAddr {
                    ip: backend.host,
                    port: backend.http_port,
                },
            );
        }

        Ok(ExtraInfo {
            be_network_map,
            token: master_token,
        })
    }
}

/// Pulls the per-table commit-seq floors out of a snapshot's `job_info`.
fn extract_table_commit_seq_map(job_info: &str) -> Result<HashMap<i64, i64>, SyncError> {
    let value: Value = serde_json::from_str(job_info).map_err(|err| {
        SyncError::wrap(
            err,
            ErrorCategory::Normal,
            format!("unmarshal job info failed, job info: {job_info}"),
        )
    })?;

    let Some(map) = value.get("table_commit_seq_map").and_then(Value::as_object) else {
        return Err(SyncError::new(
            ErrorCategory::Normal,
            "job info has no table_commit_seq_map",
        ));
    };

    let mut table_commit_seq_map = HashMap::new();
    for (table_id, commit_seq) in map {
        let table_id = table_id.parse::<i64>().map_err(|err| {
            SyncError::wrap(
                err,
                ErrorCategory::Normal,
                format!("invalid table id in job info: {table_id}"),
            )
        })?;
        let commit_seq = commit_seq.as_i64().ok_or_else(|| {
            SyncError::new(
                ErrorCategory::Normal,
                format!("invalid commit seq in job info for table {table_id}"),
            )
        })?;
        table_commit_seq_map.insert(table_id, commit_seq);
    }

    Ok(table_commit_seq_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_floors_from_job_info() {
        let job_info = r#"{"table_commit_seq_map": {"1": 120, "2": 80}, "other": "x"}"#;
        let map = extract_table_commit_seq_map(job_info).expect("extract");
        assert_eq!(map, HashMap::from([(1, 120), (2, 80)]));
    }

    #[test]
    fn rejects_job_info_without_floors() {
        assert!(extract_table_commit_seq_map(r#"{"other": "x"}"#).is_err());
        assert!(extract_table_commit_seq_map("not json").is_err());
    }
}
