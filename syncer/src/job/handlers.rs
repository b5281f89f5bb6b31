//! Handlers for the non-upsert binlog record types: partition and table DDL
//! replay, light schema changes, truncates, and the records that force a
//! fresh bootstrap.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::cluster::{ClusterMeta, ClusterOps};
use crate::error::{ErrorCategory, SyncError};
use crate::record::{
    AddPartition, AlterJob, CreateTable, DropPartition, DropTable, SchemaChange, TruncateTable,
};
use crate::rpc::Binlog;

use super::{require_progress, Job, JobInner, SyncType};

impl Job {
    pub(crate) async fn handle_add_partition(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle add partition binlog");

        let add_partition = AddPartition::from_json(&binlog.data)?;

        let dest_table_name = match self.sync_type() {
            SyncType::TableSync => inner.dest.table.clone(),
            SyncType::DbSync => {
                let dest_table_id = self
                    .dest_table_id_for_src(inner, add_partition.table_id)
                    .await?;
                let name = self.dest_meta.get_table_name_by_id(dest_table_id).await?;
                if name.is_empty() {
                    return Err(SyncError::new(
                        ErrorCategory::Normal,
                        format!("table id {dest_table_id} not found in dest meta"),
                    ));
                }
                name
            }
        };

        let sql = add_partition.to_sql(&dest_table_name);
        info!("add partition sql: {sql}");
        self.dest_ops.db_exec(&sql).await
    }

    pub(crate) async fn handle_drop_partition(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle drop partition binlog");

        let drop_partition = DropPartition::from_json(&binlog.data)?;

        let dest_table_name = match self.sync_type() {
            SyncType::TableSync => inner.dest.table.clone(),
            SyncType::DbSync => {
                let dest_table_id = self
                    .dest_table_id_for_src(inner, drop_partition.table_id)
                    .await?;
                let name = self.dest_meta.get_table_name_by_id(dest_table_id).await?;
                if name.is_empty() {
                    return Err(SyncError::new(
                        ErrorCategory::Normal,
                        format!("table id {dest_table_id} not found in dest meta"),
                    ));
                }
                name
            }
        };

        let sql = format!(
            "ALTER TABLE {}.{} {}",
            inner.dest.database, dest_table_name, drop_partition.sql
        );
        info!("drop partition sql: {sql}");
        self.dest_ops.exec(&sql).await
    }

    pub(crate) async fn handle_create_table(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle create table binlog");

        if self.sync_type() != SyncType::DbSync {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("invalid sync type: {}", self.sync_type()),
            ));
        }

        let create_table = CreateTable::from_json(&binlog.data)?;
        info!("create table sql: {}", create_table.sql);
        self.dest_ops.db_exec(&create_table.sql).await?;

        let _ = self.src_meta.get_tables().await;
        let _ = self.dest_meta.get_tables().await;

        let src_table_name = self
            .src_meta
            .get_table_name_by_id(create_table.table_id)
            .await?;
        let dest_table_id = self.dest_meta.get_table_id(&src_table_name).await?;

        let progress = require_progress(inner)?;
        progress
            .table_mapping
            .get_or_insert_with(HashMap::new)
            .insert(create_table.table_id, dest_table_id);
        progress.done().await
    }

    pub(crate) async fn handle_drop_table(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle drop table binlog");

        if self.sync_type() != SyncType::DbSync {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("invalid sync type: {}", self.sync_type()),
            ));
        }

        let drop_table = DropTable::from_json(&binlog.data)?;

        let mut table_name = drop_table.table_name.clone();
        if table_name.is_empty() {
            // Records written by old sources omit the name and the source has
            // already dropped the table, so only the stale cache knows it.
            let dirty_tables = self.src_meta.dirty_get_tables().await;
            let Some(table) = dirty_tables.get(&drop_table.table_id) else {
                return Err(SyncError::new(
                    ErrorCategory::Normal,
                    format!("table not found, table id: {}", drop_table.table_id),
                ));
            };
            table_name = table.name.clone();
        }

        let sql = format!("DROP TABLE {table_name} FORCE");
        info!("drop table sql: {sql}");
        self.dest_ops.db_exec(&sql).await?;

        let _ = self.src_meta.get_tables().await;
        let _ = self.dest_meta.get_tables().await;

        let progress = require_progress(inner)?;
        let mapped = match progress.table_mapping.as_mut() {
            Some(mapping) => {
                mapping.remove(&drop_table.table_id);
                true
            }
            None => false,
        };
        if mapped {
            progress.done().await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_dummy(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!(
            "handle dummy binlog, need full sync, seq: {}",
            binlog.commit_seq
        );

        let progress = require_progress(inner)?;
        self.new_snapshot(progress, binlog.commit_seq).await
    }

    pub(crate) async fn handle_alter_job(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle alter job binlog");

        let alter_job = AlterJob::from_json(&binlog.data)?;
        if alter_job.table_name.is_empty() {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                "invalid alter job, table name is empty",
            ));
        }
        if !alter_job.is_finished() {
            return Ok(());
        }

        // The schema-changed table is rebuilt from a fresh snapshot; the old
        // destination copy has to go first, and nothing else can proceed
        // until it does.
        let drop_table_sql = match self.sync_type() {
            SyncType::TableSync => format!("DROP TABLE {} FORCE", inner.dest.table),
            SyncType::DbSync => format!("DROP TABLE {} FORCE", alter_job.table_name),
        };
        loop {
            info!("drop table sql: {drop_table_sql}");
            match self.dest_ops.db_exec(&drop_table_sql).await {
                Ok(()) => break,
                Err(err) => {
                    warn!("drop table before re-snapshot failed, retrying: {err:#}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        let progress = require_progress(inner)?;
        let commit_seq = progress.commit_seq();
        self.new_snapshot(progress, commit_seq).await
    }

    pub(crate) async fn handle_schema_change(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle light schema change binlog");

        let schema_change = SchemaChange::from_json(&binlog.data)?;

        // The raw statement arrives qualified with the source database, as
        // `default_cluster:<db>`.`t` or `<db>`.`t`; the destination database
        // differs, so the qualifier is stripped.
        let raw_sql = &schema_change.raw_sql;
        let clustered = format!("`default_cluster:{}`.", inner.src.database);
        let plain = format!("`{}`.", inner.src.database);
        let sql = if raw_sql.contains(&clustered) {
            raw_sql.replacen(&clustered, "", 1)
        } else {
            raw_sql.replacen(&plain, "", 1)
        };

        info!("schema change sql, raw sql: {raw_sql}, sql: {sql}");
        self.dest_ops.db_exec(&sql).await
    }

    pub(crate) async fn handle_truncate_table(
        &self,
        inner: &mut JobInner,
        binlog: &Binlog,
    ) -> Result<(), SyncError> {
        info!("handle truncate table binlog");

        let truncate = TruncateTable::from_json(&binlog.data)?;

        let dest_table_name = match self.sync_type() {
            SyncType::DbSync => truncate.table_name.clone(),
            SyncType::TableSync => inner.dest.table.clone(),
        };

        let sql = if truncate.raw_sql.is_empty() {
            format!("TRUNCATE TABLE {dest_table_name}")
        } else {
            format!("TRUNCATE TABLE {dest_table_name} {}", truncate.raw_sql)
        };
        info!("truncate table sql: {sql}");
        self.dest_ops.db_exec(&sql).await?;

        // The truncated table keeps its id but not its partitions; both
        // cached entries are stale now.
        if let Ok(src_table_name) = self.src_meta.get_table_name_by_id(truncate.table_id).await {
            self.src_meta
                .clear_table(&inner.src.database, &src_table_name)
                .await;
        }
        self.dest_meta
            .clear_table(&inner.dest.database, &dest_table_name)
            .await;

        Ok(())
    }
}
