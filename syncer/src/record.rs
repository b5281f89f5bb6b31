//! Typed views over binlog record payloads.
//!
//! Each binlog carries a JSON body whose shape depends on the record type;
//! the structs here mirror the source cluster's field names (camelCase on the
//! wire) and expose the handful of helpers the handlers need.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ErrorCategory, SyncError};

fn parse<T: for<'de> Deserialize<'de>>(kind: &str, data: &str) -> Result<T, SyncError> {
    serde_json::from_str(data).map_err(|err| {
        SyncError::wrap(
            err,
            ErrorCategory::Normal,
            format!("unmarshal {kind} record failed, data: {data}"),
        )
    })
}

/// Committed row data for one or more tables at a single commit sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upsert {
    pub commit_seq: i64,
    pub table_records: HashMap<i64, TableRecord>,
}

impl Upsert {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("upsert", data)
    }
}

/// The per-table slice of an upsert, consumed opaquely by the tablet ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRecord {
    pub id: i64,
    #[serde(default)]
    pub partition_records: Vec<PartitionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRecord {
    pub partition_id: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPartition {
    pub table_id: i64,
    pub sql: String,
}

impl AddPartition {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("add partition", data)
    }

    /// The partition clause applied to the destination's table name.
    pub fn to_sql(&self, dest_table_name: &str) -> String {
        format!("ALTER TABLE {} {}", dest_table_name, self.sql)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPartition {
    pub table_id: i64,
    pub sql: String,
}

impl DropPartition {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("drop partition", data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTable {
    pub table_id: i64,
    pub sql: String,
}

impl CreateTable {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("create table", data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTable {
    pub table_id: i64,
    /// Missing on records written by old source versions; the handler falls
    /// back to the last known table list.
    #[serde(default)]
    pub table_name: String,
}

impl DropTable {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("drop table", data)
    }
}

/// Progress of a source-side schema-change job. Only the finished state is
/// acted upon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterJob {
    pub table_id: i64,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub job_state: String,
}

impl AlterJob {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("alter job", data)
    }

    pub fn is_finished(&self) -> bool {
        self.job_state == "FINISHED"
    }
}

/// Lightweight schema change: a raw ALTER statement qualified with the source
/// database name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChange {
    pub table_id: i64,
    pub raw_sql: String,
}

impl SchemaChange {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("schema change", data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncateTable {
    pub table_id: i64,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub raw_sql: String,
}

impl TruncateTable {
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        parse("truncate table", data)
    }
}
