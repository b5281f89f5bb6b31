use async_trait::async_trait;

use crate::error::SyncError;
use crate::record::TableRecord;
use crate::rpc::TabletCommitInfo;
use crate::spec::ClusterSpec;

/// The tablet-copy sub-job.
///
/// Copies the binary data described by an upsert's table records from source
/// backends into destination backends under an open transaction. The call
/// blocks until every tablet is done (implementations parallelize internally)
/// and returns the commit infos the transaction commit needs.
#[async_trait]
pub trait BinlogIngestor: Send + Sync {
    async fn ingest(
        &self,
        src: &ClusterSpec,
        dest: &ClusterSpec,
        txn_id: i64,
        table_records: &[TableRecord],
        dest_table_ids: &[i64],
    ) -> Result<Vec<TabletCommitInfo>, SyncError>;
}
