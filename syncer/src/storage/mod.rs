pub mod memory;

use async_trait::async_trait;

use crate::error::SyncError;

/// Durable storage for job definitions and progress blobs, keyed by job name.
///
/// Every write must be atomic: a single durable put per call. The store is
/// process-wide and thread-safe; each blob is only ever written by its own
/// job worker or an admin call holding the job's lock.
#[async_trait]
pub trait Store: Send + Sync {
    async fn job_exists(&self, name: &str) -> Result<bool, SyncError>;

    async fn put_job(&self, name: &str, body: &str) -> Result<(), SyncError>;

    async fn get_job(&self, name: &str) -> Result<String, SyncError>;

    /// Removes the job and its progress.
    async fn remove_job(&self, name: &str) -> Result<(), SyncError>;

    async fn progress_exists(&self, name: &str) -> Result<bool, SyncError>;

    async fn put_progress(&self, name: &str, body: &str) -> Result<(), SyncError>;

    async fn get_progress(&self, name: &str) -> Result<String, SyncError>;
}
