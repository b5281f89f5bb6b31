use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ErrorCategory, SyncError};
use crate::storage::Store;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, String>,
    progresses: HashMap<String, String>,
}

/// An in-memory [`Store`]. Cloning shares the underlying maps, so a clone
/// handed to a rebuilt job sees everything the previous incarnation wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn job_exists(&self, name: &str) -> Result<bool, SyncError> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.contains_key(name))
    }

    async fn put_job(&self, name: &str, body: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(name.to_string(), body.to_string());
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<String, SyncError> {
        let inner = self.inner.read().await;
        inner.jobs.get(name).cloned().ok_or_else(|| {
            SyncError::new(ErrorCategory::Db, format!("job {name} not found in store"))
        })
    }

    async fn remove_job(&self, name: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        inner.jobs.remove(name);
        inner.progresses.remove(name);
        Ok(())
    }

    async fn progress_exists(&self, name: &str) -> Result<bool, SyncError> {
        let inner = self.inner.read().await;
        Ok(inner.progresses.contains_key(name))
    }

    async fn put_progress(&self, name: &str, body: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        inner.progresses.insert(name.to_string(), body.to_string());
        Ok(())
    }

    async fn get_progress(&self, name: &str) -> Result<String, SyncError> {
        let inner = self.inner.read().await;
        inner.progresses.get(name).cloned().ok_or_else(|| {
            SyncError::new(
                ErrorCategory::Db,
                format!("progress of job {name} not found in store"),
            )
        })
    }
}
