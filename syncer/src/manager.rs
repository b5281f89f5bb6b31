use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cluster::ClusterFactory;
use crate::config::SyncConfig;
use crate::error::{ErrorCategory, SyncError};
use crate::job::{Job, JobStatus};
use crate::spec::ClusterSpec;
use crate::storage::Store;

struct JobHandle {
    job: Arc<Job>,
    worker: JoinHandle<()>,
}

/// Owns every job of the process as a name-to-job map and one worker task
/// per job. Admin entry points delegate to the job, which serializes them
/// with its sync ticks.
pub struct JobManager {
    store: Arc<dyn Store>,
    factory: Arc<dyn ClusterFactory>,
    config: SyncConfig,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn Store>,
        factory: Arc<dyn ClusterFactory>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            factory,
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Validates a new job, runs its first-run checks, persists it and
    /// schedules its worker. Any failure leaves nothing behind.
    pub async fn create_job(
        &self,
        name: impl Into<String>,
        src: ClusterSpec,
        dest: ClusterSpec,
        skip_error: bool,
    ) -> Result<Arc<Job>, SyncError> {
        let job = Job::new(
            name,
            src,
            dest,
            skip_error,
            self.store.clone(),
            self.factory.clone(),
            self.config.clone(),
        )
        .await?;
        job.first_run().await?;
        job.persist().await?;

        let job = Arc::new(job);
        let worker = tokio::spawn({
            let job = Arc::clone(&job);
            async move {
                if let Err(err) = job.run().await {
                    error!("job worker exited with error, job: {}: {err:#}", job.name());
                }
            }
        });

        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job.name().to_string(),
            JobHandle {
                job: Arc::clone(&job),
                worker,
            },
        );
        info!("job {} created", job.name());
        Ok(job)
    }

    pub async fn get_job(&self, name: &str) -> Result<Arc<Job>, SyncError> {
        let jobs = self.jobs.read().await;
        jobs.get(name)
            .map(|handle| Arc::clone(&handle.job))
            .ok_or_else(|| SyncError::new(ErrorCategory::Normal, format!("job {name} not found")))
    }

    pub async fn pause_job(&self, name: &str) -> Result<(), SyncError> {
        self.get_job(name).await?.pause().await
    }

    pub async fn resume_job(&self, name: &str) -> Result<(), SyncError> {
        self.get_job(name).await?.resume().await
    }

    pub async fn update_skip_error(&self, name: &str, skip_error: bool) -> Result<(), SyncError> {
        self.get_job(name).await?.update_skip_error(skip_error).await
    }

    pub async fn job_status(&self, name: &str) -> Result<JobStatus, SyncError> {
        Ok(self.get_job(name).await?.status().await)
    }

    pub async fn get_lag(&self, name: &str) -> Result<i64, SyncError> {
        self.get_job(name).await?.get_lag().await
    }

    /// Marks the job deleted and waits for its worker, which removes the
    /// stored row on its way out.
    pub async fn delete_job(&self, name: &str) -> Result<(), SyncError> {
        let handle = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(name)
        };
        let Some(handle) = handle else {
            return Err(SyncError::new(
                ErrorCategory::Normal,
                format!("job {name} not found"),
            ));
        };

        handle.job.delete();
        if handle.worker.await.is_err() {
            warn!("job worker paniced while shutting down, job: {name}");
        }
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        let jobs: Vec<Arc<Job>> = {
            let jobs = self.jobs.read().await;
            jobs.values().map(|handle| Arc::clone(&handle.job)).collect()
        };

        let mut statuses = Vec::with_capacity(jobs.len());
        for job in jobs {
            statuses.push(job.status().await);
        }
        statuses
    }

    /// Stops every worker and waits for them to exit. Job rows stay in the
    /// store, so the jobs resume on the next boot.
    pub async fn stop_all(&self) {
        let handles: Vec<JobHandle> = {
            let mut jobs = self.jobs.write().await;
            jobs.drain().map(|(_, handle)| handle).collect()
        };

        for handle in handles {
            handle.job.stop();
            if handle.worker.await.is_err() {
                warn!(
                    "job worker paniced while shutting down, job: {}",
                    handle.job.name()
                );
            }
        }
    }
}
