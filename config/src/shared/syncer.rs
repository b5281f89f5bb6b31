use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::shared::{
    ClusterBackendConfig, JobConfig, StoreConfig, SyncTimingConfig, ValidationError,
};

/// Configuration for the syncer daemon.
///
/// This struct aggregates all configuration required to run the syncer:
/// the store backend, the cluster backend, worker timing, and the jobs to
/// start at boot.
///
/// The [`SyncerConfig`] is typically deserialized from a configuration file
/// and passed to the daemon at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncerConfig {
    /// Configuration for the store used to persist job definitions and progress.
    #[serde(default)]
    pub store: StoreConfig,
    /// Configuration for how clusters are reached.
    #[serde(default)]
    pub cluster: ClusterBackendConfig,
    /// Timing configuration shared by all job workers.
    #[serde(default)]
    pub sync: SyncTimingConfig,
    /// Jobs created at startup.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl SyncerConfig {
    /// Validates the loaded [`SyncerConfig`].
    ///
    /// Checks every job and rejects duplicate job names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(ValidationError::DuplicateJobName(job.name.clone()));
            }
        }

        Ok(())
    }
}
