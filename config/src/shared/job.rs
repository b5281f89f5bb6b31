use serde::{Deserialize, Serialize};

use crate::shared::{EndpointConfig, ValidationError};

/// Configuration for a single replication job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// The unique name of the job.
    pub name: String,
    /// The cluster side the job reads binlogs from.
    pub source: EndpointConfig,
    /// The cluster side the job mirrors into.
    pub destination: EndpointConfig,
    /// Whether a poisonous binlog record is skipped instead of retried forever.
    #[serde(default)]
    pub skip_error: bool,
}

impl JobConfig {
    /// Validates the [`JobConfig`].
    ///
    /// Both endpoints must be valid and either both or neither may name a table.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.destination.validate()?;

        if self.source.table.is_empty() != self.destination.table.is_empty() {
            return Err(ValidationError::MixedJobScope(self.name.clone()));
        }

        Ok(())
    }
}
