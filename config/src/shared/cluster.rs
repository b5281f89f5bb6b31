use serde::{Deserialize, Serialize};

/// Configuration options for how the syncer reaches clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBackendConfig {
    /// In-memory clusters for ephemeral or test data.
    Memory,
}

impl Default for ClusterBackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}
