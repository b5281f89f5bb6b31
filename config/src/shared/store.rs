use serde::{Deserialize, Serialize};

/// Configuration options for the store holding job definitions and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    /// The in-memory store.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}
