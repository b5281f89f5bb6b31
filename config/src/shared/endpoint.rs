use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shared::ValidationError;

/// Configuration for one side of a replication: a cluster frontend endpoint
/// plus the database (and optionally the table) to mirror.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EndpointConfig {
    /// Hostname or IP address of a cluster frontend.
    pub host: String,
    /// Port the frontend service listens on.
    pub port: u16,
    /// Username for authenticating with the cluster.
    pub user: String,
    /// Password for the specified user. This field is sensitive and redacted in debug output.
    pub password: String,
    /// Name of the database to replicate.
    pub database: String,
    /// Name of the table to replicate. Empty means the whole database.
    #[serde(default)]
    pub table: String,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"REDACTED")
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

impl EndpointConfig {
    /// Validates the [`EndpointConfig`].
    ///
    /// Host, user and database must be set; table is optional.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::MissingEndpointField("host"));
        }
        if self.user.is_empty() {
            return Err(ValidationError::MissingEndpointField("user"));
        }
        if self.database.is_empty() {
            return Err(ValidationError::MissingEndpointField("database"));
        }

        Ok(())
    }
}
