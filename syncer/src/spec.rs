use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ErrorCategory, SyncError};

/// Network location of a cluster frontend node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Frontend {
    pub host: String,
    pub port: u16,
}

/// Network location of a cluster backend node, as handed to the destination
/// inside the snapshot's `extra_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NetworkAddr {
    pub ip: String,
    pub port: u16,
}

/// The backend map and master token injected into a snapshot's `job_info`
/// before it is handed to the destination for restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtraInfo {
    pub be_network_map: HashMap<i64, NetworkAddr>,
    pub token: String,
}

/// Identifies one side of a replication.
///
/// Holds the cluster endpoint and credentials, the database name plus an
/// optional table name, and the ids resolved during the job's first run. The
/// spec is table-scoped when `table` is non-empty.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub db_id: i64,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub table_id: i64,
    /// All frontends of the cluster, discovered at first run.
    #[serde(default)]
    pub frontends: Vec<Frontend>,
}

impl ClusterSpec {
    pub fn is_table_scoped(&self) -> bool {
        !self.table.is_empty()
    }

    /// Checks that the spec names everything needed to reach a cluster.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.host.is_empty() {
            return Err(SyncError::new(ErrorCategory::Normal, "host is empty"));
        }
        if self.user.is_empty() {
            return Err(SyncError::new(ErrorCategory::Normal, "user is empty"));
        }
        if self.database.is_empty() {
            return Err(SyncError::new(ErrorCategory::Normal, "database is empty"));
        }

        Ok(())
    }
}

impl fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"REDACTED")
            .field("database", &self.database)
            .field("db_id", &self.db_id)
            .field("table", &self.table)
            .field("table_id", &self.table_id)
            .field("frontends", &self.frontends)
            .finish()
    }
}

impl fmt::Display for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_table_scoped() {
            write!(
                f,
                "{}@{}:{}/{}.{}",
                self.user, self.host, self.port, self.database, self.table
            )
        } else {
            write!(
                f,
                "{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClusterSpec {
        ClusterSpec {
            host: "fe1".to_string(),
            port: 9030,
            user: "root".to_string(),
            password: "secret".to_string(),
            database: "orders".to_string(),
            db_id: 0,
            table: String::new(),
            table_id: 0,
            frontends: vec![],
        }
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(spec().validate().is_ok());

        let mut missing_host = spec();
        missing_host.host.clear();
        assert!(missing_host.validate().is_err());

        let mut missing_db = spec();
        missing_db.database.clear();
        assert!(missing_db.validate().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", spec());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn json_round_trip_preserves_resolved_ids() {
        let mut original = spec();
        original.db_id = 7;
        original.table = "t".to_string();
        original.table_id = 42;

        let encoded = serde_json::to_string(&original).expect("encode");
        let decoded: ClusterSpec = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.db_id, 7);
        assert_eq!(decoded.table_id, 42);
        assert_eq!(decoded.table, "t");
        assert_eq!(decoded.password, original.password);
    }
}
