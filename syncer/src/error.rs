use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Coarse classification of a sync failure, used by the per-tick error triage
/// to decide between retrying, re-bootstrapping and aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Anything that is expected to succeed on a later tick.
    Normal,
    /// Stale cached metadata; the job re-bootstraps from a fresh snapshot.
    Meta,
    /// A cluster frontend rejected a call.
    Frontend,
    /// The store holding job definitions and progress failed.
    Db,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Normal => write!(f, "normal"),
            ErrorCategory::Meta => write!(f, "meta"),
            ErrorCategory::Frontend => write!(f, "frontend"),
            ErrorCategory::Db => write!(f, "db"),
        }
    }
}

/// The error type used throughout the replication core.
///
/// Carries a category and a panic severity flag next to the message. A panic
/// error stops the job worker from syncing; everything else is retried on a
/// later tick.
#[derive(Debug, Error)]
#[error("{category} error: {message}")]
pub struct SyncError {
    category: ErrorCategory,
    panic: bool,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl SyncError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            panic: false,
            message: message.into(),
            source: None,
        }
    }

    /// An error severe enough that the job must stop processing until an
    /// operator pauses or removes it.
    pub fn panic(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            panic: true,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it reachable through `source()`.
    pub fn wrap(
        source: impl StdError + Send + Sync + 'static,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            panic: false,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_panic(&self) -> bool {
        self.panic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_carries_category() {
        let err = SyncError::new(ErrorCategory::Normal, "test error");
        assert_eq!(err.category(), ErrorCategory::Normal);
        assert!(!err.is_panic());
        assert_eq!(err.to_string(), "normal error: test error");
    }

    #[test]
    fn wrap_keeps_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "db open error");
        let err = SyncError::wrap(inner, ErrorCategory::Db, "wrapped error");
        assert_eq!(err.category(), ErrorCategory::Db);
        assert_eq!(err.source().expect("source").to_string(), "db open error");
    }

    #[test]
    fn panic_sets_severity() {
        let err = SyncError::panic(ErrorCategory::Frontend, "fe test error");
        assert!(err.is_panic());
        assert_eq!(err.category(), ErrorCategory::Frontend);
    }
}
