use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A cluster endpoint is missing a required field.
    #[error("Invalid endpoint config: `{0}` must not be empty")]
    MissingEndpointField(&'static str),

    /// A job maps a table to a whole database or vice versa.
    #[error("Invalid job `{0}`: source and destination must both be table-scoped or both database-scoped")]
    MixedJobScope(String),

    /// Two jobs share the same name.
    #[error("Invalid job list: job name `{0}` is used more than once")]
    DuplicateJobName(String),
}
