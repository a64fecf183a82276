//! Configuration error types.

use thiserror::Error;

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field-level range checks failed
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Cross-field or cross-node checks failed
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// Unknown load-balance strategy name
    #[error("unknown load balance strategy '{0}' (expected round_robin, random or weighted)")]
    UnknownStrategy(String),
}
