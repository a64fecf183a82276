//! Structural validation of a cluster configuration.
//!
//! Errors make the configuration unusable; warnings flag setups that work
//! but are unlikely to be what the operator wanted.

pub mod lint;

use std::collections::HashSet;
use tracing::warn;

use crate::cluster::ClusterConfig;
use crate::error::ConfigError;

/// A non-fatal configuration finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulated errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(message = %warning.message, "Configuration warning");
        }
    }

    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.errors))
        }
    }
}

/// Check node-list invariants: at least one node, unique IDs, and a
/// primary count the pool can work with.
pub fn validate_cluster(config: &ClusterConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.nodes.is_empty() {
        result.add_error("at least one node must be configured");
        return result;
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        if node.id.as_str().trim().is_empty() {
            result.add_error("node id must not be empty");
        } else if !seen.insert(node.id.as_str()) {
            result.add_error(format!("duplicate node id '{}'", node.id));
        }
    }

    match config.primaries().count() {
        0 => result.add_warning(ValidationWarning::new(
            "no primary node configured; primary connections will fail",
        )),
        1 => {}
        n => result.add_warning(ValidationWarning::new(format!(
            "{} primary nodes configured; primary traffic will be balanced across them",
            n
        ))),
    }

    result
}
