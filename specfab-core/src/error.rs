//! Error types for specfab-core
//!
//! Field-level problems (rejections, audit failures, unresolved conflicts)
//! never surface here; they resolve into reason codes on the record. This
//! module carries the run-level taxonomy: source failures, budget overruns and
//! fatal errors.

use crate::orchestrator::RunPhase;
use crate::rules::RuleTableError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run-level error
#[derive(Debug, Error)]
pub enum CoreError {
    /// Rule table failed to load or compile
    #[error("Rule table error: {0}")]
    RuleTable(#[from] RuleTableError),

    /// A budget ceiling was overrun mid-round (never retried)
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// FSM transition not in the legal table (programmer error)
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    /// Operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Identity collaborator could not confirm the product
    #[error("Identity confirmation failed: {0}")]
    Identity(String),

    /// Common crate error (config, io)
    #[error("Common error: {0}")]
    Common(#[from] specfab_common::Error),

    /// Serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure of one source during crawl/extract
///
/// Transient failures are retried with backoff; permanent failures exclude the
/// source immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailure {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl SourceFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Structured error snapshot stored on a FAILED run and in its record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
}

impl From<&CoreError> for RunFailure {
    fn from(err: &CoreError) -> Self {
        let kind = match err {
            CoreError::RuleTable(_) => "rule_table",
            CoreError::BudgetExceeded(_) => "budget_exceeded",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Identity(_) => "identity",
            CoreError::Common(_) => "common",
            CoreError::Json(_) => "json",
            CoreError::Io(_) => "io",
        };
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_failure_retryability() {
        assert!(SourceFailure::Transient("503".into()).is_retryable());
        assert!(SourceFailure::Timeout(3000).is_retryable());
        assert!(!SourceFailure::Permanent("404".into()).is_retryable());
    }

    #[test]
    fn test_run_failure_snapshot() {
        let err = CoreError::BudgetExceeded("pages 130 > 120".into());
        let failure = RunFailure::from(&err);
        assert_eq!(failure.kind, "budget_exceeded");
        assert!(failure.message.contains("pages 130"));
    }
}
