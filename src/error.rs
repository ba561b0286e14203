//! Error hierarchy for TrainAudit
//!
//! These are failures that prevent a run from completing at all. Audit
//! halts (coverage, variance, completeness, schema) are not errors: they
//! travel as [`crate::audit::Halt`] and still produce a halted result.

use crate::audit::{AuditStatus, Stage};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all TrainAudit operations
#[derive(Debug, Error)]
pub enum AuditError {
    /// Upstream data collaborator failures
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Raw payload could not be normalized
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Rule table or logging configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request that cannot be audited (window order, future days)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Attempted to move the audit state machine backwards
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: AuditStatus, to: AuditStatus },

    /// Run aborted by its cancellation token
    #[error("Run cancelled before {stage}")]
    Cancelled { stage: Stage },

    /// Output refused by the text renderer
    #[error("Render refused: {0}")]
    Render(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by an upstream source
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Source could not be reached
    #[error("Upstream unavailable: {reason}")]
    Unavailable { reason: String },

    /// A fetch step failed
    #[error("Fetch of {step} failed: {reason}")]
    FetchFailed { step: String, reason: String },

    /// Payload file missing
    #[error("Payload not found: {path}")]
    NotFound { path: PathBuf },
}

/// Raw records that cannot be turned into canonical ones
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Required field absent
    #[error("Missing {field} on {record}")]
    MissingField { record: String, field: String },

    /// Date or timestamp that does not parse
    #[error("Invalid date in {record}: {value}")]
    InvalidDate { record: String, value: String },

    /// Malformed JSON or structure
    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },
}

/// Result type alias for TrainAudit operations
pub type Result<T> = std::result::Result<T, AuditError>;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Payload(PayloadError::Malformed {
            reason: err.to_string(),
        })
    }
}

impl From<toml::ser::Error> for AuditError {
    fn from(err: toml::ser::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AuditError {
    fn from(err: toml::de::Error) -> Self {
        AuditError::Configuration(err.to_string())
    }
}

impl AuditError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuditError::Upstream(UpstreamError::Unavailable { .. }) | AuditError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AuditError::Cancelled { .. } => ErrorSeverity::Info,
            AuditError::Render(_) => ErrorSeverity::Warning,
            AuditError::Upstream(UpstreamError::Unavailable { .. }) => ErrorSeverity::Warning,
            AuditError::InvalidTransition { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AuditError::Upstream(UpstreamError::NotFound { path }) => {
                format!("Could not find payload file: {}", path.display())
            }
            AuditError::Upstream(UpstreamError::Unavailable { .. }) => {
                "The data source is unavailable. Try again later.".to_string()
            }
            AuditError::Payload(PayloadError::MissingField { record, field }) => {
                format!("Record {} is missing required field '{}'.", record, field)
            }
            AuditError::Cancelled { .. } => "The audit run was cancelled; nothing was produced.".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Internal invariant broken
    Critical,
    /// Run failed
    Error,
    /// Run failed for an expected, recoverable reason
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
