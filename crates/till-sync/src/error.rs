//! # Pipeline Error Types
//!
//! Errors raised by the services of the sale pipeline, and the
//! classification of failures reported by remote collaborators.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Pipeline Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Sale Pipeline  │  │  Local State    │  │     Configuration       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ValidationFail │  │  Persistence    │  │  InvalidConfig          │ │
//! │  │  NetworkUnavail │  │  Core (cart,    │  │  InvalidUrl             │ │
//! │  │  SubmissionRej  │  │   checkout)     │  │  ConfigLoadFailed       │ │
//! │  │  SyncExhausted  │  │  Serialization  │  │  ConfigSaveFailed       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  RemoteError (what a collaborator reported)                            │
//! │  ├── Network   - could not get a definitive answer; retry later        │
//! │  └── Rejected  - the service refused the request; retrying won't help  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use till_core::{CoreError, StockValidationResult};
use till_db::DbError;

/// Result type alias for pipeline operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Pipeline Error
// =============================================================================

/// Error type covering every failure the pipeline surfaces.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Sale Pipeline Errors
    // =========================================================================
    /// Stock validation found a problem with the cart.
    ///
    /// Carries the full result so the caller can show which lines are short.
    #[error("Stock validation failed: {}", .0.error_message.as_deref().unwrap_or("cart is empty"))]
    ValidationFailed(Box<StockValidationResult>),

    /// No definitive answer from the remote services.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The sale service refused the request outright.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// An operation ran out of automatic retries.
    #[error("Sync gave up on operation {op_id} after {attempts} attempts: {last_error}")]
    SyncExhausted {
        op_id: String,
        attempts: i64,
        last_error: String,
    },

    /// The local store could not be written or read.
    #[error("Local persistence failed: {0}")]
    PersistenceFailure(#[from] DbError),

    // =========================================================================
    // Local State Errors
    // =========================================================================
    /// Cart or checkout rule violation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failed to encode or decode a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend URL.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A background service is shutting down.
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => SyncError::NetworkUnavailable(msg),
            RemoteError::Rejected { reason, .. } => SyncError::SubmissionRejected(reason),
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the operator has to act before the pipeline can
    /// make progress on its own.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            SyncError::SyncExhausted { .. } | SyncError::PersistenceFailure(_)
        )
    }
}

// =============================================================================
// Remote Error
// =============================================================================

/// Failure reported by a remote collaborator (stock, sale or health
/// endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connect failure, timeout, 5xx or throttling. The request may or may
    /// not have been applied; it is safe to resend with the same
    /// idempotency key.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered and refused the request.
    #[error("rejected: {reason}")]
    Rejected { status: Option<u16>, reason: String },
}

impl RemoteError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NetworkUnavailable("timeout".into()).is_retryable());

        assert!(!SyncError::SubmissionRejected("unknown product".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_remote_error_mapping() {
        let err: SyncError = RemoteError::Network("connection refused".into()).into();
        assert!(matches!(err, SyncError::NetworkUnavailable(_)));

        let err: SyncError = RemoteError::Rejected {
            status: Some(422),
            reason: "unknown product".into(),
        }
        .into();
        assert!(matches!(err, SyncError::SubmissionRejected(ref r) if r == "unknown product"));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::SyncExhausted {
            op_id: "op-1".into(),
            attempts: 5,
            last_error: "timeout".into(),
        };
        assert!(err.to_string().contains("op-1"));
        assert!(err.to_string().contains("5 attempts"));
        assert!(err.needs_operator());

        let err = RemoteError::Rejected {
            status: Some(409),
            reason: "duplicate".into(),
        };
        assert_eq!(err.to_string(), "rejected: duplicate");
        assert_eq!(RemoteError::rejected("nope").to_string(), "rejected: nope");
    }

    #[test]
    fn test_config_errors() {
        let err: SyncError = url::Url::parse("not a url").unwrap_err().into();
        assert!(err.is_config_error());
    }
}
