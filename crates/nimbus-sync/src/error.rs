//! # Sync Error Types
//!
//! Error types for the subscription client.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Server              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  Server {msg,status,…}  │ │
//! │  │  InvalidUrl     │  │  (no usable     │  │  Conflict (HTTP 409)    │ │
//! │  │                 │  │   connection)   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │   Protocol      │  │   Internal                                  │  │
//! │  │                 │  │                                             │  │
//! │  │  Serialization  │  │  Channel (engine actor gone)                │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use nimbus_core::ErrorInfo;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all client failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid client configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid subscriptions URI.
    #[error("Invalid subscriptions URI: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The underlying connection cannot currently be used. The engine pauses
    /// and waits for a connectivity transition instead of counting this as a
    /// subscription failure.
    #[error("Transport unavailable")]
    TransportUnavailable,

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Generic non-2xx outcome after retries were exhausted or skipped.
    #[error("Server error: {message} (status: {status}, code: {code})")]
    Server {
        /// Human-readable description.
        message: String,
        /// HTTP status of the final attempt.
        status: u16,
        /// Service-specific error code from the response body.
        code: u32,
    },

    /// HTTP 409 surfaced as its own kind; the engine treats it like any
    /// other send failure for reconciliation purposes.
    #[error("Conflict: {message} (status: {status}, code: {code})")]
    Conflict {
        /// Human-readable description.
        message: String,
        /// HTTP status (always 409).
        status: u16,
        /// Service-specific error code from the response body.
        code: u32,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize or deserialize a wire body.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The engine actor is no longer running.
    #[error("Channel error: {0}")]
    Channel(String),
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

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error means the connection itself is unusable
    /// and the engine should pause rather than retry.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(self, SyncError::TransportUnavailable)
    }

    /// Builds a server error from the error descriptor of a response body.
    pub fn server(info: ErrorInfo) -> Self {
        SyncError::Server {
            message: info.message,
            status: info.status,
            code: info.code,
        }
    }

    /// The `{message, status, code}` descriptor of this error, when it
    /// carries one. Used when reporting rejections to entities.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        match self {
            SyncError::Server {
                message,
                status,
                code,
            }
            | SyncError::Conflict {
                message,
                status,
                code,
            } => Some(ErrorInfo {
                message: message.clone(),
                status: *status,
                code: *code,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_unavailable_classification() {
        assert!(SyncError::TransportUnavailable.is_transport_unavailable());
        assert!(!SyncError::Channel("closed".into()).is_transport_unavailable());
        assert!(!SyncError::Server {
            message: "boom".into(),
            status: 500,
            code: 0
        }
        .is_transport_unavailable());
    }

    #[test]
    fn test_error_info_round_trip() {
        let err = SyncError::server(ErrorInfo {
            message: "Throttled by server".into(),
            status: 429,
            code: 51202,
        });
        let info = err.error_info().unwrap();
        assert_eq!(info.status, 429);
        assert_eq!(info.code, 51202);
    }

    #[test]
    fn test_display_includes_context() {
        let err = SyncError::Conflict {
            message: "Revision mismatch".into(),
            status: 409,
            code: 54302,
        };
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("Revision mismatch"));
    }
}
