//! # Error Types
//!
//! Domain-specific error types for nimbus-core.

use thiserror::Error;

/// Errors produced by the pure type layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity kind string did not match any known kind.
    #[error("Unknown entity kind: '{0}'. Valid kinds: map, list, document, stream")]
    UnknownEntityKind(String),
}
