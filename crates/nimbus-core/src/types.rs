//! # Shared Types
//!
//! Entity kinds and the server error shape used on the wire and in
//! failure reports to entities.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Monotonic event cursor assigned by the server to every change event.
///
/// Entities track the last event they have seen; the client sends it as the
/// replay cursor when establishing a subscription.
pub type EventId = i64;

// =============================================================================
// Entity Kind
// =============================================================================

/// The kind of a subscribable entity.
///
/// The kind selects the wire value of `object_type` in subscription batches
/// and the payload field carrying the addressed sid in data-change events
/// (`map_sid`, `list_sid`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Key/value map.
    Map,

    /// Ordered list.
    List,

    /// Single JSON document.
    Document,

    /// Append-only message stream.
    Stream,
}

impl EntityKind {
    /// All kinds, in wire-prefix matching order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Map,
        EntityKind::List,
        EntityKind::Document,
        EntityKind::Stream,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Map => "map",
            EntityKind::List => "list",
            EntityKind::Document => "document",
            EntityKind::Stream => "stream",
        }
    }

    /// Returns the event-payload field that carries the addressed sid for
    /// data events of this kind.
    pub fn sid_field(&self) -> &'static str {
        match self {
            EntityKind::Map => "map_sid",
            EntityKind::List => "list_sid",
            EntityKind::Document => "document_sid",
            EntityKind::Stream => "stream_sid",
        }
    }

    /// Matches an inbound `event_type` tag against this kind's prefix
    /// (e.g. `map_item_added` → `Map`).
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        event_type
            .strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "map" => Ok(EntityKind::Map),
            "list" => Ok(EntityKind::List),
            "document" => Ok(EntityKind::Document),
            "stream" => Ok(EntityKind::Stream),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

// =============================================================================
// Server Error Shape
// =============================================================================

/// Error descriptor attached by the server to `subscription_failed`
/// lifecycle events and to non-2xx response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,

    /// HTTP-style status.
    #[serde(default)]
    pub status: u16,

    /// Service-specific error code.
    #[serde(default)]
    pub code: u32,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (status: {}, code: {})",
            self.message, self.status, self.code
        )
    }
}
