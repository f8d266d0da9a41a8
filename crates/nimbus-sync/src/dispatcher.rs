//! # Push Message Classification
//!
//! Every message delivered over the notification channel carries an
//! `event_type` string. This module sorts them into a closed set of
//! kinds before the engine acts on them:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  "subscription_established" ──► Lifecycle(Established)       │
//! │  "subscription_canceled"    ──► Lifecycle(Canceled)          │
//! │  "subscription_failed"      ──► Lifecycle(Failed)            │
//! │  "map_item_added", ...      ──► Data(EntityKind::Map)        │
//! │  "list_item_removed", ...   ──► Data(EntityKind::List)       │
//! │  "document_updated", ...    ──► Data(EntityKind::Document)   │
//! │  "stream_message_published" ──► Data(EntityKind::Stream)     │
//! │  anything else              ──► Unknown                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data events name their target through a kind-specific sid field in
//! the payload (`map_sid`, `list_sid`, `document_sid`, `stream_sid`).

use nimbus_core::EntityKind;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{LifecycleEvent, PushMessage};

/// Lifecycle transitions reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    /// The subscription is live; events will follow.
    Established,

    /// The subscription was torn down at the client's request.
    Canceled,

    /// The server rejected the subscription.
    Failed,
}

/// Classification of an incoming push message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A subscription lifecycle notification.
    Lifecycle(LifecycleKind),

    /// An entity data event (item added, document updated, ...).
    Data(EntityKind),

    /// An event type this client does not understand.
    Unknown,
}

/// Classifies an event type string.
pub fn classify(event_type: &str) -> MessageKind {
    match event_type {
        "subscription_established" => MessageKind::Lifecycle(LifecycleKind::Established),
        "subscription_canceled" => MessageKind::Lifecycle(LifecycleKind::Canceled),
        "subscription_failed" => MessageKind::Lifecycle(LifecycleKind::Failed),
        other => EntityKind::ALL
            .iter()
            .find(|kind| kind.matches_event_type(other))
            .map(|kind| MessageKind::Data(*kind))
            .unwrap_or(MessageKind::Unknown),
    }
}

/// Pulls the target sid out of a data event payload.
pub fn data_event_sid(kind: EntityKind, message: &PushMessage) -> Option<&str> {
    message
        .event
        .get(kind.sid_field())
        .and_then(Value::as_str)
}

/// Parses a lifecycle notification payload.
pub fn parse_lifecycle(message: &PushMessage) -> SyncResult<LifecycleEvent> {
    serde_json::from_value(message.event.clone()).map_err(|err| {
        SyncError::Serialization(format!(
            "malformed {} payload: {err}",
            message.event_type
        ))
    })
}
