//! # Notification Channel Router
//!
//! The notification layer delivers messages on named channels. Three
//! per-object channels predate the unified one and provide no ordering
//! guarantee; the unified channel delivers strictly in order. The router
//! maps the channel a message arrived on to that guarantee and forwards
//! everything to the engine.

use std::sync::Arc;

use nimbus_core::SyncEntity;
use tracing::trace;

use crate::engine::EngineHandle;
use crate::error::SyncResult;
use crate::protocol::PushMessage;

/// Per-object document channel (unordered).
pub const DOCUMENT_CHANNEL: &str = "com.nimbus.cds.document";

/// Per-object list channel (unordered).
pub const LIST_CHANNEL: &str = "com.nimbus.cds.list";

/// Per-object map channel (unordered).
pub const MAP_CHANNEL: &str = "com.nimbus.cds.map";

/// Unified event channel (strictly ordered).
pub const SYNC_EVENT_CHANNEL: &str = "nimbus.sync.event";

/// The delivery guarantee of a notification channel, when recognized.
fn channel_ordering(channel_type: &str) -> Option<bool> {
    match channel_type {
        DOCUMENT_CHANNEL | LIST_CHANNEL | MAP_CHANNEL => Some(false),
        SYNC_EVENT_CHANNEL => Some(true),
        _ => None,
    }
}

/// Routes incoming notifications to the engine.
pub struct Router {
    engine: EngineHandle,
}

impl Router {
    /// Creates a router in front of a running engine.
    pub fn new(engine: EngineHandle) -> Self {
        Router { engine }
    }

    /// The channel types the notification layer must subscribe to.
    pub fn channel_types() -> [&'static str; 4] {
        [
            SYNC_EVENT_CHANNEL,
            DOCUMENT_CHANNEL,
            LIST_CHANNEL,
            MAP_CHANNEL,
        ]
    }

    /// Entry point for all incoming notifications. Messages on channels
    /// this client does not recognize are dropped.
    pub async fn dispatch(&self, channel_type: &str, payload: PushMessage) -> SyncResult<()> {
        trace!(channel_type, event_type = %payload.event_type, "Notification received");
        match channel_ordering(channel_type) {
            Some(strictly_ordered) => self.engine.accept_message(payload, strictly_ordered).await,
            None => {
                trace!(channel_type, "Dropping message on unrecognized channel");
                Ok(())
            }
        }
    }

    /// Declares intent to be subscribed to an entity.
    pub async fn subscribe(&self, entity: Arc<dyn SyncEntity>) -> SyncResult<()> {
        self.engine.subscribe(entity).await
    }

    /// Withdraws subscription intent for a sid.
    pub async fn unsubscribe(&self, sid: impl Into<String>) -> SyncResult<()> {
        self.engine.unsubscribe(sid).await
    }

    /// Forwards a transport readiness change to the engine.
    pub async fn connection_state_changed(&self, connected: bool) -> SyncResult<()> {
        self.engine.set_connected(connected).await
    }
}
