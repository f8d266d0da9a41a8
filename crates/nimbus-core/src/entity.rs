//! # Entity Contract
//!
//! The trait every subscribable local entity implements, and the
//! subscription states the client reports back to it.
//!
//! ## Subscription State Reporting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 States reported to a SyncEntity                         │
//! │                                                                         │
//! │   none ──► request_in_flight ──► response_in_flight ──► established    │
//! │    ▲              │                      │                   │          │
//! │    └──────────────┴──────────────────────┴───────────────────┘          │
//! │         (send failure, cancellation, rejection, resync)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntityKind, ErrorInfo, EventId};

// =============================================================================
// Subscription State
// =============================================================================

/// The subscription lifecycle state reported to an entity.
///
/// Entities typically surface this to application code so it can tell
/// whether change events are flowing yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription activity; events are not expected.
    #[default]
    None,

    /// A subscription batch naming this entity has been handed to the
    /// transport; no server acknowledgement yet.
    RequestInFlight,

    /// The server accepted the batch; completion events are expected
    /// within the advertised delivery window.
    ResponseInFlight,

    /// Replay completed; subsequent events arrive in order.
    Established,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::None => write!(f, "none"),
            SubscriptionState::RequestInFlight => write!(f, "request_in_flight"),
            SubscriptionState::ResponseInFlight => write!(f, "response_in_flight"),
            SubscriptionState::Established => write!(f, "established"),
        }
    }
}

// =============================================================================
// Entity Trait
// =============================================================================

/// The local representation of a subscribable entity.
///
/// The client only ever talks to entities through this trait: an identity
/// (`sid`/`kind`), a replay cursor, a mutation entry point for inbound
/// change events, a state-report entry point, and a failure-report entry
/// point. The client never mutates an entity directly; methods take
/// `&self` and implementations own their interior mutability.
pub trait SyncEntity: Send + Sync {
    /// Stable unique identifier of this entity.
    fn sid(&self) -> &str;

    /// The kind of this entity.
    fn kind(&self) -> EntityKind;

    /// The last event id this entity has seen, used as the replay cursor
    /// when establishing a subscription.
    fn last_event_id(&self) -> EventId;

    /// Advances the replay cursor after a completed replay.
    fn advance_last_event_id(&self, event_id: EventId);

    /// Applies an inbound change event.
    ///
    /// `strictly_ordered` is true when the event is known to arrive in
    /// server-emission order; otherwise the entity must tolerate
    /// reordering relative to its cursor.
    fn apply_event(&self, event: Value, strictly_ordered: bool);

    /// Reports the current subscription lifecycle state.
    fn set_subscription_state(&self, state: SubscriptionState);

    /// Reports a server-side subscription rejection.
    fn report_failure(&self, error: ErrorInfo);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SubscriptionState::None.to_string(), "none");
        assert_eq!(
            SubscriptionState::RequestInFlight.to_string(),
            "request_in_flight"
        );
        assert_eq!(
            SubscriptionState::ResponseInFlight.to_string(),
            "response_in_flight"
        );
        assert_eq!(SubscriptionState::Established.to_string(), "established");
    }

    #[test]
    fn test_state_default() {
        assert_eq!(SubscriptionState::default(), SubscriptionState::None);
    }
}
