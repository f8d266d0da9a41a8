//! # Wire Protocol
//!
//! JSON wire shapes exchanged with the subscriptions endpoint and received
//! over the push-notification layer.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Subscription Protocol                               │
//! │                                                                         │
//! │  OUTGOING BATCH (HTTP POST)                                            │
//! │  ──────────────────────────                                            │
//! │  CLIENT ───► { event_protocol_version, action, correlation_id,         │
//! │               retried_requests, ttl_in_s: -1, reason?,                 │
//! │               requests: [{object_sid, object_type, last_event_id?}] }  │
//! │  SERVER ◄─── { max_batch_size?, ttl_in_s?, estimated_delivery_in_ms? } │
//! │                                                                         │
//! │  INBOUND PUSH (notification layer)                                     │
//! │  ─────────────────────────────────                                     │
//! │  { event_type: "subscription_established" | "subscription_canceled"    │
//! │              | "subscription_failed" | "<kind>_...",                   │
//! │    correlation_id?,                                                    │
//! │    event: { object_sid / <kind>_sid, replay_status?, last_event_id?,   │
//! │             error? } }                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Numeric response fields are advisory and may be absent or malformed;
//! [`as_positive_finite`] validates them before use so a bad field skips
//! the optional behavior instead of failing the batch.

use nimbus_core::{EntityKind, ErrorInfo, EventId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current event protocol version.
pub const PROTOCOL_VERSION: u32 = 3;

// =============================================================================
// Batch Action
// =============================================================================

/// The direction of a subscription batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Create server-side subscriptions for the named sids.
    Establish,

    /// Tear down server-side subscriptions for the named sids.
    Cancel,
}

impl std::fmt::Display for SubscriptionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionAction::Establish => write!(f, "establish"),
            SubscriptionAction::Cancel => write!(f, "cancel"),
        }
    }
}

// =============================================================================
// Poke Reason
// =============================================================================

/// Why a full re-synchronization was requested. Attached to the first
/// batch sent after the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PokeReason {
    /// Connectivity was just restored.
    Reconnect,

    /// The server-granted subscription TTL elapsed.
    Ttl,
}

impl std::fmt::Display for PokeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PokeReason::Reconnect => write!(f, "reconnect"),
            PokeReason::Ttl => write!(f, "ttl"),
        }
    }
}

// =============================================================================
// Outgoing Batch
// =============================================================================

/// One sid entry in an outgoing batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Sid of the entity.
    pub object_sid: String,

    /// Kind of the entity.
    pub object_type: EntityKind,

    /// Replay cursor; only sent for `establish`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<EventId>,
}

/// An outgoing subscription batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Protocol version spoken by this client.
    pub event_protocol_version: u32,

    /// Batch direction.
    pub action: SubscriptionAction,

    /// Correlation id tagging this batch; all asynchronous server replies
    /// for it carry the same value.
    pub correlation_id: i64,

    /// Number of sids in this batch that are being re-attempted.
    pub retried_requests: usize,

    /// Client-requested TTL; -1 delegates the choice to the server.
    pub ttl_in_s: i64,

    /// Re-synchronization reason, present on the first batch after a
    /// reconnect or TTL expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<PokeReason>,

    /// The sids covered by this batch, in desired-set insertion order.
    pub requests: Vec<SubscriptionRequest>,
}

// =============================================================================
// Batch Response
// =============================================================================

/// Body of a successful batch response.
///
/// All fields are advisory; they are kept as raw JSON values and validated
/// through [`as_positive_finite`] because the server may send numbers or
/// numeric strings, and a malformed value must not fail the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Server-adjusted maximum batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<Value>,

    /// Server-granted subscription TTL in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_in_s: Option<Value>,

    /// Estimated delivery window for completion events, in milliseconds.
    /// Only meaningful on `establish` responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery_in_ms: Option<Value>,
}

/// Validates an advisory numeric field: accepts JSON numbers and numeric
/// strings, and returns the value only when it is finite and positive.
pub fn as_positive_finite(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}

// =============================================================================
// Inbound Push Messages
// =============================================================================

/// An inbound push message, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Type tag; selects lifecycle handling or data-event routing.
    pub event_type: String,

    /// Correlation id of the batch this message replies to, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<i64>,

    /// Type-specific payload.
    #[serde(default)]
    pub event: Value,
}

/// Server-reported outcome of catching a new subscription up to the
/// latest state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Replay finished; subsequent events arrive in order.
    Completed,

    /// Replay was cut short; the subscription must be re-established.
    Interrupted,
}

/// Payload of a subscription lifecycle message
/// (`subscription_established` / `subscription_canceled` /
/// `subscription_failed`).
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleEvent {
    /// Sid the message addresses.
    pub object_sid: String,

    /// Replay outcome, present on `subscription_established`.
    #[serde(default)]
    pub replay_status: Option<ReplayStatus>,

    /// Cursor position after replay, present on completed establishes.
    #[serde(default)]
    pub last_event_id: Option<EventId>,

    /// Server error, present on `subscription_failed`.
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_request_wire_shape() {
        let request = BatchRequest {
            event_protocol_version: PROTOCOL_VERSION,
            action: SubscriptionAction::Establish,
            correlation_id: 1_726_000_000_123,
            retried_requests: 1,
            ttl_in_s: -1,
            reason: Some(PokeReason::Ttl),
            requests: vec![SubscriptionRequest {
                object_sid: "MP1".into(),
                object_type: EntityKind::Map,
                last_event_id: Some(42),
            }],
        };

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["event_protocol_version"], 3);
        assert_eq!(wire["action"], "establish");
        assert_eq!(wire["ttl_in_s"], -1);
        assert_eq!(wire["reason"], "ttl");
        assert_eq!(wire["requests"][0]["object_sid"], "MP1");
        assert_eq!(wire["requests"][0]["object_type"], "map");
        assert_eq!(wire["requests"][0]["last_event_id"], 42);
    }

    #[test]
    fn test_cancel_request_omits_cursor_and_reason() {
        let request = BatchRequest {
            event_protocol_version: PROTOCOL_VERSION,
            action: SubscriptionAction::Cancel,
            correlation_id: 7,
            retried_requests: 0,
            ttl_in_s: -1,
            reason: None,
            requests: vec![SubscriptionRequest {
                object_sid: "LM2".into(),
                object_type: EntityKind::List,
                last_event_id: None,
            }],
        };

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["action"], "cancel");
        assert!(wire.get("reason").is_none());
        assert!(wire["requests"][0].get("last_event_id").is_none());
    }

    #[test]
    fn test_positive_finite_validation() {
        assert_eq!(as_positive_finite(&json!(5000)), Some(5000.0));
        assert_eq!(as_positive_finite(&json!("60")), Some(60.0));
        assert_eq!(as_positive_finite(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(as_positive_finite(&json!(0)), None);
        assert_eq!(as_positive_finite(&json!(-1)), None);
        assert_eq!(as_positive_finite(&json!("soon")), None);
        assert_eq!(as_positive_finite(&json!(null)), None);
        assert_eq!(as_positive_finite(&json!({"ms": 5})), None);
    }

    #[test]
    fn test_lenient_batch_response_parsing() {
        let body: BatchResponse = serde_json::from_value(json!({
            "max_batch_size": "250",
            "estimated_delivery_in_ms": "shortly",
            "unknown_field": true
        }))
        .unwrap();

        assert_eq!(
            body.max_batch_size.as_ref().and_then(as_positive_finite),
            Some(250.0)
        );
        assert_eq!(
            body.estimated_delivery_in_ms
                .as_ref()
                .and_then(as_positive_finite),
            None
        );
        assert!(body.ttl_in_s.is_none());
    }

    #[test]
    fn test_lifecycle_event_parsing() {
        let event: LifecycleEvent = serde_json::from_value(json!({
            "object_sid": "MP1",
            "replay_status": "completed",
            "last_event_id": 42
        }))
        .unwrap();
        assert_eq!(event.object_sid, "MP1");
        assert_eq!(event.replay_status, Some(ReplayStatus::Completed));
        assert_eq!(event.last_event_id, Some(42));
        assert!(event.error.is_none());

        let failed: LifecycleEvent = serde_json::from_value(json!({
            "object_sid": "MP2",
            "error": { "message": "Access denied", "status": 403, "code": 54007 }
        }))
        .unwrap();
        assert_eq!(failed.error.unwrap().status, 403);
    }
}
