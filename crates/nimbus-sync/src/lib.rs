//! # nimbus-sync: Subscription Reconciliation Client
//!
//! This crate continuously negotiates with the Nimbus backend to keep a
//! caller-declared set of entities subscribed, and routes inbound change
//! and lifecycle events back to the correct local entity.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reconciliation Architecture                         │
//! │                                                                         │
//! │  caller                         notification layer (external)          │
//! │  add/remove                     message(type, payload)                 │
//! │     │                           transport_ready(bool)                  │
//! │     ▼                                  │                                │
//! │  ┌──────────────┐               ┌──────▼──────┐                        │
//! │  │ EngineHandle │──── mpsc ────►│   Router    │                        │
//! │  └──────────────┘               └──────┬──────┘                        │
//! │                                        │                                │
//! │  ┌─────────────────────────────────────▼─────────────────────────────┐ │
//! │  │                 Engine actor task (single-threaded)               │ │
//! │  │                                                                   │ │
//! │  │  desired set ──diff──► batch ──► RequestExecutor ──► transport   │ │
//! │  │  confirmed set ◄── lifecycle events ◄── Dispatcher ◄── push      │ │
//! │  │                                                                   │ │
//! │  │  timers: backoff-debounced pass, TTL resync, delivery verify     │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  Every state change re-arms the reconciliation pass until the          │
//! │  desired and confirmed sets agree.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - The reconciliation engine actor and its handle
//! - [`dispatcher`] - Inbound push-message classification
//! - [`transport`] - Transport contract and retrying request executor
//! - [`router`] - Notification-channel contract
//! - [`protocol`] - Wire types for batches, responses and push messages
//! - [`config`] - Client configuration
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nimbus_sync::{Engine, RequestExecutor, SyncConfig};
//!
//! let config = SyncConfig::new("https://sync.nimbus.example/v3/Subscriptions");
//! let executor = RequestExecutor::new(config.clone(), http_transport);
//! let (handle, _task) = Engine::spawn(config, Arc::new(executor))?;
//!
//! // Declare subscription intent; reconciliation happens asynchronously.
//! handle.subscribe(entity).await?;
//!
//! // Feed inbound push traffic and connectivity transitions.
//! handle.accept_message(message, false).await?;
//! handle.set_connected(true).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod router;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{BackoffSettings, ClientInfo, RetrySettings, SyncConfig};
pub use dispatcher::{LifecycleKind, MessageKind};
pub use engine::{Engine, EngineHandle, EngineStatus};
pub use error::{SyncError, SyncResult};
pub use protocol::{BatchResponse, PokeReason, PushMessage, SubscriptionAction};
pub use router::Router;
pub use transport::{HttpTransport, RequestExecutor, Response, TransportClient};
