//! # nimbus-core: Pure Types for the Nimbus Sync Client
//!
//! This crate defines the contract between the Nimbus Sync client and the
//! local representations of subscribable entities, with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Nimbus Sync Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Entity implementations (app-side)                   │   │
//! │  │        SyncMap ── SyncList ── SyncDocument ── SyncStream        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ implements SyncEntity                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ nimbus-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────────┐  ┌──────────────────────┐ │   │
//! │  │   │   types   │  │     entity      │  │        error         │ │   │
//! │  │   │EntityKind │  │ SyncEntity trait│  │  CoreError           │ │   │
//! │  │   │ErrorInfo  │  │SubscriptionState│  │                      │ │   │
//! │  │   └───────────┘  └─────────────────┘  └──────────────────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS • PURE TYPES                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 nimbus-sync (Client Engine)                     │   │
//! │  │      Reconciliation engine, dispatcher, transport contract      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`entity`] - The `SyncEntity` trait and reported subscription states
//! - [`types`] - Entity kinds and the server error shape
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **No I/O**: Network, file system and timer access is FORBIDDEN here
//! 2. **Interior mutability on the entity side**: `SyncEntity` methods take
//!    `&self`; implementations own their locking strategy
//! 3. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entity;
pub mod error;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use nimbus_core::SyncEntity` instead of
// `use nimbus_core::entity::SyncEntity`

pub use entity::{SubscriptionState, SyncEntity};
pub use error::CoreError;
pub use types::{EntityKind, ErrorInfo, EventId};
