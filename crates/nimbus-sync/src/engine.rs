//! # Subscription Reconciliation Engine
//!
//! The engine owns two maps and spends its life closing the gap between
//! them:
//!
//! - the **desired set**: entities the application wants live, keyed by
//!   sid, in subscription order;
//! - the **confirmed set**: subscriptions the server has been told about,
//!   each with a delivery phase.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Engine Actor                                    │
//! │                                                                         │
//! │   EngineHandle ──commands──► run loop ──► reconcile pass                │
//! │                                │              │                         │
//! │         desired ∖ confirmed ───┤              ├──► establish batch      │
//! │         confirmed ∖ desired ───┘              └──► cancel batch         │
//! │                                                        │                │
//! │   push messages ◄── notification channel ◄── server ◄──┘                │
//! │   (lifecycle + data events, tagged with correlation ids)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Batches are fire-and-forget: the POST response only acknowledges
//! receipt, and the real completion arrives later as `subscription_*`
//! messages over the notification channel, matched to their batch by
//! correlation id. A per-batch verification timer re-issues batches whose
//! replies never arrive.
//!
//! Every state transition happens on the actor task; spawned helpers
//! (pass debounce, TTL, verification, batch POSTs) only send commands
//! back through the same channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use nimbus_core::{ErrorInfo, SubscriptionState, SyncEntity};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::config::{BackoffSettings, SyncConfig};
use crate::dispatcher::{self, LifecycleKind, MessageKind};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    as_positive_finite, BatchRequest, BatchResponse, LifecycleEvent, PokeReason, PushMessage,
    ReplayStatus, SubscriptionAction, SubscriptionRequest, PROTOCOL_VERSION,
};
use crate::transport::TransportClient;

/// Command channel depth.
const COMMAND_BUFFER: usize = 256;

/// Default batch ceiling until the server advertises its own.
const DEFAULT_MAX_BATCH_SIZE: usize = 100;

// =============================================================================
// Commands
// =============================================================================

enum EngineCommand {
    /// Declare intent to be subscribed to an entity.
    Subscribe { entity: Arc<dyn SyncEntity> },

    /// Withdraw intent for a sid.
    Unsubscribe { sid: String },

    /// A push message arrived over the notification channel.
    Message {
        payload: PushMessage,
        strictly_ordered: bool,
    },

    /// Connectivity changed underneath us.
    ConnectionState { connected: bool },

    /// A scheduled reconcile pass is due.
    RunPass,

    /// A batch POST resolved (in either direction).
    BatchOutcome {
        action: SubscriptionAction,
        correlation_id: i64,
        sids: Vec<String>,
        result: Result<BatchResponse, SyncError>,
    },

    /// A delivery verification window elapsed.
    VerifyDelivery { correlation_id: i64 },

    /// The server-granted subscription TTL ran out.
    TtlElapsed,

    /// Snapshot request for diagnostics.
    Status { reply: oneshot::Sender<EngineStatus> },

    /// Stop reconciling and exit the actor task.
    Shutdown,
}

/// Point-in-time counters for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// Entities the application wants subscribed.
    pub desired: usize,

    /// Subscriptions the server has been told about.
    pub confirmed: usize,

    /// Confirmed subscriptions with completed event replay.
    pub established: usize,

    /// Whether the notification transport is currently usable.
    pub connected: bool,

    /// Current batch ceiling.
    pub max_batch_size: usize,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running [`Engine`].
///
/// All methods enqueue work on the actor; they fail only when the engine
/// task has stopped.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Declares intent to be subscribed to `entity`. The subscription is
    /// effected asynchronously; re-declaring an entity whose replay cursor
    /// has not moved is a no-op.
    pub async fn subscribe(&self, entity: Arc<dyn SyncEntity>) -> SyncResult<()> {
        self.send(EngineCommand::Subscribe { entity }).await
    }

    /// Withdraws intent for `sid`. No further events reach the local
    /// entity, though the server-side teardown completes asynchronously.
    pub async fn unsubscribe(&self, sid: impl Into<String>) -> SyncResult<()> {
        self.send(EngineCommand::Unsubscribe { sid: sid.into() }).await
    }

    /// Ingests a push message from the notification channel.
    pub async fn accept_message(
        &self,
        payload: PushMessage,
        strictly_ordered: bool,
    ) -> SyncResult<()> {
        self.send(EngineCommand::Message {
            payload,
            strictly_ordered,
        })
        .await
    }

    /// Reports a connectivity change. Regaining the connection triggers a
    /// full event replay for every subscription.
    pub async fn set_connected(&self, connected: bool) -> SyncResult<()> {
        self.send(EngineCommand::ConnectionState { connected }).await
    }

    /// Returns a snapshot of the engine's counters.
    pub async fn status(&self) -> SyncResult<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Status { reply }).await?;
        rx.await
            .map_err(|_| SyncError::Channel("engine task stopped".into()))
    }

    /// Stops all communication, clears subscription intent, and cancels
    /// every outstanding timer.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(EngineCommand::Shutdown).await
    }

    async fn send(&self, command: EngineCommand) -> SyncResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::Channel("engine task stopped".into()))
    }
}

// =============================================================================
// Internal State
// =============================================================================

/// An entity the application wants subscribed.
struct DesiredSubscription {
    entity: Arc<dyn SyncEntity>,
    /// Insertion sequence; batches preserve subscription order.
    order: u64,
    /// Attempts re-issued after a silent delivery window.
    retry_count: u32,
}

/// Delivery phase of a confirmed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionPhase {
    /// Establish batch sent; POST not yet acknowledged.
    EstablishPending { correlation_id: i64 },

    /// POST acknowledged; waiting for the completion message.
    ResponseInFlight { correlation_id: i64 },

    /// Event replay completed; data events flow in order.
    Established,

    /// Cancel batch sent; `was_established` preserves the ordering
    /// guarantee for events that race the teardown.
    CancelPending {
        correlation_id: i64,
        was_established: bool,
    },

    /// A cancel attempt failed before reaching the server; the sid waits
    /// for the next cancel batch.
    Idle,

    /// The server rejected the subscription; excluded from reconciliation
    /// until the application re-subscribes.
    Rejected,
}

impl SubscriptionPhase {
    fn pending_correlation(&self) -> Option<i64> {
        match self {
            SubscriptionPhase::EstablishPending { correlation_id }
            | SubscriptionPhase::ResponseInFlight { correlation_id }
            | SubscriptionPhase::CancelPending { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    fn is_established(&self) -> bool {
        matches!(
            self,
            SubscriptionPhase::Established
                | SubscriptionPhase::CancelPending {
                    was_established: true,
                    ..
                }
        )
    }

    fn is_cancel_pending(&self) -> bool {
        matches!(self, SubscriptionPhase::CancelPending { .. })
    }

    fn is_rejected(&self) -> bool {
        matches!(self, SubscriptionPhase::Rejected)
    }
}

/// A subscription the server has been told about.
struct ConfirmedSubscription {
    entity: Arc<dyn SyncEntity>,
    order: u64,
    phase: SubscriptionPhase,
    /// Carried over from the desired entry at establish time so cancel
    /// batches can report re-attempted members too.
    retry_count: u32,
}

struct VerifyTimer {
    window: Duration,
    task: JoinHandle<()>,
}

fn create_backoff(settings: &BackoffSettings) -> ExponentialBackoff {
    // current_interval is what next_backoff() actually hands out first;
    // leaving it defaulted would ignore the configured initial delay.
    ExponentialBackoff {
        current_interval: Duration::from_millis(settings.initial_delay_ms),
        initial_interval: Duration::from_millis(settings.initial_delay_ms),
        max_interval: Duration::from_millis(settings.max_delay_ms),
        randomization_factor: settings.randomization_factor,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The reconciliation actor. Construct with [`Engine::spawn`].
pub struct Engine {
    config: SyncConfig,
    transport: Arc<dyn TransportClient>,
    tx: mpsc::Sender<EngineCommand>,

    desired: HashMap<String, DesiredSubscription>,
    confirmed: HashMap<String, ConfirmedSubscription>,
    next_order: u64,

    connected: bool,
    max_batch_size: usize,
    pending_poke_reason: Option<PokeReason>,
    last_correlation_id: i64,

    backoff: ExponentialBackoff,
    pass_timer: Option<JoinHandle<()>>,
    ttl_timer: Option<JoinHandle<()>>,
    verify_timers: HashMap<i64, VerifyTimer>,
    reply_arrivals: HashMap<i64, Instant>,
}

impl Engine {
    /// Validates the configuration and starts the actor task.
    pub fn spawn(
        config: SyncConfig,
        transport: Arc<dyn TransportClient>,
    ) -> SyncResult<(EngineHandle, JoinHandle<()>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let backoff = create_backoff(&config.backoff);
        let engine = Engine {
            config,
            transport,
            tx: tx.clone(),
            desired: HashMap::new(),
            confirmed: HashMap::new(),
            next_order: 0,
            connected: false,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            pending_poke_reason: None,
            last_correlation_id: 0,
            backoff,
            pass_timer: None,
            ttl_timer: None,
            verify_timers: HashMap::new(),
            reply_arrivals: HashMap::new(),
        };
        let task = tokio::spawn(engine.run(rx));
        Ok((EngineHandle { tx }, task))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Subscribe { entity } => self.handle_subscribe(entity),
                EngineCommand::Unsubscribe { sid } => self.handle_unsubscribe(&sid),
                EngineCommand::Message {
                    payload,
                    strictly_ordered,
                } => self.handle_message(payload, strictly_ordered),
                EngineCommand::ConnectionState { connected } => {
                    self.handle_connection_state(connected)
                }
                EngineCommand::RunPass => self.run_pass(),
                EngineCommand::BatchOutcome {
                    action,
                    correlation_id,
                    sids,
                    result,
                } => self.handle_batch_outcome(action, correlation_id, sids, result),
                EngineCommand::VerifyDelivery { correlation_id } => {
                    self.handle_verify_delivery(correlation_id)
                }
                EngineCommand::TtlElapsed => self.handle_ttl_elapsed(),
                EngineCommand::Status { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                EngineCommand::Shutdown => {
                    self.handle_shutdown();
                    break;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Intent
    // -------------------------------------------------------------------------

    fn handle_subscribe(&mut self, entity: Arc<dyn SyncEntity>) {
        let sid = entity.sid().to_string();
        debug!(sid, "Establishing intent to subscribe");
        if let Some(existing) = self.desired.get(&sid) {
            if existing.entity.last_event_id() == entity.last_event_id() {
                // Same replay cursor as the live intent; nothing to redo.
                return;
            }
        }
        self.confirmed.remove(&sid);
        let order = self.next_order;
        self.next_order += 1;
        self.desired.insert(
            sid,
            DesiredSubscription {
                entity,
                order,
                retry_count: 0,
            },
        );
        self.trigger_pass();
    }

    fn handle_unsubscribe(&mut self, sid: &str) {
        debug!(sid, "Establishing intent to unsubscribe");
        if self.desired.remove(sid).is_some() {
            self.trigger_pass();
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation Passes
    // -------------------------------------------------------------------------

    /// Schedules a reconcile pass after the current backoff delay.
    /// Triggers arriving while a pass is already scheduled coalesce.
    fn trigger_pass(&mut self) {
        if self
            .pass_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
        {
            return;
        }
        let Some(delay) = self.backoff.next_backoff() else {
            return;
        };
        let tx = self.tx.clone();
        self.pass_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineCommand::RunPass).await;
        }));
    }

    /// Cancels any scheduled pass and restores the initial delay.
    fn reset_backoff(&mut self) {
        if let Some(timer) = self.pass_timer.take() {
            timer.abort();
        }
        self.backoff.reset();
    }

    fn run_pass(&mut self) {
        self.pass_timer = None;
        match self.compute_batch() {
            Some((action, sids)) => self.send_batch(action, sids),
            None => {
                self.reset_backoff();
                debug!("All subscriptions resolved.");
            }
        }
    }

    /// Picks the next batch: establishes take priority over cancels, and
    /// both are capped at the current batch ceiling in subscription order.
    fn compute_batch(&self) -> Option<(SubscriptionAction, Vec<String>)> {
        let mut to_establish: Vec<(&str, u64)> = self
            .desired
            .iter()
            .filter(|(sid, _)| !self.confirmed.contains_key(*sid))
            .map(|(sid, desired)| (sid.as_str(), desired.order))
            .collect();
        if !to_establish.is_empty() {
            to_establish.sort_by_key(|(_, order)| *order);
            let sids = to_establish
                .into_iter()
                .take(self.max_batch_size)
                .map(|(sid, _)| sid.to_string())
                .collect();
            return Some((SubscriptionAction::Establish, sids));
        }

        let mut to_cancel: Vec<(&str, u64)> = self
            .confirmed
            .iter()
            .filter(|(sid, confirmed)| {
                !self.desired.contains_key(*sid)
                    && !confirmed.phase.is_cancel_pending()
                    && !confirmed.phase.is_rejected()
            })
            .map(|(sid, confirmed)| (sid.as_str(), confirmed.order))
            .collect();
        if !to_cancel.is_empty() {
            to_cancel.sort_by_key(|(_, order)| *order);
            let sids = to_cancel
                .into_iter()
                .take(self.max_batch_size)
                .map(|(sid, _)| sid.to_string())
                .collect();
            return Some((SubscriptionAction::Cancel, sids));
        }

        None
    }

    /// Correlation ids are wall-clock milliseconds, nudged forward to stay
    /// strictly increasing when batches land in the same millisecond.
    fn next_correlation_id(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let id = now.max(self.last_correlation_id + 1);
        self.last_correlation_id = id;
        id
    }

    fn send_batch(&mut self, action: SubscriptionAction, sids: Vec<String>) {
        if !self.connected {
            debug!("Connection required for subscription updates not ready; waiting");
            self.reset_backoff();
            return;
        }

        let correlation_id = self.next_correlation_id();
        let mut requests = Vec::with_capacity(sids.len());
        let mut recorded = Vec::with_capacity(sids.len());
        let mut retried_requests = 0;

        // Record each attempt before the POST leaves: completion messages
        // may start flowing before the response arrives.
        for sid in sids {
            match action {
                SubscriptionAction::Establish => {
                    let Some(desired) = self.desired.get(&sid) else {
                        continue;
                    };
                    if desired.retry_count > 0 {
                        retried_requests += 1;
                    }
                    desired
                        .entity
                        .set_subscription_state(SubscriptionState::RequestInFlight);
                    requests.push(SubscriptionRequest {
                        object_sid: sid.clone(),
                        object_type: desired.entity.kind(),
                        last_event_id: Some(desired.entity.last_event_id()),
                    });
                    self.confirmed.insert(
                        sid.clone(),
                        ConfirmedSubscription {
                            entity: desired.entity.clone(),
                            order: desired.order,
                            phase: SubscriptionPhase::EstablishPending { correlation_id },
                            retry_count: desired.retry_count,
                        },
                    );
                    recorded.push(sid);
                }
                SubscriptionAction::Cancel => {
                    let Some(confirmed) = self.confirmed.get_mut(&sid) else {
                        continue;
                    };
                    if confirmed.retry_count > 0 {
                        retried_requests += 1;
                    }
                    confirmed
                        .entity
                        .set_subscription_state(SubscriptionState::RequestInFlight);
                    requests.push(SubscriptionRequest {
                        object_sid: sid.clone(),
                        object_type: confirmed.entity.kind(),
                        last_event_id: None,
                    });
                    confirmed.phase = SubscriptionPhase::CancelPending {
                        correlation_id,
                        was_established: confirmed.phase.is_established(),
                    };
                    recorded.push(sid);
                }
            }
        }
        if recorded.is_empty() {
            return;
        }

        let body = BatchRequest {
            event_protocol_version: PROTOCOL_VERSION,
            action,
            correlation_id,
            retried_requests,
            ttl_in_s: -1,
            reason: self.pending_poke_reason.take(),
            requests,
        };
        debug!(
            action = %action,
            correlation_id,
            count = recorded.len(),
            "Dispatching subscription batch"
        );

        let transport = self.transport.clone();
        let uri = self.config.subscriptions_uri.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match serde_json::to_value(&body) {
                Ok(value) => transport.post(&uri, value, None).await.and_then(|response| {
                    if response.body.is_null() {
                        Ok(BatchResponse::default())
                    } else {
                        serde_json::from_value(response.body).map_err(SyncError::from)
                    }
                }),
                Err(err) => Err(SyncError::from(err)),
            };
            let _ = tx
                .send(EngineCommand::BatchOutcome {
                    action,
                    correlation_id,
                    sids: recorded,
                    result,
                })
                .await;
        });
    }

    // -------------------------------------------------------------------------
    // Batch Outcomes
    // -------------------------------------------------------------------------

    fn handle_batch_outcome(
        &mut self,
        action: SubscriptionAction,
        correlation_id: i64,
        sids: Vec<String>,
        result: Result<BatchResponse, SyncError>,
    ) {
        match result {
            Ok(response) => self.apply_batch_response(action, correlation_id, &sids, &response),
            Err(err) => self.revert_batch_failure(action, correlation_id, &sids, err),
        }
    }

    fn apply_batch_response(
        &mut self,
        action: SubscriptionAction,
        correlation_id: i64,
        sids: &[String],
        response: &BatchResponse,
    ) {
        if let Some(size) = response.max_batch_size.as_ref().and_then(as_positive_finite) {
            self.max_batch_size = size as usize;
        }

        if self.ttl_timer.is_none() {
            if let Some(ttl_in_s) = response.ttl_in_s.as_ref().and_then(as_positive_finite) {
                let tx = self.tx.clone();
                self.ttl_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs_f64(ttl_in_s)).await;
                    let _ = tx.send(EngineCommand::TtlElapsed).await;
                }));
            }
        }

        if action == SubscriptionAction::Establish {
            match response
                .estimated_delivery_in_ms
                .as_ref()
                .and_then(as_positive_finite)
            {
                Some(window_ms) => {
                    let window = Duration::from_secs_f64(window_ms / 1000.0);
                    self.arm_verify_timer(correlation_id, window, window);
                }
                None => error!(
                    correlation_id,
                    estimated_delivery = ?response.estimated_delivery_in_ms,
                    "Invalid delivery estimate"
                ),
            }

            for sid in sids {
                if let Some(confirmed) = self.confirmed.get_mut(sid) {
                    if confirmed.phase
                        == (SubscriptionPhase::EstablishPending { correlation_id })
                    {
                        confirmed.phase = SubscriptionPhase::ResponseInFlight { correlation_id };
                        confirmed
                            .entity
                            .set_subscription_state(SubscriptionState::ResponseInFlight);
                    }
                }
            }
        }

        self.reset_backoff();
    }

    /// Rolls the recorded attempts back. The correlation guard keeps a
    /// slow failure from clobbering state a newer batch already owns.
    fn revert_batch_failure(
        &mut self,
        action: SubscriptionAction,
        correlation_id: i64,
        sids: &[String],
        err: SyncError,
    ) {
        for sid in sids {
            let Some(confirmed) = self.confirmed.get_mut(sid) else {
                continue;
            };
            if confirmed.phase.pending_correlation() != Some(correlation_id) {
                continue;
            }
            confirmed
                .entity
                .set_subscription_state(SubscriptionState::None);
            match confirmed.phase {
                SubscriptionPhase::CancelPending {
                    was_established, ..
                } => {
                    confirmed.phase = if was_established {
                        SubscriptionPhase::Established
                    } else {
                        SubscriptionPhase::Idle
                    };
                }
                _ => {
                    self.confirmed.remove(sid);
                }
            }
        }

        if err.is_transport_unavailable() {
            debug!(correlation_id, "Connection not ready; waiting");
            self.reset_backoff();
        } else {
            debug!(
                correlation_id,
                action = %action,
                error = %err,
                "Subscription batch failed; retrying"
            );
            self.trigger_pass();
        }
    }

    // -------------------------------------------------------------------------
    // Delivery Verification
    // -------------------------------------------------------------------------

    /// `window` is the presumed-lost threshold and survives re-arms
    /// unchanged; only `delay` shrinks as replies extend the check.
    fn arm_verify_timer(&mut self, correlation_id: i64, window: Duration, delay: Duration) {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineCommand::VerifyDelivery { correlation_id }).await;
        });
        if let Some(previous) = self
            .verify_timers
            .insert(correlation_id, VerifyTimer { window, task })
        {
            previous.task.abort();
        }
    }

    /// If no reply for this batch arrived within the estimated window, the
    /// batch's pending entries are dropped and re-attempted. Replies
    /// observed inside the window extend it by the remaining silence.
    fn handle_verify_delivery(&mut self, correlation_id: i64) {
        let Some(timer) = self.verify_timers.remove(&correlation_id) else {
            return;
        };
        let window = timer.window;
        let silence = self
            .reply_arrivals
            .get(&correlation_id)
            .map_or(window, |arrival| arrival.elapsed());

        if silence >= window {
            let stale: Vec<String> = self
                .confirmed
                .iter()
                .filter(|(_, confirmed)| {
                    confirmed.phase.pending_correlation() == Some(correlation_id)
                })
                .map(|(sid, _)| sid.clone())
                .collect();
            if !stale.is_empty() {
                debug!(
                    correlation_id,
                    count = stale.len(),
                    "No replies within the delivery window; re-attempting batch"
                );
            }
            for sid in stale {
                self.confirmed.remove(&sid);
                if let Some(desired) = self.desired.get_mut(&sid) {
                    desired.retry_count += 1;
                }
            }
            self.reply_arrivals.remove(&correlation_id);
            self.trigger_pass();
        } else {
            self.arm_verify_timer(correlation_id, window, window - silence);
        }
    }

    // -------------------------------------------------------------------------
    // Incoming Messages
    // -------------------------------------------------------------------------

    fn handle_message(&mut self, message: PushMessage, strictly_ordered: bool) {
        trace!(event_type = %message.event_type, "Message received");
        if let Some(correlation_id) = message.correlation_id {
            self.reply_arrivals.insert(correlation_id, Instant::now());
        }
        match dispatcher::classify(&message.event_type) {
            MessageKind::Lifecycle(kind) => match dispatcher::parse_lifecycle(&message) {
                Ok(event) => match kind {
                    LifecycleKind::Established => {
                        self.apply_established(event, message.correlation_id)
                    }
                    LifecycleKind::Canceled => self.apply_canceled(event, message.correlation_id),
                    LifecycleKind::Failed => self.apply_failed(event, message.correlation_id),
                },
                Err(err) => warn!(error = %err, "Dropping malformed lifecycle message"),
            },
            MessageKind::Data(kind) => {
                self.apply_data_event(kind, message, strictly_ordered);
            }
            MessageKind::Unknown => {
                debug!(event_type = %message.event_type, "Dropping unknown message type");
            }
        }
    }

    fn matches_pending(phase: &SubscriptionPhase, correlation_id: Option<i64>) -> bool {
        match (phase.pending_correlation(), correlation_id) {
            (Some(pending), Some(received)) => pending == received,
            _ => false,
        }
    }

    /// Once no confirmed entry is waiting on a correlation id, its
    /// verification timer and reply bookkeeping can go.
    fn prune_resolved_correlation(&mut self, correlation_id: Option<i64>) {
        let Some(correlation_id) = correlation_id else {
            return;
        };
        let still_pending = self
            .confirmed
            .values()
            .any(|confirmed| confirmed.phase.pending_correlation() == Some(correlation_id));
        if !still_pending {
            if let Some(timer) = self.verify_timers.remove(&correlation_id) {
                timer.task.abort();
            }
            self.reply_arrivals.remove(&correlation_id);
        }
    }

    fn apply_established(&mut self, event: LifecycleEvent, correlation_id: Option<i64>) {
        let sid = event.object_sid;
        match self.confirmed.get_mut(&sid) {
            Some(confirmed) if Self::matches_pending(&confirmed.phase, correlation_id) => {
                match event.replay_status {
                    Some(ReplayStatus::Interrupted) => {
                        debug!(sid, ?correlation_id, "Event replay interrupted; continuing eagerly");
                        self.confirmed.remove(&sid);
                        self.reset_backoff();
                    }
                    Some(ReplayStatus::Completed) => {
                        debug!(sid, ?correlation_id, "Event replay completed; subscription is ready");
                        if let Some(last_event_id) = event.last_event_id {
                            confirmed.entity.advance_last_event_id(last_event_id);
                        }
                        confirmed.phase = SubscriptionPhase::Established;
                        confirmed
                            .entity
                            .set_subscription_state(SubscriptionState::Established);
                        self.reset_backoff();
                    }
                    None => {}
                }
            }
            _ => debug!(sid, ?correlation_id, "Late message dropped"),
        }
        self.prune_resolved_correlation(correlation_id);
        self.trigger_pass();
    }

    fn apply_canceled(&mut self, event: LifecycleEvent, correlation_id: Option<i64>) {
        let sid = event.object_sid;
        match self.confirmed.get(&sid) {
            Some(confirmed) if Self::matches_pending(&confirmed.phase, correlation_id) => {
                confirmed
                    .entity
                    .set_subscription_state(SubscriptionState::None);
                self.confirmed.remove(&sid);
            }
            _ => debug!(sid, ?correlation_id, "Late message dropped"),
        }
        self.prune_resolved_correlation(correlation_id);
        self.trigger_pass();
    }

    fn apply_failed(&mut self, event: LifecycleEvent, correlation_id: Option<i64>) {
        let sid = event.object_sid;
        let still_desired = self.desired.contains_key(&sid);
        match self.confirmed.get_mut(&sid) {
            Some(confirmed) if still_desired => {
                if Self::matches_pending(&confirmed.phase, correlation_id) {
                    error!(sid, error = ?event.error, "Subscription rejected by server");
                    confirmed.phase = SubscriptionPhase::Rejected;
                    confirmed.entity.report_failure(event.error.unwrap_or(ErrorInfo {
                        message: "Subscription failed".to_string(),
                        status: 0,
                        code: 0,
                    }));
                    confirmed
                        .entity
                        .set_subscription_state(SubscriptionState::None);
                }
            }
            Some(confirmed) => {
                confirmed
                    .entity
                    .set_subscription_state(SubscriptionState::None);
                self.confirmed.remove(&sid);
            }
            None => {}
        }
        self.prune_resolved_correlation(correlation_id);
        self.trigger_pass();
    }

    fn apply_data_event(
        &mut self,
        kind: nimbus_core::EntityKind,
        message: PushMessage,
        strictly_ordered: bool,
    ) {
        let Some(sid) = dispatcher::data_event_sid(kind, &message).map(str::to_string) else {
            return;
        };
        // Events are strictly ordered once replay has completed, even if
        // the connectivity layer could not vouch for this delivery.
        let strictly_ordered = strictly_ordered
            || self
                .confirmed
                .get(&sid)
                .is_some_and(|confirmed| confirmed.phase.is_established());

        match self.desired.get(&sid) {
            Some(desired) => {
                let mut event = message.event;
                if let Value::Object(fields) = &mut event {
                    fields.insert("type".to_string(), Value::String(message.event_type));
                }
                desired.entity.apply_event(event, strictly_ordered);
            }
            None => debug!(sid, "Message dropped; no subscription for sid"),
        }
    }

    // -------------------------------------------------------------------------
    // Connectivity, TTL, Replay
    // -------------------------------------------------------------------------

    fn handle_connection_state(&mut self, connected: bool) {
        self.connected = connected;
        if connected {
            self.poke(PokeReason::Reconnect);
        }
    }

    fn handle_ttl_elapsed(&mut self) {
        self.ttl_timer = None;
        if self.connected {
            self.poke(PokeReason::Ttl);
        }
    }

    /// Forces a full event replay: drops every non-rejected confirmed
    /// subscription so the next passes re-establish the whole desired set,
    /// tagging the first batch with the replay reason.
    fn poke(&mut self, reason: PokeReason) {
        debug!(reason = %reason, "Triggering event replay for all subscriptions");
        self.pending_poke_reason = Some(reason);
        if let Some(timer) = self.ttl_timer.take() {
            timer.abort();
        }
        let desired = &mut self.desired;
        self.confirmed.retain(|sid, confirmed| {
            confirmed
                .entity
                .set_subscription_state(SubscriptionState::None);
            confirmed.retry_count = 0;
            if let Some(desired) = desired.get_mut(sid) {
                desired.retry_count = 0;
            }
            // Rejected sids stay blocked until the caller re-subscribes.
            confirmed.phase.is_rejected()
        });
        self.trigger_pass();
    }

    // -------------------------------------------------------------------------
    // Status and Shutdown
    // -------------------------------------------------------------------------

    fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            desired: self.desired.len(),
            confirmed: self.confirmed.len(),
            established: self
                .confirmed
                .values()
                .filter(|confirmed| confirmed.phase.is_established())
                .count(),
            connected: self.connected,
            max_batch_size: self.max_batch_size,
        }
    }

    fn handle_shutdown(&mut self) {
        debug!("Shutting down subscription engine");
        self.reset_backoff();
        self.desired.clear();
        if let Some(timer) = self.ttl_timer.take() {
            timer.abort();
        }
        for (_, timer) in self.verify_timers.drain() {
            timer.task.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
