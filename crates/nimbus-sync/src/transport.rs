//! # Transport Contract and Request Executor
//!
//! The client consumes the network through two layers:
//!
//! - [`HttpTransport`]: the raw four-verb transport implemented outside
//!   this crate. It returns a [`Response`] for every HTTP outcome
//!   (including non-2xx) and fails only when the connection itself is
//!   unusable.
//! - [`RequestExecutor`]: wraps a raw transport with header construction
//!   and a short-horizon retry loop, and surfaces typed errors. This is
//!   the [`TransportClient`] the engine talks to.
//!
//! ## Retry Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Request Executor Outcomes                            │
//! │                                                                         │
//! │  2xx                      ──► Ok(Response)                              │
//! │  502 / 503 / 504          ──► retry with backoff (min 4s, max 60s,     │
//! │  429 (GET only)               90s horizon, Retry-After overrides)      │
//! │  transport unavailable    ──► retry within horizon, then surface       │
//! │  409                      ──► Err(Conflict {message, status, code})    │
//! │  other non-2xx            ──► Err(Server {message, status, code})      │
//! │                                                                         │
//! │  message fallback: 429 → "Throttled by server"                         │
//! │                    404 → "Not found from server"                       │
//! │                  other → "Error from server"                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Response
// =============================================================================

/// Outcome of one HTTP exchange, whatever the status.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,

    /// Parsed JSON body (may be `Value::Null` for empty bodies).
    pub body: Value,

    /// Response headers.
    pub headers: HashMap<String, String>,
}

impl Response {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `Retry-After` header in seconds, when present and numeric.
    fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("Retry-After")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

// =============================================================================
// Raw Transport Contract
// =============================================================================

/// The raw transport implemented by the embedding application.
///
/// Implementations perform authentication however they like. They must
/// resolve every HTTP exchange to a [`Response`] and reserve `Err` for
/// [`SyncError::TransportUnavailable`] (no usable connection) and other
/// local failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs a GET.
    async fn get(&self, uri: &str, headers: HashMap<String, String>) -> SyncResult<Response>;

    /// Performs a POST.
    async fn post(
        &self,
        uri: &str,
        headers: HashMap<String, String>,
        body: Value,
    ) -> SyncResult<Response>;

    /// Performs a PUT.
    async fn put(
        &self,
        uri: &str,
        headers: HashMap<String, String>,
        body: Value,
    ) -> SyncResult<Response>;

    /// Performs a DELETE.
    async fn delete(&self, uri: &str, headers: HashMap<String, String>) -> SyncResult<Response>;
}

// =============================================================================
// Executor-Facing Contract
// =============================================================================

/// The four-verb interface the engine consumes. [`RequestExecutor`] is the
/// production implementation; tests substitute mocks.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// GET with retry on transient statuses, including throttling.
    async fn get(&self, uri: &str) -> SyncResult<Response>;

    /// POST with retry on transient statuses. `revision` is sent as an
    /// `If-Match` guard when present.
    async fn post(&self, uri: &str, body: Value, revision: Option<&str>) -> SyncResult<Response>;

    /// PUT with retry on transient statuses and optional `If-Match` guard.
    async fn put(&self, uri: &str, body: Value, revision: Option<&str>) -> SyncResult<Response>;

    /// DELETE with retry on transient statuses.
    async fn delete(&self, uri: &str) -> SyncResult<Response>;
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Transient statuses always worth retrying.
const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

fn message_from_body(response: &Response) -> String {
    if let Some(message) = response.body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    match response.status {
        429 => "Throttled by server".to_string(),
        404 => "Not found from server".to_string(),
        _ => "Error from server".to_string(),
    }
}

fn code_from_body(response: &Response) -> u32 {
    response
        .body
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(0)
}

fn map_response_error(response: &Response) -> SyncError {
    let message = message_from_body(response);
    let code = code_from_body(response);
    if response.status == 409 {
        SyncError::Conflict {
            message,
            status: response.status,
            code,
        }
    } else {
        SyncError::Server {
            message,
            status: response.status,
            code,
        }
    }
}

// =============================================================================
// Request Executor
// =============================================================================

/// Retrying request executor over a raw [`HttpTransport`].
pub struct RequestExecutor<T: HttpTransport> {
    config: SyncConfig,
    transport: T,
}

impl<T: HttpTransport> RequestExecutor<T> {
    /// Creates a new executor.
    pub fn new(config: SyncConfig, transport: T) -> Self {
        RequestExecutor { config, transport }
    }

    /// Builds the headers attached to every request.
    fn create_headers(&self, revision: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".into(), "application/json".into());
        headers.insert(
            "Nimbus-Client-Info".into(),
            serde_json::to_string(&self.config.client).unwrap_or_default(),
        );
        headers.insert(
            "Nimbus-Request-Id".into(),
            format!("RQ{}", Uuid::new_v4().simple()),
        );
        if let Some(revision) = revision {
            headers.insert("If-Match".into(), revision.to_string());
        }
        headers
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        // current_interval is what next_backoff() actually hands out first;
        // leaving it defaulted would ignore the configured minimum delay.
        ExponentialBackoff {
            current_interval: Duration::from_millis(self.config.retry.min_delay_ms),
            initial_interval: Duration::from_millis(self.config.retry.min_delay_ms),
            max_interval: Duration::from_millis(self.config.retry.max_delay_ms),
            randomization_factor: self.config.retry.randomization_factor,
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_millis(self.config.retry.max_attempts_time_ms)),
            ..Default::default()
        }
    }

    /// Runs one logical request with the retry policy.
    ///
    /// Transient statuses and transport unavailability are retried until
    /// the horizon elapses; everything else is surfaced immediately as a
    /// typed error.
    async fn execute_with_retry<F, Fut>(
        &self,
        request: F,
        retry_when_throttled: bool,
    ) -> SyncResult<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SyncResult<Response>>,
    {
        let mut backoff = self.create_backoff();

        loop {
            let outcome = request().await;

            let (error, delay_override) = match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response)
                    if RETRYABLE_STATUSES.contains(&response.status)
                        || (retry_when_throttled && response.status == 429) =>
                {
                    let delay_override = response.retry_after();
                    (map_response_error(&response), delay_override)
                }
                Ok(response) => return Err(map_response_error(&response)),
                Err(err) if err.is_transport_unavailable() => (err, None),
                Err(err) => return Err(err),
            };

            let Some(delay) = delay_override.or_else(|| backoff.next_backoff()) else {
                return Err(error);
            };
            debug!(?delay, error = %error, "Transient transport failure; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<T: HttpTransport> TransportClient for RequestExecutor<T> {
    async fn get(&self, uri: &str) -> SyncResult<Response> {
        let headers = self.create_headers(None);
        debug!(uri, request_id = %headers["Nimbus-Request-Id"], "GET");
        self.execute_with_retry(|| self.transport.get(uri, headers.clone()), true)
            .await
    }

    async fn post(&self, uri: &str, body: Value, revision: Option<&str>) -> SyncResult<Response> {
        let headers = self.create_headers(revision);
        debug!(uri, request_id = %headers["Nimbus-Request-Id"], "POST");
        self.execute_with_retry(
            || self.transport.post(uri, headers.clone(), body.clone()),
            false,
        )
        .await
    }

    async fn put(&self, uri: &str, body: Value, revision: Option<&str>) -> SyncResult<Response> {
        let headers = self.create_headers(revision);
        debug!(uri, request_id = %headers["Nimbus-Request-Id"], "PUT");
        self.execute_with_retry(
            || self.transport.put(uri, headers.clone(), body.clone()),
            false,
        )
        .await
    }

    async fn delete(&self, uri: &str) -> SyncResult<Response> {
        let headers = self.create_headers(None);
        debug!(uri, request_id = %headers["Nimbus-Request-Id"], "DELETE");
        self.execute_with_retry(|| self.transport.delete(uri, headers.clone()), false)
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Raw transport fed from a scripted queue of outcomes.
    struct ScriptedTransport {
        outcomes: Mutex<Vec<SyncResult<Response>>>,
        requests: Mutex<Vec<HashMap<String, String>>>,
    }

    impl ScriptedTransport {
        fn new(mut outcomes: Vec<SyncResult<Response>>) -> Self {
            outcomes.reverse();
            ScriptedTransport {
                outcomes: Mutex::new(outcomes),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, headers: HashMap<String, String>) -> SyncResult<Response> {
            self.requests.lock().unwrap().push(headers);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(SyncError::TransportUnavailable))
        }

        fn attempts(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(
            &self,
            _uri: &str,
            headers: HashMap<String, String>,
        ) -> SyncResult<Response> {
            self.next(headers)
        }

        async fn post(
            &self,
            _uri: &str,
            headers: HashMap<String, String>,
            _body: Value,
        ) -> SyncResult<Response> {
            self.next(headers)
        }

        async fn put(
            &self,
            _uri: &str,
            headers: HashMap<String, String>,
            _body: Value,
        ) -> SyncResult<Response> {
            self.next(headers)
        }

        async fn delete(
            &self,
            _uri: &str,
            headers: HashMap<String, String>,
        ) -> SyncResult<Response> {
            self.next(headers)
        }
    }

    fn response(status: u16, body: Value) -> Response {
        Response {
            status,
            body,
            headers: HashMap::new(),
        }
    }

    fn executor(outcomes: Vec<SyncResult<Response>>) -> RequestExecutor<ScriptedTransport> {
        let config = SyncConfig::new("https://sync.nimbus.example/v3/Subscriptions");
        RequestExecutor::new(config, ScriptedTransport::new(outcomes))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_status_then_succeeds() {
        let executor = executor(vec![
            Ok(response(503, json!({}))),
            Ok(response(502, json!({}))),
            Ok(response(200, json!({"ok": true}))),
        ]);

        let result = executor
            .post("https://x/Subscriptions", json!({}), None)
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(executor.transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_fails_fast() {
        let executor = executor(vec![Ok(response(
            400,
            json!({"message": "Bad batch", "code": 54001}),
        ))]);

        let err = executor
            .post("https://x/Subscriptions", json!({}), None)
            .await
            .unwrap_err();
        match err {
            SyncError::Server {
                message,
                status,
                code,
            } => {
                assert_eq!(message, "Bad batch");
                assert_eq!(status, 400);
                assert_eq!(code, 54001);
            }
            other => panic!("expected server error, got {other:?}"),
        }
        assert_eq!(executor.transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_distinguished() {
        let executor = executor(vec![Ok(response(409, json!({})))]);

        let err = executor
            .put("https://x/Documents/DC1", json!({}), Some("rev-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict { status: 409, .. }));

        let headers = &executor.transport.requests.lock().unwrap()[0];
        assert_eq!(headers["If-Match"], "rev-4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_message_fallbacks() {
        let executor = executor(vec![Ok(response(404, json!({})))]);
        let err = executor.delete("https://x/Maps/MP9").await.unwrap_err();
        assert!(err.to_string().contains("Not found from server"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_retries_throttling_but_post_does_not() {
        let throttled = || Ok(response(429, json!({})));

        let get_executor = executor(vec![throttled(), Ok(response(200, json!({})))]);
        assert!(get_executor.get("https://x/Maps/MP1").await.is_ok());
        assert_eq!(get_executor.transport.attempts(), 2);

        let post_executor = executor(vec![throttled()]);
        let err = post_executor
            .post("https://x/Subscriptions", json!({}), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Throttled by server"));
        assert_eq!(post_executor.transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_retry_waits_configured_minimum() {
        let executor = executor(vec![
            Ok(response(503, json!({}))),
            Ok(response(200, json!({}))),
        ]);

        let started = tokio::time::Instant::now();
        assert!(executor.get("https://x/Maps/MP1").await.is_ok());

        // One retry, delayed by the 4s minimum (with 0.2 jitter).
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3200), "retried after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(4900), "retried after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_backoff_delay() {
        let mut headers = HashMap::new();
        headers.insert("Retry-After".to_string(), "1".to_string());
        let throttled = Response {
            status: 429,
            body: json!({}),
            headers,
        };

        let executor = executor(vec![Ok(throttled), Ok(response(200, json!({})))]);
        let started = tokio::time::Instant::now();
        assert!(executor.get("https://x/Maps/MP1").await.is_ok());

        // Well under the 4s retry minimum: the header override was used.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_horizon_surfaces_last_error() {
        let mut config = SyncConfig::new("https://sync.nimbus.example/v3/Subscriptions");
        config.retry.max_attempts_time_ms = 0;
        let executor = RequestExecutor::new(
            config,
            ScriptedTransport::new(vec![Ok(response(503, json!({})))]),
        );

        let err = executor
            .post("https://x/Subscriptions", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 503, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_unavailable_is_retried_then_surfaced() {
        let executor = executor(vec![
            Err(SyncError::TransportUnavailable),
            Ok(response(200, json!({}))),
        ]);
        assert!(executor.get("https://x/Maps/MP1").await.is_ok());
        assert_eq!(executor.transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_carry_client_info_and_request_id() {
        let executor = executor(vec![Ok(response(200, json!({})))]);
        executor.get("https://x/Maps/MP1").await.unwrap();

        let headers = &executor.transport.requests.lock().unwrap()[0];
        assert_eq!(headers["Content-Type"], "application/json");
        assert!(headers["Nimbus-Client-Info"].contains("nimbus-sync-rust"));
        assert!(headers["Nimbus-Request-Id"].starts_with("RQ"));
    }
}
