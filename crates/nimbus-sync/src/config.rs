//! # Sync Configuration
//!
//! Configuration for the subscription client.
//!
//! ## Tuning Knobs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Configuration Overview                              │
//! │                                                                         │
//! │  [backoff]   Reconciliation-pass debounce                              │
//! │              initial 100 ms → max 120 s, 0.2 jitter                    │
//! │              Coalesces add/remove storms into few batches              │
//! │                                                                         │
//! │  [retry]     Transport retry loop (inside RequestExecutor)             │
//! │              min 4 s → max 60 s, 90 s total horizon, 0.2 jitter        │
//! │              Applies to 502/503/504 (and 429 for GET)                  │
//! │                                                                         │
//! │  [client]    Client info advertised in request headers                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Backoff Settings
// =============================================================================

/// Exponential-backoff settings for the reconciliation-pass debounce timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// Initial delay before a scheduled pass runs (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between passes (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter factor in `[0, 1)` applied to every delay.
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    2 * 60 * 1000
}

fn default_randomization() -> f64 {
    0.2
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            randomization_factor: default_randomization(),
        }
    }
}

// =============================================================================
// Transport Retry Settings
// =============================================================================

/// Retry settings for the transport request executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Minimum delay between attempts (milliseconds).
    #[serde(default = "default_min_retry_delay")]
    pub min_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    #[serde(default = "default_max_retry_delay")]
    pub max_delay_ms: u64,

    /// Total time budget for one logical request, including retries
    /// (milliseconds). Once elapsed, the last error is surfaced.
    #[serde(default = "default_max_attempts_time")]
    pub max_attempts_time_ms: u64,

    /// Jitter factor in `[0, 1)` applied to every delay.
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
}

fn default_min_retry_delay() -> u64 {
    4000
}

fn default_max_retry_delay() -> u64 {
    60_000
}

fn default_max_attempts_time() -> u64 {
    90_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            min_delay_ms: default_min_retry_delay(),
            max_delay_ms: default_max_retry_delay(),
            max_attempts_time_ms: default_max_attempts_time(),
            randomization_factor: default_randomization(),
        }
    }
}

// =============================================================================
// Client Info
// =============================================================================

/// Identification advertised to the server in every request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// SDK name.
    #[serde(default = "default_sdk_name")]
    pub sdk: String,

    /// SDK version.
    #[serde(default = "default_sdk_version")]
    pub version: String,
}

fn default_sdk_name() -> String {
    "nimbus-sync-rust".to_string()
}

fn default_sdk_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ClientInfo {
    fn default() -> Self {
        ClientInfo {
            sdk: default_sdk_name(),
            version: default_sdk_version(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// URI of the subscriptions endpoint batches are POSTed to.
    pub subscriptions_uri: String,

    /// Reconciliation-pass backoff settings.
    #[serde(default)]
    pub backoff: BackoffSettings,

    /// Transport retry settings.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Client identification for request headers.
    #[serde(default)]
    pub client: ClientInfo,
}

impl SyncConfig {
    /// Creates a configuration with defaults for the given endpoint.
    pub fn new(subscriptions_uri: impl Into<String>) -> Self {
        SyncConfig {
            subscriptions_uri: subscriptions_uri.into(),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        Url::parse(&self.subscriptions_uri)?;

        if self.backoff.initial_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "backoff.initial_delay_ms must be greater than 0".into(),
            ));
        }
        if self.backoff.max_delay_ms < self.backoff.initial_delay_ms {
            return Err(SyncError::InvalidConfig(
                "backoff.max_delay_ms must be >= backoff.initial_delay_ms".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.randomization_factor)
            || !(0.0..1.0).contains(&self.retry.randomization_factor)
        {
            return Err(SyncError::InvalidConfig(
                "randomization_factor must be in [0, 1)".into(),
            ));
        }
        if self.retry.min_delay_ms == 0 || self.retry.max_delay_ms < self.retry.min_delay_ms {
            return Err(SyncError::InvalidConfig(
                "retry delays must satisfy 0 < min_delay_ms <= max_delay_ms".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::new("https://sync.nimbus.example/v3/Subscriptions");
        assert_eq!(config.backoff.initial_delay_ms, 100);
        assert_eq!(config.backoff.max_delay_ms, 120_000);
        assert_eq!(config.retry.min_delay_ms, 4000);
        assert_eq!(config.retry.max_attempts_time_ms, 90_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::new("not a uri");
        assert!(config.validate().is_err());

        config.subscriptions_uri = "https://sync.nimbus.example/v3/Subscriptions".into();
        assert!(config.validate().is_ok());

        config.backoff.initial_delay_ms = 0;
        assert!(config.validate().is_err());

        config.backoff.initial_delay_ms = 100;
        config.retry.randomization_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_info_defaults() {
        let info = ClientInfo::default();
        assert_eq!(info.sdk, "nimbus-sync-rust");
        assert!(!info.version.is_empty());
    }
}
