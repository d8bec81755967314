//! Dispatcher and inbound router configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::delivery::DEFAULT_USER_AGENT;
use crate::endpoint::{DEFAULT_MAX_RETRIES, UrlPolicy};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::rate_limiter::RateLimit;

/// How deliveries are scheduled by `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Deliveries run inline, in registry order, before `publish` returns.
    Sync,
    /// Each delivery runs as its own task; `publish` returns once scheduled.
    #[default]
    Async,
}

/// Outgoing dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delivery scheduling mode.
    pub mode: DeliveryMode,
    /// Events retained in history.
    pub history_capacity: usize,
    /// Retries granted to endpoints that do not set their own.
    pub default_max_retries: u32,
    /// Backoff unit; the wait before retry `n` is `base * 2^n`.
    pub backoff_base_secs: u64,
    /// Upper bound for a single backoff wait.
    pub max_backoff_secs: u64,
    /// Per-attempt HTTP timeout.
    pub request_timeout_secs: u64,
    /// User agent sent with every delivery.
    pub user_agent: String,
    /// Deliveries allowed in flight per endpoint in async mode.
    pub max_concurrent_per_endpoint: usize,
    /// Endpoint URL rules.
    pub url_policy: UrlPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Async,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            default_max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_secs: 1,
            max_backoff_secs: 3600,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_concurrent_per_endpoint: 4,
            url_policy: UrlPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delivery mode.
    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the history capacity.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the URL policy.
    pub fn url_policy(mut self, policy: UrlPolicy) -> Self {
        self.url_policy = policy;
        self
    }

    /// Sets the per-endpoint concurrency bound.
    pub fn max_concurrent_per_endpoint(mut self, max: usize) -> Self {
        self.max_concurrent_per_endpoint = max;
        self
    }

    /// Backoff unit as a duration.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    /// Longest single backoff wait.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Per-attempt HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Default inbound payload limit (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;

/// Inbound router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// IP addresses and CIDR blocks allowed to call in; empty allows all.
    pub allowed_ips: Vec<String>,
    /// Per-remote-address rate limit.
    pub rate_limit: RateLimit,
    /// Largest accepted payload.
    pub max_payload_bytes: u64,
    /// Reject unsigned calls to sources that have a secret.
    pub require_signature: bool,
    /// Rate limit buckets idle this long past their refill are dropped.
    pub bucket_idle_secs: u64,
    /// How often idle buckets are swept.
    pub sweep_interval_secs: u64,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            rate_limit: RateLimit::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            require_signature: false,
            bucket_idle_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

impl InboundConfig {
    /// Sets the allow-list.
    pub fn allowed_ips(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_ips = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the rate limit.
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Idle time after which a rate limit bucket is dropped.
    pub fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }

    /// Period of the idle bucket sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
