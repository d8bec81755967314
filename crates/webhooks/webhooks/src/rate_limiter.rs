//! Rate limiter for inbound webhook sources.
//!
//! Provides a token bucket per client identity (usually the remote IP):
//! - Fixed capacity per bucket
//! - Full refill once the interval has elapsed (no gradual leak)
//! - Lazy bucket creation on first sight of an identity
//! - Idle bucket eviction

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Rate limit configuration shared by every bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Requests allowed per interval.
    pub max_tokens: u32,

    /// Refill interval in whole seconds.
    pub interval_secs: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            interval_secs: 60,
        }
    }
}

impl RateLimit {
    /// Creates a new rate limit. Intervals are kept in whole seconds; a
    /// fractional interval is rounded up.
    pub fn new(max_tokens: u32, interval: Duration) -> Self {
        let whole = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
        Self {
            max_tokens,
            interval_secs: whole,
        }
    }

    /// Refill interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Token bucket for a single identity.
#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    max_tokens: u32,
    refill_at: Instant,
    interval: Duration,
}

impl TokenBucket {
    fn new(limit: &RateLimit, now: Instant) -> Self {
        let interval = limit.interval();
        Self {
            tokens: limit.max_tokens,
            max_tokens: limit.max_tokens,
            refill_at: now + interval,
            interval,
        }
    }

    fn take(&mut self, now: Instant) -> bool {
        if now > self.refill_at {
            self.tokens = self.max_tokens;
            self.refill_at = now + self.interval;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Per-identity token bucket rate limiter.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    limit: RateLimit,
}

impl RateLimiter {
    /// Create a rate limiter with default limits (10 per minute).
    pub fn new() -> Self {
        Self::with_limit(RateLimit::default())
    }

    /// Create a rate limiter with custom limits.
    pub fn with_limit(limit: RateLimit) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            limit,
        }
    }

    /// Consumes one token for `identity`, returning whether the call is allowed.
    pub async fn allow(&self, identity: &str) -> bool {
        let bucket = self.get_or_create_bucket(identity).await;
        let mut bucket = bucket.lock().await;
        bucket.take(Instant::now())
    }

    /// Tokens left for an identity, `None` if it has never been seen.
    pub async fn remaining(&self, identity: &str) -> Option<u32> {
        let bucket = self.buckets.read().await.get(identity).cloned()?;
        let tokens = bucket.lock().await.tokens;
        Some(tokens)
    }

    /// Number of tracked identities.
    pub async fn tracked(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Drops buckets whose refill deadline passed more than `max_idle` ago.
    ///
    /// Such a bucket would be fully refilled on its next use anyway, so
    /// forgetting it does not change any caller-visible decision.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();

        let mut stale = Vec::new();
        for (identity, bucket) in buckets.iter() {
            let bucket = bucket.lock().await;
            if now > bucket.refill_at + max_idle {
                stale.push(identity.clone());
            }
        }
        for identity in stale {
            buckets.remove(&identity);
        }

        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "Swept idle rate limit buckets");
        }
        removed
    }

    /// Runs [`sweep_idle`](Self::sweep_idle) every `every` until `cancel` fires.
    ///
    /// A zero period is raised to one second.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_PERIOD));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_idle(max_idle).await;
                    }
                }
            }
        })
    }

    async fn get_or_create_bucket(&self, identity: &str) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(identity) {
                return bucket.clone();
            }
        }

        // Another caller may have inserted between the two locks.
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(&self.limit, Instant::now()))))
            .clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
