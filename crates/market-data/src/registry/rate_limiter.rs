//! Token bucket rate limiter for quote providers.
//!
//! Implements per-provider rate limiting using the token bucket algorithm.
//! Providers that declare a [`RateLimit`](crate::provider::RateLimit) get a
//! bucket sized from it; unconfigured providers are not throttled.
//!
//! Time is read from `tokio::time::Instant`, so refills follow tokio's clock
//! (including a paused test clock).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::models::ProviderId;
use crate::provider::RateLimit;

/// Default bucket capacity (allows bursting).
const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
}

impl TokenBucket {
    fn with_config(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst_capacity,
            last_update: Instant::now(),
            rate: f64::from(config.requests_per_minute.max(1)) / 60.0,
            capacity: config.burst_capacity,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Try to acquire a token immediately.
    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Calculate the wait time until a token becomes available.
    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum requests per minute.
    pub requests_per_minute: u32,
    /// Maximum burst capacity.
    pub burst_capacity: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

impl From<&RateLimit> for RateLimitConfig {
    fn from(limit: &RateLimit) -> Self {
        // Burst never exceeds the per-minute budget (Alpha Vantage: 5/min).
        let burst = DEFAULT_BUCKET_CAPACITY.min(f64::from(limit.requests_per_minute.max(1)));
        Self {
            requests_per_minute: limit.requests_per_minute,
            burst_capacity: burst,
        }
    }
}

/// Token bucket rate limiter for multiple providers.
///
/// Thread-safe; each configured provider has its own bucket.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    configs: Mutex<HashMap<String, RateLimitConfig>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the buckets mutex, recovering from poison if necessary.
    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter buckets mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure rate limits for a specific provider.
    pub fn configure(&self, provider: &ProviderId, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(provider.to_string(), config);
        drop(configs); // Release configs lock before acquiring buckets lock

        // Reset the bucket if it already exists
        self.lock_buckets().remove(provider.as_ref());
    }

    /// Whether a provider has a configured limit.
    pub fn is_configured(&self, provider: &ProviderId) -> bool {
        self.lock_configs().contains_key(provider.as_ref())
    }

    /// Acquire a token for the given provider, waiting asynchronously until
    /// one is available. Returns immediately for unconfigured providers.
    pub async fn acquire(&self, provider: &ProviderId) {
        loop {
            let wait_time = {
                let mut buckets = self.lock_buckets();

                if !buckets.contains_key(provider.as_ref()) {
                    match self.create_bucket(provider) {
                        Some(bucket) => {
                            buckets.insert(provider.to_string(), bucket);
                        }
                        None => return,
                    }
                }
                let Some(bucket) = buckets.get_mut(provider.as_ref()) else {
                    return;
                };

                if bucket.try_acquire() {
                    debug!("Rate limiter: acquired token for '{}'", provider);
                    return;
                }

                bucket.time_until_available()
            };

            if wait_time > Duration::ZERO {
                debug!(
                    "Rate limiter: waiting {:?} for provider '{}'",
                    wait_time, provider
                );
                tokio::time::sleep(wait_time).await;
            }
        }
    }

    /// Try to acquire a token without waiting.
    ///
    /// Returns true if a token was acquired (always, for unconfigured providers).
    pub fn try_acquire(&self, provider: &ProviderId) -> bool {
        let mut buckets = self.lock_buckets();

        if !buckets.contains_key(provider.as_ref()) {
            match self.create_bucket(provider) {
                Some(bucket) => {
                    buckets.insert(provider.to_string(), bucket);
                }
                None => return true,
            }
        }

        buckets
            .get_mut(provider.as_ref())
            .map_or(true, TokenBucket::try_acquire)
    }

    /// Remaining tokens for a provider, or `None` if it is unthrottled.
    pub fn remaining_tokens(&self, provider: &ProviderId) -> Option<f64> {
        let mut buckets = self.lock_buckets();

        if let Some(bucket) = buckets.get_mut(provider.as_ref()) {
            bucket.refill();
            return Some(bucket.tokens);
        }
        drop(buckets);

        self.lock_configs()
            .get(provider.as_ref())
            .map(|config| config.burst_capacity)
    }

    /// Reset the bucket for a provider back to full.
    pub fn reset(&self, provider: &ProviderId) {
        self.lock_buckets().remove(provider.as_ref());
    }

    fn create_bucket(&self, provider: &ProviderId) -> Option<TokenBucket> {
        self.lock_configs()
            .get(provider.as_ref())
            .map(TokenBucket::with_config)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
