//! Bounded retry with exponential backoff.
//!
//! One [`RetryPolicy::execute_paced`] call drives every attempt against a
//! single provider. Each attempt waits for a rate-limit token and is bounded
//! by a timeout; between attempts the
//! policy sleeps for `base_delay * multiplier^(n-2)`, capped at `max_delay`.
//! Errors classified [`RetryClass::AbortProvider`] end the loop at once.

use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;

use crate::errors::{ProviderError, RetryClass};
use crate::models::ProviderId;

use super::rate_limiter::RateLimiter;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Jitter bounds applied to each delay when enabled.
const JITTER_MIN: f64 = 0.8;
const JITTER_MAX: f64 = 1.2;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per provider, including the first. Never less than 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.8, 1.2].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: false,
        }
    }
}

/// Result of driving one provider through the retry loop.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    /// Attempts actually made (at least 1).
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn attempts_allowed(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep before `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let scaled = if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::try_from_secs_f64(scaled).unwrap_or(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an aborting error, or the
    /// attempt budget is spent.
    ///
    /// Each attempt first waits for a token from `limiter` (providers it has
    /// no limit for are not throttled), then runs bounded by `timeout`; an
    /// attempt that overruns is dropped and reported as a timeout. Time spent
    /// waiting for a token does not count against the attempt timeout.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute_paced<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        provider: &ProviderId,
        timeout: Duration,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.attempts_allowed();
        let mut attempt = 1;

        loop {
            limiter.acquire(provider).await;

            let result = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(provider.to_string(), timeout)),
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(error) => error,
            };

            if error.retry_class() == RetryClass::AbortProvider {
                debug!(
                    "Retry: '{}' attempt {} failed with non-retryable error: {}",
                    provider, attempt, error
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                debug!(
                    "Retry: '{}' exhausted {} attempt(s), last error: {}",
                    provider, attempt, error
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            attempt += 1;
            let delay = self.delay_before_attempt(attempt);
            debug!(
                "Retry: '{}' failed ({}), attempt {}/{} in {:?}",
                provider, error, attempt, max_attempts, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
