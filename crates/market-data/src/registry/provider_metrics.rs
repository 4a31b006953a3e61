//! Per-provider outcome counters and call latency.
//!
//! The router records every provider pass here: successes, failures by
//! kind, requests skipped by the breaker, and the latency of each completed
//! network call. Counters live for the lifetime of the router.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::errors::FailureKind;
use crate::models::ProviderId;

/// Failed passes broken down by failure kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub timeout: u64,
    pub transport: u64,
    pub rate_limited: u64,
    pub data_invalid: u64,
}

impl FailureCounts {
    fn record(&mut self, kind: FailureKind) {
        let counter = match kind {
            FailureKind::Timeout => &mut self.timeout,
            FailureKind::Transport => &mut self.transport,
            FailureKind::RateLimited => &mut self.rate_limited,
            FailureKind::DataInvalid => &mut self.data_invalid,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::Timeout => self.timeout,
            FailureKind::Transport => self.transport,
            FailureKind::RateLimited => self.rate_limited,
            FailureKind::DataInvalid => self.data_invalid,
        }
    }

    pub fn total(&self) -> u64 {
        self.timeout + self.transport + self.rate_limited + self.data_invalid
    }
}

/// Snapshot of one provider's counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProviderMetrics {
    /// Passes that produced a valid quote.
    pub successes: u64,
    /// Passes that exhausted their attempts, by the last error's kind.
    pub failures: FailureCounts,
    /// Requests the breaker refused without calling the provider.
    pub skipped: u64,
    /// Network calls that completed (either way) within the timeout.
    pub calls: u64,
    pub last_latency_ms: Option<u64>,
    pub mean_latency_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct Counters {
    successes: u64,
    failures: FailureCounts,
    skipped: u64,
    calls: u64,
    last_latency: Option<Duration>,
    total_latency: Duration,
}

impl Counters {
    fn snapshot(&self) -> ProviderMetrics {
        let mean_latency_ms = (self.calls > 0)
            .then(|| self.total_latency.as_secs_f64() * 1000.0 / self.calls as f64);
        ProviderMetrics {
            successes: self.successes,
            failures: self.failures,
            skipped: self.skipped,
            calls: self.calls,
            last_latency_ms: self
                .last_latency
                .map(|latency| u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
            mean_latency_ms,
        }
    }
}

/// Concurrent registry of per-provider counters.
#[derive(Debug, Default)]
pub struct ProviderMetricsRegistry {
    providers: DashMap<String, Counters>,
}

impl ProviderMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &ProviderId) {
        let mut counters = self.providers.entry(provider.to_string()).or_default();
        counters.successes = counters.successes.saturating_add(1);
    }

    pub fn record_failure(&self, provider: &ProviderId, kind: FailureKind) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .failures
            .record(kind);
    }

    pub fn record_skip(&self, provider: &ProviderId) {
        let mut counters = self.providers.entry(provider.to_string()).or_default();
        counters.skipped = counters.skipped.saturating_add(1);
    }

    /// Latency of one network call that returned before its timeout.
    pub fn record_latency(&self, provider: &ProviderId, latency: Duration) {
        let mut counters = self.providers.entry(provider.to_string()).or_default();
        counters.calls = counters.calls.saturating_add(1);
        counters.last_latency = Some(latency);
        counters.total_latency = counters.total_latency.saturating_add(latency);
    }

    /// Counters for one provider; all zero if it was never used.
    pub fn get(&self, provider: &ProviderId) -> ProviderMetrics {
        self.providers
            .get(provider.as_ref())
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderMetrics> {
        self.providers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    const YAHOO: ProviderId = Cow::Borrowed("YAHOO");
    const FINNHUB: ProviderId = Cow::Borrowed("FINNHUB");

    #[test]
    fn test_unused_provider_reports_zeroes() {
        let metrics = ProviderMetricsRegistry::new();
        assert_eq!(metrics.get(&YAHOO), ProviderMetrics::default());
        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn test_outcomes_are_counted_per_provider() {
        let metrics = ProviderMetricsRegistry::new();
        metrics.record_success(&YAHOO);
        metrics.record_success(&YAHOO);
        metrics.record_failure(&YAHOO, FailureKind::Timeout);
        metrics.record_failure(&FINNHUB, FailureKind::RateLimited);
        metrics.record_failure(&FINNHUB, FailureKind::RateLimited);
        metrics.record_skip(&FINNHUB);

        let yahoo = metrics.get(&YAHOO);
        assert_eq!(yahoo.successes, 2);
        assert_eq!(yahoo.failures.get(FailureKind::Timeout), 1);
        assert_eq!(yahoo.skipped, 0);

        let finnhub = metrics.get(&FINNHUB);
        assert_eq!(finnhub.successes, 0);
        assert_eq!(finnhub.failures.rate_limited, 2);
        assert_eq!(finnhub.failures.total(), 2);
        assert_eq!(finnhub.skipped, 1);

        let ids: Vec<String> = metrics.snapshot().into_keys().collect();
        assert_eq!(ids, vec!["FINNHUB".to_string(), "YAHOO".to_string()]);
    }

    #[test]
    fn test_latency_last_and_mean() {
        let metrics = ProviderMetricsRegistry::new();
        metrics.record_latency(&YAHOO, Duration::from_millis(100));
        metrics.record_latency(&YAHOO, Duration::from_millis(300));

        let yahoo = metrics.get(&YAHOO);
        assert_eq!(yahoo.calls, 2);
        assert_eq!(yahoo.last_latency_ms, Some(300));
        let mean = yahoo.mean_latency_ms.unwrap();
        assert!((mean - 200.0).abs() < 1e-6, "mean {}", mean);
    }

    #[test]
    fn test_serializes_field_names() {
        let metrics = ProviderMetricsRegistry::new();
        metrics.record_failure(&YAHOO, FailureKind::DataInvalid);

        let json = serde_json::to_value(metrics.get(&YAHOO)).unwrap();
        assert_eq!(json["failures"]["data_invalid"], 1);
        assert_eq!(json["last_latency_ms"], serde_json::Value::Null);
    }
}
