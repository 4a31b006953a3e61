//! Property-based tests for the resilience primitives.
//!
//! These tests verify that backoff, breaker and cache invariants hold across
//! randomly generated inputs, using the `proptest` crate.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use marketpulse_market_data::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureKind, ManualClock, ProviderId,
    Quote, QuoteCache, RetryPolicy,
};

// =============================================================================
// Generators
// =============================================================================

fn arb_failure_kind() -> impl Strategy<Value = FailureKind> {
    prop_oneof![
        Just(FailureKind::Timeout),
        Just(FailureKind::Transport),
        Just(FailureKind::RateLimited),
        Just(FailureKind::DataInvalid),
    ]
}

fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
    (
        1u32..10,         // max_attempts
        1u64..5_000,      // base_delay (ms)
        1u64..120_000,    // max_delay headroom (ms)
        1.0f64..4.0,      // multiplier
    )
        .prop_map(|(max_attempts, base_ms, headroom_ms, multiplier)| RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(base_ms + headroom_ms),
            multiplier,
            jitter: false,
        })
}

fn arb_quote() -> impl Strategy<Value = Quote> {
    (
        "[A-Z]{1,5}",                  // symbol
        1i64..10_000_000_000,          // price mantissa
        0u32..8,                       // price scale
        "[A-Z]{3}",                    // currency
        1_600_000_000i64..1_900_000_000, // timestamp
        prop_oneof![Just("YAHOO"), Just("FINNHUB"), Just("POLYGON")],
    )
        .prop_map(|(symbol, mantissa, scale, currency, ts, provider)| {
            Quote::new(
                symbol,
                Decimal::new(mantissa, scale),
                currency,
                Utc.timestamp_opt(ts, 0).unwrap(),
                provider,
            )
        })
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Delays between attempts never shrink and never exceed the cap.
    #[test]
    fn prop_backoff_is_monotonic_and_capped(policy in arb_retry_policy()) {
        prop_assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);

        let delays: Vec<Duration> = (2..=policy.max_attempts + 5)
            .map(|k| policy.delay_before_attempt(k))
            .collect();

        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{:?} then {:?}", pair[0], pair[1]);
        }
        for delay in &delays {
            prop_assert!(*delay <= policy.max_delay);
        }
        prop_assert!(delays[0] <= policy.base_delay);
    }

    /// A Closed breaker opens exactly when the weighted failure count
    /// reaches the threshold, and refuses calls until the cooldown ends.
    #[test]
    fn prop_breaker_opens_at_weighted_threshold(
        threshold in 1u32..10,
        kinds in proptest::collection::vec(arb_failure_kind(), 1..20),
    ) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(60),
                failure_window: None,
            },
            Arc::new(clock.clone()),
        );
        let id: ProviderId = Cow::Borrowed("PROP");

        let mut weight = 0u32;
        for kind in kinds {
            if breaker.state(&id) == CircuitState::Open {
                break;
            }
            prop_assert!(breaker.is_allowed(&id));
            breaker.record_failure(&id, kind);
            weight += kind.breaker_weight();

            let expected = if weight >= threshold {
                CircuitState::Open
            } else {
                CircuitState::Closed
            };
            prop_assert_eq!(breaker.state(&id), expected);
        }

        if breaker.state(&id) == CircuitState::Open {
            prop_assert!(!breaker.is_allowed(&id));
            clock.advance(Duration::from_secs(59));
            prop_assert!(!breaker.is_allowed(&id));
            clock.advance(Duration::from_secs(1));
            prop_assert!(breaker.is_allowed(&id));
            prop_assert_eq!(breaker.state(&id), CircuitState::HalfOpen);
            prop_assert!(!breaker.is_allowed(&id));
        }
    }

    /// One success clears any failure history short of the threshold.
    #[test]
    fn prop_success_resets_failures(
        kinds in proptest::collection::vec(arb_failure_kind(), 0..4),
    ) {
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        });
        let id: ProviderId = Cow::Borrowed("PROP");

        for kind in kinds {
            breaker.record_failure(&id, kind);
        }
        breaker.record_success(&id);

        prop_assert_eq!(breaker.failure_count(&id), 0);
        prop_assert_eq!(breaker.state(&id), CircuitState::Closed);
    }

    /// A quote read back within its TTL equals the quote written.
    #[test]
    fn prop_cache_roundtrip_within_ttl(quote in arb_quote(), elapsed_ms in 0u64..5_000) {
        let clock = ManualClock::new();
        let cache = QuoteCache::with_clock(Duration::from_secs(5), Arc::new(clock.clone()));

        prop_assert_eq!(cache.put(quote.clone()), quote.clone());
        clock.advance(Duration::from_millis(elapsed_ms));

        let cached = cache.get(&quote.symbol);
        prop_assert_eq!(cached, Some(quote));
    }
}
