//! Quote router: cache, circuit breakers, retries and provider fallback.
//!
//! A single [`ProviderRouter::get_quote`] call is one logical request:
//!
//! 1. Validate the symbol (`InvalidSymbol` before any network call)
//! 2. Return a fresh cache entry if there is one
//! 3. Walk providers in ascending priority:
//!    - skip providers whose breaker refuses the call
//!    - otherwise run the retry policy (rate-limited, each attempt bounded by
//!      the provider timeout, every quote validated)
//!    - success: close the breaker, write the cache, return
//!    - exhaustion: record the failure with the breaker (holding the provider
//!      off for its `Retry-After`, if given), try the next one
//! 4. When every provider was skipped or failed, serve a stale cache entry
//!    if it is young enough, else `NoProviderAvailable`
//!
//! The whole provider list is never retried from here; callers that need a
//! persistent feed re-invoke `get_quote` on their own schedule.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use super::{
    CacheStats, CircuitBreaker, CircuitState, FetchDiagnostics, ProviderMetrics,
    ProviderMetricsRegistry, QuoteCache, QuoteValidator, RateLimitConfig, RateLimiter,
    RetryOutcome, RetryPolicy, SkipReason,
};
use crate::clock::{Clock, SystemClock};
use crate::config::MarketDataConfig;
use crate::errors::{MarketDataError, ProviderError, ProviderFailure};
use crate::models::{
    CircuitTestReport, ProbeOutcome, ProviderId, ProviderStatus, Quote, QuoteOutcome, QuoteSource,
    QuoteStatus, Symbol, SymbolPolicy,
};
use crate::provider::ConfiguredProvider;

/// Releases a claimed HalfOpen probe slot if the request is dropped before
/// its outcome is recorded.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    provider: &'a ProviderId,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, provider: &'a ProviderId) -> Self {
        let armed = breaker.state(provider) == CircuitState::HalfOpen;
        Self {
            breaker,
            provider,
            armed,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(self.provider);
        }
    }
}

/// Routes quote requests across providers.
///
/// Owns every piece of shared state (breakers, cache, rate limiter); build
/// one at startup and share it behind an `Arc`.
pub struct ProviderRouter {
    providers: Vec<ConfiguredProvider>,
    circuit_breaker: CircuitBreaker,
    cache: QuoteCache,
    retry: RetryPolicy,
    rate_limiter: RateLimiter,
    validator: QuoteValidator,
    metrics: ProviderMetricsRegistry,
    symbols: SymbolPolicy,
    stale_max_age: Option<Duration>,
    circuit_test_symbol: String,
}

impl ProviderRouter {
    /// Create a router with default settings.
    pub fn new(providers: Vec<ConfiguredProvider>) -> Result<Self, MarketDataError> {
        Self::with_config(&MarketDataConfig::default(), providers)
    }

    /// Create a router from loaded configuration.
    pub fn with_config(
        config: &MarketDataConfig,
        providers: Vec<ConfiguredProvider>,
    ) -> Result<Self, MarketDataError> {
        Self::with_clock(config, providers, Arc::new(SystemClock))
    }

    /// Create a router whose breakers and cache read time from `clock`.
    pub fn with_clock(
        config: &MarketDataConfig,
        mut providers: Vec<ConfiguredProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MarketDataError> {
        if providers.is_empty() {
            return Err(MarketDataError::NoProvidersConfigured);
        }
        providers.sort_by_key(|p| p.descriptor.priority);

        let rate_limiter = RateLimiter::new();
        for provider in &providers {
            if let Some(limit) = &provider.rate_limit {
                rate_limiter.configure(&provider.descriptor.id, RateLimitConfig::from(limit));
            }
        }

        info!(
            "Quote router ready with providers {:?}",
            providers
                .iter()
                .map(|p| &*p.descriptor.id)
                .collect::<Vec<&str>>()
        );

        Ok(Self {
            providers,
            circuit_breaker: CircuitBreaker::with_clock(config.breaker.clone(), clock.clone()),
            cache: QuoteCache::with_clock(config.cache_ttl, clock),
            retry: config.retry.clone(),
            rate_limiter,
            validator: QuoteValidator::new(),
            metrics: ProviderMetricsRegistry::new(),
            symbols: config.symbols.clone(),
            stale_max_age: config.stale_max_age,
            circuit_test_symbol: config.circuit_test_symbol.clone(),
        })
    }

    /// Replace the quote validator.
    pub fn with_validator(mut self, validator: QuoteValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Latest quote for `symbol`, from cache or the first provider that
    /// delivers one.
    pub async fn get_quote(&self, symbol: &str) -> Result<QuoteOutcome, MarketDataError> {
        self.route(symbol, None).await
    }

    /// Like [`get_quote`](Self::get_quote), with `ttl` deciding freshness of
    /// the cached entry and the lifetime of a newly fetched one.
    pub async fn get_quote_with_ttl(
        &self,
        symbol: &str,
        ttl: Duration,
    ) -> Result<QuoteOutcome, MarketDataError> {
        self.route(symbol, Some(ttl)).await
    }

    async fn route(
        &self,
        raw_symbol: &str,
        ttl: Option<Duration>,
    ) -> Result<QuoteOutcome, MarketDataError> {
        let symbol = Symbol::parse(raw_symbol, &self.symbols)?;

        let cached = match ttl {
            Some(ttl) => self.cache.get_with_ttl(symbol.as_str(), ttl),
            None => self.cache.get(symbol.as_str()),
        };
        if let Some(quote) = cached {
            debug!("Quote cache hit for {}", symbol);
            return Ok(QuoteOutcome {
                quote,
                source: QuoteSource::Cache,
            });
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut failures = Vec::new();

        for provider in &self.providers {
            match self
                .fetch_with_breaker(provider, &symbol, &self.retry, &mut diagnostics)
                .await
            {
                Ok(quote) => {
                    if !failures.is_empty() {
                        info!(
                            "Quote for {} served after fallback: {}",
                            symbol,
                            diagnostics.summary()
                        );
                    }
                    let quote = self.store(quote, ttl);
                    return Ok(QuoteOutcome {
                        quote,
                        source: QuoteSource::Network,
                    });
                }
                Err(failure) => failures.push(failure),
            }
        }

        warn!(
            "All providers exhausted for {}: {}",
            symbol,
            diagnostics.summary()
        );
        self.stale_or_fail(&symbol, failures)
    }

    /// Fetch `symbol` from one provider under its breaker and the retry
    /// policy. No fallback and no cache read; the cache is written on success.
    pub async fn fetch_from(
        &self,
        provider_id: &str,
        symbol: &str,
    ) -> Result<Quote, MarketDataError> {
        let provider = self.find(provider_id)?;
        let symbol = Symbol::parse(symbol, &self.symbols)?;
        let mut diagnostics = FetchDiagnostics::new();

        match self
            .fetch_with_breaker(provider, &symbol, &self.retry, &mut diagnostics)
            .await
        {
            Ok(quote) => {
                self.store(quote.clone(), None);
                Ok(quote)
            }
            Err(ProviderFailure::Unavailable { provider }) => {
                Err(MarketDataError::ProviderUnavailable { provider })
            }
            Err(ProviderFailure::Failed { error, .. }) => Err(MarketDataError::Provider(error)),
        }
    }

    /// Cache and breaker view for `symbol`.
    pub fn get_status(&self, symbol: &str) -> Result<QuoteStatus, MarketDataError> {
        let symbol = Symbol::parse(symbol, &self.symbols)?;
        let cached = self.cache.peek(symbol.as_str());

        let breaker_states: BTreeMap<String, ProviderStatus> = self
            .providers
            .iter()
            .map(|p| {
                let id = &p.descriptor.id;
                (
                    id.to_string(),
                    ProviderStatus {
                        state: self.circuit_breaker.state(id),
                        consecutive_failures: self.circuit_breaker.failure_count(id),
                        retry_after_secs: self
                            .circuit_breaker
                            .held_for(id)
                            .map(|left| left.as_secs() + u64::from(left.subsec_nanos() > 0)),
                        priority: p.descriptor.priority,
                        weight: p.descriptor.weight,
                        metrics: self.metrics.get(id),
                    },
                )
            })
            .collect();

        Ok(QuoteStatus {
            symbol: symbol.to_string(),
            cached: cached.is_some(),
            fresh: cached.as_ref().is_some_and(|c| c.fresh),
            cache_age_secs: cached.map(|c| c.age.as_secs()),
            breaker_states,
        })
    }

    /// Force a trip-and-probe cycle on one provider's breaker.
    ///
    /// The breaker is tripped Open, moved straight to HalfOpen and a single
    /// probe fetch of the circuit test symbol decides the final state. The
    /// probe is not cached.
    pub async fn test_circuit(
        &self,
        provider_id: &str,
    ) -> Result<CircuitTestReport, MarketDataError> {
        let provider = self.find(provider_id)?;
        let id = &provider.descriptor.id;
        let symbol = Symbol::parse(&self.circuit_test_symbol, &SymbolPolicy::permissive())?;

        let state_before = self.circuit_breaker.state(id);
        self.circuit_breaker.trip(id);
        let state_after_trip = self.circuit_breaker.state(id);
        self.circuit_breaker.force_half_open(id);

        let mut diagnostics = FetchDiagnostics::new();
        let probe = match self
            .fetch_with_breaker(provider, &symbol, &RetryPolicy::no_retry(), &mut diagnostics)
            .await
        {
            Ok(_) => ProbeOutcome::Succeeded,
            Err(ProviderFailure::Unavailable { .. }) => ProbeOutcome::Skipped,
            Err(ProviderFailure::Failed { error, .. }) => ProbeOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        };

        let final_state = self.circuit_breaker.state(id);
        info!(
            "Circuit test for '{}': {} -> {} -> probe {:?} -> {}",
            id, state_before, state_after_trip, probe, final_state
        );

        Ok(CircuitTestReport {
            provider: id.to_string(),
            probe_symbol: symbol.to_string(),
            state_before,
            state_after_trip,
            probe,
            final_state,
        })
    }

    /// Close a provider's breaker and clear its failure count.
    pub fn reset_circuit(&self, provider_id: &str) -> Result<(), MarketDataError> {
        let provider = self.find(provider_id)?;
        self.circuit_breaker.reset(&provider.descriptor.id);
        Ok(())
    }

    /// Drop the cached quote for `symbol`. Returns whether one was cached;
    /// a malformed symbol was never cached.
    pub fn invalidate(&self, symbol: &str) -> bool {
        match Symbol::parse(symbol, &SymbolPolicy::permissive()) {
            Ok(symbol) => self.cache.invalidate(symbol.as_str()),
            Err(_) => false,
        }
    }

    /// Providers in the order they are tried.
    pub fn providers(&self) -> &[ConfiguredProvider] {
        &self.providers
    }

    /// Outcome counters and latency for every provider, keyed by id.
    pub fn provider_metrics(&self) -> BTreeMap<String, ProviderMetrics> {
        self.providers
            .iter()
            .map(|p| (p.descriptor.id.to_string(), self.metrics.get(&p.descriptor.id)))
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn find(&self, provider_id: &str) -> Result<&ConfiguredProvider, MarketDataError> {
        let wanted = provider_id.trim();
        self.providers
            .iter()
            .find(|p| p.descriptor.id.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MarketDataError::UnknownProvider(wanted.to_string()))
    }

    /// Cache a fetched quote. Returns the quote now cached, which is the
    /// existing one when it is newer than what the provider sent.
    fn store(&self, quote: Quote, ttl: Option<Duration>) -> Quote {
        let ttl = ttl.unwrap_or_else(|| self.cache.default_ttl());
        self.cache.put_with_ttl(quote, ttl)
    }

    /// One provider's share of a pass: breaker check, retried fetch, and
    /// outcome bookkeeping.
    async fn fetch_with_breaker(
        &self,
        provider: &ConfiguredProvider,
        symbol: &Symbol,
        policy: &RetryPolicy,
        diagnostics: &mut FetchDiagnostics,
    ) -> Result<Quote, ProviderFailure> {
        let id = &provider.descriptor.id;

        if !self.circuit_breaker.is_allowed(id) {
            let reason = if self.circuit_breaker.held_for(id).is_some() {
                SkipReason::RetryAfter
            } else {
                match self.circuit_breaker.state(id) {
                    CircuitState::HalfOpen => SkipReason::ProbeInFlight,
                    CircuitState::Open | CircuitState::Closed => SkipReason::CircuitBreakerOpen,
                }
            };
            debug!("Skipping provider '{}' for {}: {}", id, symbol, reason);
            self.metrics.record_skip(id);
            diagnostics.record_skip(id.clone(), reason);
            return Err(ProviderFailure::Unavailable {
                provider: id.clone(),
            });
        }

        let guard = ProbeGuard::new(&self.circuit_breaker, id);
        let outcome = self.fetch_validated(provider, symbol, policy).await;

        let result = match outcome.result {
            Ok(quote) => {
                self.circuit_breaker.record_success(id);
                self.metrics.record_success(id);
                diagnostics.record_success(id.clone(), outcome.attempts);
                debug!(
                    "Provider '{}' returned {} for {} after {} attempt(s)",
                    id, quote.price, symbol, outcome.attempts
                );
                Ok(quote)
            }
            Err(error) => {
                let kind = error.kind();
                warn!(
                    "Provider '{}' failed for {} after {} attempt(s): {}",
                    id, symbol, outcome.attempts, error
                );
                self.circuit_breaker.record_failure(id, kind);
                if let Some(wait) = error.retry_after() {
                    self.circuit_breaker.hold_off(id, wait);
                }
                self.metrics.record_failure(id, kind);
                diagnostics.record_error(id.clone(), kind, error.to_string(), outcome.attempts);
                Err(ProviderFailure::Failed {
                    provider: id.clone(),
                    error,
                    attempts: outcome.attempts,
                })
            }
        };
        guard.disarm();
        result
    }

    async fn fetch_validated(
        &self,
        provider: &ConfiguredProvider,
        symbol: &Symbol,
        policy: &RetryPolicy,
    ) -> RetryOutcome<Quote> {
        let validator = &self.validator;
        let metrics = &self.metrics;
        policy
            .execute_paced(
                &self.rate_limiter,
                &provider.descriptor.id,
                provider.descriptor.timeout,
                move |attempt| async move {
                    debug!(
                        "Fetching {} from '{}' (attempt {})",
                        symbol,
                        provider.descriptor.id,
                        attempt
                    );
                    let started = Instant::now();
                    let fetched = provider.client.fetch_quote(symbol).await;
                    metrics.record_latency(&provider.descriptor.id, started.elapsed());
                    let quote = fetched?;
                    validator.validate(&quote, symbol)?;
                    Ok::<Quote, ProviderError>(quote)
                },
            )
            .await
    }

    fn stale_or_fail(
        &self,
        symbol: &Symbol,
        failures: Vec<ProviderFailure>,
    ) -> Result<QuoteOutcome, MarketDataError> {
        if let (Some(max_age), Some(cached)) =
            (self.stale_max_age, self.cache.peek(symbol.as_str()))
        {
            if cached.age < max_age {
                warn!(
                    "Serving stale quote for {} from {} ({}s old)",
                    symbol,
                    cached.quote.provider_id,
                    cached.age.as_secs()
                );
                return Ok(QuoteOutcome {
                    quote: cached.quote,
                    source: QuoteSource::Stale {
                        age_secs: cached.age.as_secs(),
                    },
                });
            }
            debug!(
                "Cached quote for {} is {}s old, too stale to serve",
                symbol,
                cached.age.as_secs()
            );
        }

        Err(MarketDataError::NoProviderAvailable { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::FailureKind;
    use crate::provider::{ProviderDescriptor, QuoteProvider};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedProvider {
        id: &'static str,
        fail_with: Option<ProviderError>,
        calls: AtomicU32,
    }

    impl FixedProvider {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail_with: None,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(id: &'static str, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail_with: Some(error),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteProvider for FixedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(error) => Err(error.clone()),
                None => Ok(Quote::new(
                    symbol.as_str(),
                    dec!(101.5),
                    "USD",
                    Utc::now(),
                    self.id,
                )),
            }
        }
    }

    fn configured(provider: Arc<FixedProvider>, priority: u32) -> ConfiguredProvider {
        ConfiguredProvider::new(
            ProviderDescriptor::new(provider.id, priority, Duration::from_secs(1)),
            provider,
        )
    }

    fn config() -> MarketDataConfig {
        MarketDataConfig {
            retry: RetryPolicy::no_retry(),
            ..MarketDataConfig::default()
        }
    }

    #[test]
    fn test_empty_provider_list_rejected() {
        assert!(matches!(
            ProviderRouter::new(Vec::new()),
            Err(MarketDataError::NoProvidersConfigured)
        ));
    }

    #[test]
    fn test_providers_sorted_by_priority() {
        let router = ProviderRouter::with_config(
            &config(),
            vec![
                configured(FixedProvider::ok("SECOND"), 1),
                configured(FixedProvider::ok("FIRST"), 0),
            ],
        )
        .unwrap();

        let ids: Vec<&str> = router
            .providers()
            .iter()
            .map(|p| &*p.descriptor.id)
            .collect();
        assert_eq!(ids, vec!["FIRST", "SECOND"]);
    }

    #[tokio::test]
    async fn test_invalid_symbol_makes_no_calls() {
        let provider = FixedProvider::ok("A");
        let router =
            ProviderRouter::with_config(&config(), vec![configured(provider.clone(), 0)]).unwrap();

        let err = router.get_quote("  ").await.unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidSymbol(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_from_unknown_provider() {
        let router =
            ProviderRouter::with_config(&config(), vec![configured(FixedProvider::ok("A"), 0)])
                .unwrap();
        let err = router.fetch_from("NOPE", "AAPL").await.unwrap_err();
        assert!(matches!(err, MarketDataError::UnknownProvider(id) if id == "NOPE"));
    }

    #[tokio::test]
    async fn test_fetch_from_skips_fallback_and_writes_cache() {
        let a = FixedProvider::failing("A", ProviderError::transport("A", "refused"));
        let b = FixedProvider::ok("B");
        let router = ProviderRouter::with_config(
            &config(),
            vec![configured(a.clone(), 0), configured(b.clone(), 1)],
        )
        .unwrap();

        let err = router.fetch_from("a", "AAPL").await.unwrap_err();
        assert!(matches!(err, MarketDataError::Provider(ProviderError::Transport { .. })));
        assert_eq!(b.calls(), 0);

        let quote = router.fetch_from("B", "aapl").await.unwrap();
        assert_eq!(quote.provider_id, "B");
        assert!(router.get_status("AAPL").unwrap().fresh);
    }

    #[tokio::test]
    async fn test_validation_failure_counts_as_provider_failure() {
        struct WrongSymbol;

        #[async_trait]
        impl QuoteProvider for WrongSymbol {
            fn id(&self) -> &'static str {
                "WRONG"
            }

            async fn fetch_quote(&self, _symbol: &Symbol) -> Result<Quote, ProviderError> {
                Ok(Quote::new("MSFT", dec!(10), "USD", Utc::now(), "WRONG"))
            }
        }

        let router = ProviderRouter::with_config(
            &config(),
            vec![ConfiguredProvider::new(
                ProviderDescriptor::new("WRONG", 0, Duration::from_secs(1)),
                Arc::new(WrongSymbol),
            )],
        )
        .unwrap();

        let err = router.get_quote("AAPL").await.unwrap_err();
        match &err.failures()[0] {
            ProviderFailure::Failed { error, .. } => {
                assert_eq!(error.kind(), FailureKind::DataInvalid)
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert_eq!(router.circuit_breaker().failure_count(&"WRONG".into()), 1);
    }

    #[tokio::test]
    async fn test_reset_circuit_closes_breaker() {
        let clock = ManualClock::new();
        let router = ProviderRouter::with_clock(
            &config(),
            vec![configured(FixedProvider::ok("A"), 0)],
            Arc::new(clock),
        )
        .unwrap();

        let id: ProviderId = "A".into();
        router.circuit_breaker().trip(&id);
        assert_eq!(router.circuit_breaker().state(&id), CircuitState::Open);

        router.reset_circuit("A").unwrap();
        assert_eq!(router.circuit_breaker().state(&id), CircuitState::Closed);
        assert!(router.reset_circuit("B").is_err());
    }

    #[tokio::test]
    async fn test_invalidate_normalizes_symbol() {
        let router =
            ProviderRouter::with_config(&config(), vec![configured(FixedProvider::ok("A"), 0)])
                .unwrap();
        router.get_quote("AAPL").await.unwrap();

        assert!(router.invalidate(" aapl "));
        assert!(!router.invalidate("AAPL"));
    }

    #[tokio::test]
    async fn test_invalidate_matches_get_quote_normalization() {
        let router =
            ProviderRouter::with_config(&config(), vec![configured(FixedProvider::ok("A"), 0)])
                .unwrap();
        router.get_quote("eur/usd").await.unwrap();

        assert!(!router.invalidate("EUR USD"));
        assert!(!router.invalidate(""));
        assert!(router.invalidate("  Eur/Usd"));
        assert!(!router.get_status("EUR/USD").unwrap().cached);
    }

    #[tokio::test]
    async fn test_metrics_count_outcomes_per_provider() {
        let a = FixedProvider::failing("A", ProviderError::transport("A", "refused"));
        let b = FixedProvider::ok("B");
        let router = ProviderRouter::with_config(
            &config(),
            vec![configured(a.clone(), 0), configured(b.clone(), 1)],
        )
        .unwrap();

        router.get_quote("AAPL").await.unwrap();
        router.get_quote("MSFT").await.unwrap();

        let metrics = router.provider_metrics();
        assert_eq!(metrics["A"].failures.get(FailureKind::Transport), 2);
        assert_eq!(metrics["A"].successes, 0);
        assert_eq!(metrics["A"].calls, 2);
        assert_eq!(metrics["B"].successes, 2);
        assert_eq!(metrics["B"].failures.total(), 0);
        assert!(metrics["B"].last_latency_ms.is_some());

        let status = router.get_status("AAPL").unwrap();
        assert_eq!(status.breaker_states["B"].metrics, metrics["B"]);
    }
}
