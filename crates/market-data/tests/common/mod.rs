//! Shared fixtures for router scenario tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Notify;
use tokio::time::Instant;

use marketpulse_market_data::{
    CircuitBreakerConfig, ConfiguredProvider, FailureKind, ManualClock, MarketDataConfig,
    ProviderDescriptor, ProviderError, ProviderId, ProviderRouter, Quote, QuoteProvider,
    RetryPolicy, Symbol,
};

/// Per-attempt timeout given to every scripted provider.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(1);

/// What a scripted provider does on one call.
#[derive(Clone, Debug)]
pub enum Reply {
    Price(Decimal),
    /// A quote stamped this long before now.
    Aged(Decimal, chrono::Duration),
    /// Answers with a price after the given delay.
    Slow(Duration, Decimal),
    Fail(FailureKind),
    /// HTTP 429 carrying a `Retry-After` hint.
    Throttled(Duration),
    /// Never answers within the provider timeout.
    Hang,
}

/// Provider that plays back a script, then repeats its fallback reply.
pub struct ScriptedProvider {
    id: &'static str,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    symbols: Mutex<Vec<String>>,
    started: Notify,
}

impl ScriptedProvider {
    pub fn new(id: &'static str, fallback: Reply) -> Arc<Self> {
        Self::scripted(id, Vec::new(), fallback)
    }

    pub fn healthy(id: &'static str) -> Arc<Self> {
        Self::new(id, Reply::Price(dec!(187.44)))
    }

    pub fn failing(id: &'static str, kind: FailureKind) -> Arc<Self> {
        Self::new(id, Reply::Fail(kind))
    }

    pub fn scripted(id: &'static str, script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            symbols: Mutex::new(Vec::new()),
            started: Notify::new(),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants (tokio time) at which each call started.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn requested_symbols(&self) -> Vec<String> {
        self.symbols.lock().unwrap().clone()
    }

    /// Resolves once a call has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn provider_id(&self) -> ProviderId {
        ProviderId::Borrowed(self.id)
    }

    fn next_reply(&self) -> Reply {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn error_of(provider: &str, kind: FailureKind) -> ProviderError {
    match kind {
        FailureKind::Timeout => ProviderError::timeout(provider, PROVIDER_TIMEOUT),
        FailureKind::Transport => ProviderError::transport(provider, "connection refused"),
        FailureKind::RateLimited => ProviderError::rate_limited(provider),
        FailureKind::DataInvalid => ProviderError::data_invalid(provider, "missing price"),
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.symbols.lock().unwrap().push(symbol.to_string());
        self.started.notify_one();

        match self.next_reply() {
            Reply::Price(price) => Ok(Quote::new(
                symbol.as_str(),
                price,
                "USD",
                Utc::now(),
                self.id,
            )),
            Reply::Aged(price, age) => Ok(Quote::new(
                symbol.as_str(),
                price,
                "USD",
                Utc::now() - age,
                self.id,
            )),
            Reply::Slow(delay, price) => {
                tokio::time::sleep(delay).await;
                Ok(Quote::new(symbol.as_str(), price, "USD", Utc::now(), self.id))
            }
            Reply::Fail(kind) => Err(error_of(self.id, kind)),
            Reply::Throttled(retry_after) => {
                Err(ProviderError::rate_limited_for(self.id, retry_after))
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(error_of(self.id, FailureKind::Transport))
            }
        }
    }
}

/// Single-attempt retries, threshold 3, 30s cooldown, 5s TTL, no stale fallback.
pub fn test_config() -> MarketDataConfig {
    MarketDataConfig {
        cache_ttl: Duration::from_secs(5),
        retry: RetryPolicy::no_retry(),
        breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            failure_window: None,
        },
        stale_max_age: None,
        ..MarketDataConfig::default()
    }
}

/// Router over `providers`, prioritized in slice order, on a manual clock.
pub fn router_with(
    config: &MarketDataConfig,
    providers: &[Arc<ScriptedProvider>],
) -> (Arc<ProviderRouter>, ManualClock) {
    let clock = ManualClock::new();
    let configured = providers
        .iter()
        .enumerate()
        .map(|(priority, provider)| {
            ConfiguredProvider::new(
                ProviderDescriptor::new(provider.id, priority as u32, PROVIDER_TIMEOUT),
                provider.clone(),
            )
        })
        .collect();

    let router = ProviderRouter::with_clock(config, configured, Arc::new(clock.clone()))
        .expect("router should build");
    (Arc::new(router), clock)
}

pub fn router(providers: &[Arc<ScriptedProvider>]) -> (Arc<ProviderRouter>, ManualClock) {
    router_with(&test_config(), providers)
}
