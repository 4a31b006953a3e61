//! MarketPulse Market Data Crate
//!
//! This crate fetches latest quotes from external market data providers and
//! keeps serving them while individual providers time out, throttle or fail.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple providers: Yahoo Finance, Finnhub, Alpha Vantage, Polygon
//! - Priority-ordered fallback across providers
//! - Per-provider circuit breaking, retry with backoff and rate limiting
//! - A TTL quote cache with an explicitly flagged stale fallback
//!
//! # Architecture
//!
//! ```text
//!                          +------------------+
//!   get_quote(symbol) ---> |  ProviderRouter  |
//!                          +------------------+
//!                             |            |
//!                   fresh hit v            v miss
//!                 +-------------+   +------------------+
//!                 | QuoteCache  |   |  for each        |  (priority order)
//!                 +-------------+   |  provider        |
//!                                   +------------------+
//!                                            |
//!                                            v
//!                                   +------------------+
//!                                   |  CircuitBreaker  |  (skip if open)
//!                                   +------------------+
//!                                            |
//!                                            v
//!                                   +------------------+
//!                                   |   RetryPolicy    |  (timeout, backoff,
//!                                   |   + RateLimiter  |   token bucket)
//!                                   +------------------+
//!                                            |
//!                                            v
//!                                   +------------------+
//!                                   |  QuoteProvider   |  (Yahoo, Finnhub, ...)
//!                                   +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`ProviderRouter`] - Entry point: `get_quote`, `get_status`, `test_circuit`
//! - [`Quote`] - Latest price for a symbol from one provider
//! - [`QuoteOutcome`] - A quote plus whether it came from cache, network or stale cache
//! - [`MarketDataConfig`] - Environment-driven configuration
//! - [`QuoteProvider`] - Trait implemented by every provider client

pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

// Re-export all public types from models
pub use models::{
    CircuitTestReport, Currency, ProbeOutcome, ProviderId, ProviderStatus, Quote, QuoteOutcome,
    QuoteSource, QuoteStatus, Symbol, SymbolPolicy,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MarketDataConfig, ProviderKind, ProviderSettings};
pub use errors::{FailureKind, MarketDataError, ProviderError, ProviderFailure, RetryClass};

// Re-export provider types
pub use provider::alpha_vantage::AlphaVantageProvider;
pub use provider::finnhub::FinnhubProvider;
pub use provider::polygon::PolygonProvider;
pub use provider::yahoo::YahooProvider;
pub use provider::{build_providers, ConfiguredProvider, ProviderDescriptor, QuoteProvider, RateLimit};

// Re-export registry types
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureCounts, ProviderMetrics,
    ProviderRouter, QuoteCache, RetryPolicy,
};
