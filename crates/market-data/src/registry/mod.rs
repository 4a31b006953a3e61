//! Provider orchestration.
//!
//! This module provides the resilience layer around quote providers:
//! - Priority-ordered routing with fallback (`ProviderRouter`)
//! - Circuit breaking per provider
//! - Bounded retry with exponential backoff
//! - Rate limiting per provider
//! - TTL quote cache with stale fallback
//! - Quote data validation and per-request diagnostics
//! - Per-provider outcome counters and latency

mod circuit_breaker;
mod provider_metrics;
mod quote_cache;
mod rate_limiter;
mod retry_policy;
mod router;
mod skip_reason;
mod validator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use provider_metrics::{FailureCounts, ProviderMetrics, ProviderMetricsRegistry};
pub use quote_cache::{CacheStats, CachedQuote, QuoteCache, DEFAULT_CACHE_TTL};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry_policy::{RetryOutcome, RetryPolicy};
pub use router::ProviderRouter;
pub use skip_reason::{FetchDiagnostics, ProviderAttempt, SkipReason};
pub use validator::{QuoteValidator, ValidationIssue, ValidationSeverity, ValidatorConfig};
