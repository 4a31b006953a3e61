//! Quote provider trait definition.

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};

use super::capabilities::RateLimit;

/// Trait for quote providers.
///
/// Implement this trait to add support for a new market data source. A
/// provider performs exactly one network round-trip per call and maps every
/// failure into a [`ProviderError`]; retries, timeouts, circuit breaking and
/// fallback are applied by the router.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketpulse_market_data::provider::{QuoteProvider, RateLimit};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl QuoteProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn rate_limit(&self) -> Option<RateLimit> {
///         Some(RateLimit::per_minute(30))
///     }
///
///     async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "YAHOO", "ALPHA_VANTAGE", etc.
    /// Used for logging, circuit breaker tracking, and configuration lookup.
    fn id(&self) -> &'static str;

    /// Client-side throttle applied before each attempt. `None` means the
    /// provider is not throttled locally.
    fn rate_limit(&self) -> Option<RateLimit> {
        None
    }

    /// Fetch the latest quote for a symbol.
    ///
    /// The returned quote's `symbol` must equal `symbol` and its
    /// `provider_id` must equal [`id`](Self::id).
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError>;
}
