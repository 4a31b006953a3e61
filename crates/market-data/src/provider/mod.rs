//! Quote provider abstractions and implementations.
//!
//! This module contains:
//! - The `QuoteProvider` trait that all providers implement
//! - Provider descriptors and rate limiting configuration
//! - Concrete provider implementations (Yahoo, Finnhub, Alpha Vantage, Polygon)
//! - A factory that builds the configured providers
//!
//! Providers make exactly one request per call and report failures as
//! [`ProviderError`](crate::errors::ProviderError). Timeouts, retries,
//! circuit breaking and fallback belong to the router.

mod capabilities;
mod factory;
pub(crate) mod http;
mod traits;

pub mod alpha_vantage;
pub mod finnhub;
pub mod polygon;
pub mod yahoo;

pub use capabilities::{ProviderDescriptor, RateLimit};
pub use factory::{build_providers, ConfiguredProvider};
pub use traits::QuoteProvider;

use crate::models::Symbol;

const DEFAULT_QUOTE_CURRENCY: &str = "USD";

/// Currency a symbol is priced in.
///
/// `EUR/GBP` is priced in GBP and `BTC-EUR` in EUR; anything else is
/// assumed to be USD.
pub(crate) fn quote_currency(symbol: &Symbol) -> &str {
    if let Some((_, quote)) = symbol.as_pair() {
        return quote;
    }

    symbol
        .as_str()
        .rsplit_once('-')
        .map(|(_, suffix)| suffix)
        .filter(|s| s.len() == 3 && s.chars().all(|c| c.is_ascii_uppercase()))
        .unwrap_or(DEFAULT_QUOTE_CURRENCY)
}
