use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Currency;

/// Market data quote.
///
/// Immutable once built; the router hands out clones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Normalized symbol the quote was requested for
    pub symbol: String,

    /// Last traded / current price
    pub price: Decimal,

    /// Quote currency
    pub currency: Currency,

    /// Time the provider stamped on the price
    pub timestamp: DateTime<Utc>,

    /// Provider that produced the quote (YAHOO, FINNHUB, ...)
    pub provider_id: String,
}

impl Quote {
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        currency: impl Into<Currency>,
        timestamp: DateTime<Utc>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            currency: currency.into(),
            timestamp,
            provider_id: provider_id.into(),
        }
    }
}

/// Where a quote returned by the router came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteSource {
    /// Fresh cache hit, no network call made.
    Cache,
    /// Fetched from a provider during this call.
    Network,
    /// Every provider failed; this is an expired cache entry.
    Stale { age_secs: u64 },
}

/// A quote plus its provenance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteOutcome {
    pub quote: Quote,
    pub source: QuoteSource,
}

impl QuoteOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self.source, QuoteSource::Stale { .. })
    }
}
