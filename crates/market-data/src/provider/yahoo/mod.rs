//! Yahoo Finance market data provider.
//!
//! This provider uses the Yahoo Finance chart API (through
//! `yahoo_finance_api`) to fetch the latest bar for:
//! - Equities/ETFs (e.g., AAPL, SHOP.TO)
//! - Cryptocurrencies (e.g., BTC-USD)
//! - Foreign exchange rates (e.g., EUR/USD, fetched as EURUSD=X)
//!
//! No API key is required.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use yahoo_finance_api as yahoo;

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};
use crate::provider::http;
use crate::provider::{quote_currency, QuoteProvider};

const PROVIDER_ID: &str = "YAHOO";

/// Yahoo Finance market data provider.
pub struct YahooProvider {
    connector: yahoo::YahooConnector,
}

impl YahooProvider {
    pub fn new() -> Result<Self, ProviderError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| {
            ProviderError::transport(
                PROVIDER_ID,
                format!("Failed to initialize Yahoo connector: {}", e),
            )
        })?;
        Ok(Self { connector })
    }
}

/// Yahoo's spelling of a symbol.
fn provider_symbol(symbol: &Symbol) -> String {
    match symbol.as_pair() {
        Some((from, to)) => format!("{}{}=X", from, to),
        None => symbol.as_str().to_string(),
    }
}

/// Build a quote from the close and Unix timestamp of Yahoo's latest bar.
fn quote_from_bar(symbol: &Symbol, close: f64, timestamp: i64) -> Result<Quote, ProviderError> {
    let timestamp: DateTime<Utc> = Utc.timestamp_opt(timestamp, 0).single().ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("Invalid timestamp: {}", timestamp))
    })?;
    let price = http::positive_price(PROVIDER_ID, close)?;

    Ok(Quote::new(
        symbol.as_str(),
        price,
        quote_currency(symbol),
        timestamp,
        PROVIDER_ID,
    ))
}

fn map_yahoo_error(symbol: &str, error: yahoo::YahooError) -> ProviderError {
    match error {
        yahoo::YahooError::NoResult | yahoo::YahooError::NoQuotes => {
            ProviderError::data_invalid(PROVIDER_ID, format!("No quotes for {}", symbol))
        }
        other => ProviderError::transport(PROVIDER_ID, other.to_string()),
    }
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let yahoo_symbol = provider_symbol(symbol);
        debug!("Yahoo request: latest quote for {}", yahoo_symbol);

        let response = self
            .connector
            .get_latest_quotes(&yahoo_symbol, "1d")
            .await
            .map_err(|e| map_yahoo_error(&yahoo_symbol, e))?;

        let bar = response.last_quote().map_err(|e| {
            warn!("No quotes returned for {}: {}", yahoo_symbol, e);
            map_yahoo_error(&yahoo_symbol, e)
        })?;

        let timestamp = i64::try_from(bar.timestamp).map_err(|_| {
            ProviderError::data_invalid(PROVIDER_ID, format!("Invalid timestamp: {}", bar.timestamp))
        })?;
        quote_from_bar(symbol, bar.close, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::models::SymbolPolicy;
    use rust_decimal_macros::dec;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw, &SymbolPolicy::permissive()).unwrap()
    }

    #[test]
    fn test_provider_symbol() {
        assert_eq!(provider_symbol(&symbol("AAPL")), "AAPL");
        assert_eq!(provider_symbol(&symbol("SHOP.TO")), "SHOP.TO");
        assert_eq!(provider_symbol(&symbol("eur/usd")), "EURUSD=X");
    }

    #[test]
    fn test_quote_from_bar() {
        let quote = quote_from_bar(&symbol("AAPL"), 189.84, 1714680000).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(189.84));
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.provider_id, "YAHOO");
        assert_eq!(quote.timestamp.timestamp(), 1714680000);
    }

    #[test]
    fn test_crypto_and_pair_currency() {
        assert_eq!(
            quote_from_bar(&symbol("BTC-EUR"), 58000.0, 1714680000)
                .unwrap()
                .currency,
            "EUR"
        );
        assert_eq!(
            quote_from_bar(&symbol("GBP/JPY"), 196.2, 1714680000)
                .unwrap()
                .currency,
            "JPY"
        );
    }

    #[test]
    fn test_zero_close_is_data_invalid() {
        let err = quote_from_bar(&symbol("AAPL"), 0.0, 1714680000).unwrap_err();
        assert_eq!(err.kind(), FailureKind::DataInvalid);
    }

    #[test]
    fn test_empty_data_set_maps_to_data_invalid() {
        let err = map_yahoo_error("NOPE", yahoo::YahooError::NoQuotes);
        assert_eq!(err.kind(), FailureKind::DataInvalid);
    }
}
