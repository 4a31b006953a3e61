//! Polygon.io market data provider implementation.
//!
//! Uses the previous-close aggregate (`/v2/aggs/ticker/{ticker}/prev`), which
//! is available on the free tier. Currency pairs use Polygon's `C:` prefix.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use urlencoding::encode;

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};
use crate::provider::http;
use crate::provider::{quote_currency, QuoteProvider, RateLimit};

const BASE_URL: &str = "https://api.polygon.io";
const PROVIDER_ID: &str = "POLYGON";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatesResponse {
    status: Option<String>,
    #[serde(default)]
    results: Vec<AggregateBar>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregateBar {
    /// Close price
    c: Option<f64>,
    /// Bar start (Unix milliseconds)
    t: Option<i64>,
}

/// Polygon.io market data provider.
pub struct PolygonProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl PolygonProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: http::build_client(timeout),
            api_key,
            timeout,
        }
    }
}

fn provider_symbol(symbol: &Symbol) -> String {
    match symbol.as_pair() {
        Some((from, to)) => format!("C:{}{}", from, to),
        None => symbol.as_str().to_string(),
    }
}

fn parse_previous_close(body: &str, symbol: &Symbol) -> Result<Quote, ProviderError> {
    let response: AggregatesResponse = http::parse_json(PROVIDER_ID, body)?;

    if matches!(response.status.as_deref(), Some("ERROR") | Some("NOT_AUTHORIZED")) {
        let message = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(ProviderError::data_invalid(PROVIDER_ID, message));
    }

    let bar = response.results.first().ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("No results for {}", symbol))
    })?;

    let close = bar.c.ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("No close price for {}", symbol))
    })?;
    let price = http::positive_price(PROVIDER_ID, close)?;

    let timestamp = bar
        .t
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Quote::new(
        symbol.as_str(),
        price,
        quote_currency(symbol),
        timestamp,
        PROVIDER_ID,
    ))
}

#[async_trait]
impl QuoteProvider for PolygonProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(5))
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let ticker = provider_symbol(symbol);
        debug!("Polygon request: previous close for {}", ticker);

        let request = self
            .client
            .get(format!("{}/v2/aggs/ticker/{}/prev", BASE_URL, encode(&ticker)))
            .query(&[("adjusted", "true"), ("apiKey", self.api_key.as_str())]);

        let body = http::get_text(PROVIDER_ID, self.timeout, request).await?;
        parse_previous_close(&body, symbol)
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
        assert_eq!(provider_symbol(&symbol("EUR/USD")), "C:EURUSD");
    }

    #[test]
    fn test_previous_close_parsing() {
        let json = r#"{
            "ticker": "AAPL",
            "queryCount": 1,
            "resultsCount": 1,
            "adjusted": true,
            "results": [
                {
                    "T": "AAPL",
                    "v": 70790813,
                    "vw": 131.6292,
                    "o": 130.465,
                    "c": 130.15,
                    "h": 133.41,
                    "l": 129.89,
                    "t": 1673298000000,
                    "n": 645365
                }
            ],
            "status": "OK",
            "request_id": "6a7e466379af0a71039d60cc78e72282",
            "count": 1
        }"#;

        let quote = parse_previous_close(json, &symbol("AAPL")).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(130.15));
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.provider_id, "POLYGON");
        assert_eq!(quote.timestamp.timestamp_millis(), 1673298000000);
    }

    #[test]
    fn test_empty_results_is_data_invalid() {
        let json = r#"{"ticker": "NOPE", "resultsCount": 0, "status": "OK", "results": []}"#;
        let err = parse_previous_close(json, &symbol("NOPE")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::DataInvalid);
    }

    #[test]
    fn test_error_status() {
        let json = r#"{"status": "ERROR", "request_id": "x", "error": "Unknown API Key"}"#;
        let err = parse_previous_close(json, &symbol("AAPL")).unwrap_err();
        assert!(err.to_string().contains("Unknown API Key"));
    }

    #[test]
    fn test_missing_results_field() {
        let json = r#"{"ticker": "AAPL", "status": "DELAYED"}"#;
        assert!(parse_previous_close(json, &symbol("AAPL")).is_err());
    }
}
