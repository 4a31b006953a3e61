//! Finnhub market data provider implementation.
//!
//! Latest quotes come from the `/quote` endpoint. Currency pairs are routed
//! through Finnhub's OANDA feed (`OANDA:EUR_USD`).
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};
use crate::provider::http;
use crate::provider::{quote_currency, QuoteProvider, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<f64>,
    /// Timestamp (Unix)
    t: Option<i64>,
    // Note: d, dp, h, l, o, pc exist but are not used
}

/// Finnhub market data provider.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl FinnhubProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: http::build_client(timeout),
            api_key,
            timeout,
        }
    }
}

/// Finnhub's spelling of a symbol.
fn provider_symbol(symbol: &Symbol) -> String {
    match symbol.as_pair() {
        Some((from, to)) => format!("OANDA:{}_{}", from, to),
        None => symbol.as_str().to_string(),
    }
}

fn parse_quote(body: &str, symbol: &Symbol) -> Result<Quote, ProviderError> {
    let response: QuoteResponse = http::parse_json(PROVIDER_ID, body)?;

    let close = response.c.ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("No quote data for {}", symbol))
    })?;

    // Finnhub returns 0 for unknown symbols instead of an error
    if close == 0.0 {
        return Err(ProviderError::data_invalid(
            PROVIDER_ID,
            format!("Symbol not found or no trading data: {}", symbol),
        ));
    }

    let price = http::positive_price(PROVIDER_ID, close)?;
    let timestamp = response
        .t
        .filter(|ts| *ts > 0)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
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
impl QuoteProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(60))
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let finnhub_symbol = provider_symbol(symbol);
        debug!("Finnhub request: /quote for {}", finnhub_symbol);

        let request = self
            .client
            .get(format!("{}/quote", BASE_URL))
            .header("X-Finnhub-Token", self.api_key.as_str())
            .query(&[("symbol", finnhub_symbol.as_str())]);

        let body = http::get_text(PROVIDER_ID, self.timeout, request).await?;
        parse_quote(&body, symbol)
    }
}
