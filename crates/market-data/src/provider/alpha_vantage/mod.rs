//! Alpha Vantage market data provider implementation.
//!
//! - Equities via the `GLOBAL_QUOTE` function
//! - Currency pairs via the `CURRENCY_EXCHANGE_RATE` function
//!
//! Alpha Vantage answers throttling with HTTP 200 and a `Note` or
//! `Information` body instead of a 429, so those bodies are mapped to
//! `RateLimited` here.
//!
//! Note: Alpha Vantage free tier is limited to 5 API calls per minute.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};
use crate::provider::http;
use crate::provider::{quote_currency, QuoteProvider, RateLimit};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_ID: &str = "ALPHA_VANTAGE";

/// Fields Alpha Vantage uses to signal problems in a 200 response.
#[derive(Debug, Default, Deserialize)]
struct ApiMessages {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(flatten)]
    messages: ApiMessages,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(rename = "Realtime Currency Exchange Rate")]
    rate: Option<ExchangeRate>,
    #[serde(flatten)]
    messages: ApiMessages,
}

#[derive(Debug, Deserialize)]
struct ExchangeRate {
    #[serde(rename = "5. Exchange Rate")]
    exchange_rate: Option<String>,
    #[serde(rename = "6. Last Refreshed")]
    last_refreshed: Option<String>,
}

/// Alpha Vantage market data provider.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: http::build_client(timeout),
            api_key,
            timeout,
        }
    }

    async fn fetch(&self, params: &[(&str, &str)]) -> Result<String, ProviderError> {
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("apikey", self.api_key.as_str()));

        let url = reqwest::Url::parse_with_params(BASE_URL, &all_params).map_err(|e| {
            ProviderError::transport(PROVIDER_ID, format!("Failed to build URL: {}", e))
        })?;

        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(&self.api_key, "***")
        );

        http::get_text(PROVIDER_ID, self.timeout, self.client.get(url)).await
    }
}

/// Check for API-level errors in a 200 response.
fn check_api_messages(messages: &ApiMessages) -> Result<(), ProviderError> {
    if let Some(msg) = &messages.error_message {
        return Err(ProviderError::data_invalid(PROVIDER_ID, msg.clone()));
    }

    // Both are used for per-minute and per-day quota messages
    if let Some(msg) = messages.note.as_ref().or(messages.information.as_ref()) {
        warn!("Alpha Vantage throttle message: {}", msg);
        return Err(ProviderError::rate_limited(PROVIDER_ID));
    }

    Ok(())
}

fn parse_price(raw: Option<&str>, symbol: &Symbol) -> Result<Decimal, ProviderError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ProviderError::data_invalid(PROVIDER_ID, format!("No price returned for {}", symbol))
        })?;

    let price = Decimal::from_str(raw).map_err(|_| {
        ProviderError::data_invalid(PROVIDER_ID, format!("Invalid price '{}'", raw))
    })?;

    if price <= Decimal::ZERO {
        return Err(ProviderError::data_invalid(
            PROVIDER_ID,
            format!("Non-positive price: {}", price),
        ));
    }
    Ok(price)
}

/// Parse `YYYY-MM-DD` (end-of-day quotes) as midnight UTC.
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| Utc.from_local_datetime(&dt).single())
}

/// Parse `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_global_quote(body: &str, symbol: &Symbol) -> Result<Quote, ProviderError> {
    let response: GlobalQuoteResponse = http::parse_json(PROVIDER_ID, body)?;
    check_api_messages(&response.messages)?;

    // Unknown symbols come back as an empty "Global Quote" object
    let quote = response.global_quote.ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("No quote data for {}", symbol))
    })?;

    let price = parse_price(quote.price.as_deref(), symbol)?;
    let timestamp = quote
        .latest_trading_day
        .as_deref()
        .and_then(parse_date)
        .unwrap_or_else(Utc::now);

    Ok(Quote::new(
        symbol.as_str(),
        price,
        quote_currency(symbol),
        timestamp,
        PROVIDER_ID,
    ))
}

fn parse_exchange_rate(body: &str, symbol: &Symbol) -> Result<Quote, ProviderError> {
    let response: ExchangeRateResponse = http::parse_json(PROVIDER_ID, body)?;
    check_api_messages(&response.messages)?;

    let rate = response.rate.ok_or_else(|| {
        ProviderError::data_invalid(PROVIDER_ID, format!("No exchange rate for {}", symbol))
    })?;

    let price = parse_price(rate.exchange_rate.as_deref(), symbol)?;
    let timestamp = rate
        .last_refreshed
        .as_deref()
        .and_then(parse_datetime)
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
impl QuoteProvider for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(5))
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        match symbol.as_pair() {
            Some((from, to)) => {
                let body = self
                    .fetch(&[
                        ("function", "CURRENCY_EXCHANGE_RATE"),
                        ("from_currency", from),
                        ("to_currency", to),
                    ])
                    .await?;
                parse_exchange_rate(&body, symbol)
            }
            None => {
                let body = self
                    .fetch(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol.as_str())])
                    .await?;
                parse_global_quote(&body, symbol)
            }
        }
    }
}
