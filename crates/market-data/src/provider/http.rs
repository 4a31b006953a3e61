//! HTTP plumbing shared by the REST-backed providers.
//!
//! Maps transport outcomes onto [`ProviderError`] the same way for every
//! provider:
//!
//! | Outcome                         | Error         |
//! |---------------------------------|---------------|
//! | client-side timeout             | `Timeout`     |
//! | connect / IO / body read errors | `Transport`   |
//! | HTTP 429                        | `RateLimited` (with `Retry-After`) |
//! | HTTP 403 (quota exhausted)      | `RateLimited` |
//! | any other non-2xx               | `Transport`   |
//! | unparsable JSON, missing price  | `DataInvalid` |

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::ProviderError;

/// Longest error body echoed into an error message.
const MAX_BODY_IN_ERROR: usize = 200;

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub(crate) fn send_error(provider: &str, timeout: Duration, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(provider, timeout)
    } else {
        ProviderError::transport(provider, format!("Request failed: {}", err))
    }
}

pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a non-success status. Returns `None` for 2xx.
pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }

    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after: parse_retry_after(headers),
        },
        StatusCode::FORBIDDEN => ProviderError::rate_limited(provider),
        StatusCode::UNAUTHORIZED => {
            ProviderError::transport(provider, "Invalid or missing API key")
        }
        _ => {
            let snippet: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
            ProviderError::transport(provider, format!("HTTP {} - {}", status, snippet.trim()))
        }
    };
    Some(error)
}

/// Send a GET and return the body of a 2xx response.
pub(crate) async fn get_text(
    provider: &str,
    timeout: Duration,
    request: RequestBuilder,
) -> Result<String, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| send_error(provider, timeout, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| send_error(provider, timeout, e))?;

    debug!("{} responded {} ({} bytes)", provider, status, body.len());

    match status_error(provider, status, &headers, &body) {
        Some(error) => Err(error),
        None => Ok(body),
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::data_invalid(provider, format!("Failed to parse response: {}", e))
    })
}

/// Convert a provider float into a strictly positive price.
pub(crate) fn positive_price(provider: &str, value: f64) -> Result<Decimal, ProviderError> {
    let price = Decimal::from_f64(value)
        .ok_or_else(|| ProviderError::data_invalid(provider, format!("Invalid price: {}", value)))?;
    if price <= Decimal::ZERO {
        return Err(ProviderError::data_invalid(
            provider,
            format!("Non-positive price: {}", value),
        ));
    }
    Ok(price)
}
