//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`ProviderError`]: a single failed attempt against one provider
//! - [`MarketDataError`]: what callers of the router receive
//! - [`RetryClass`]: classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::models::ProviderId;

/// Failure kinds reported to the circuit breaker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    RateLimited,
    DataInvalid,
}

impl FailureKind {
    /// How much one failure of this kind adds to a breaker's
    /// consecutive-failure count. Rate limiting counts double.
    pub fn breaker_weight(self) -> u32 {
        match self {
            Self::RateLimited => 2,
            Self::Timeout | Self::Transport | Self::DataInvalid => 1,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::DataInvalid => write!(f, "invalid data"),
        }
    }
}

/// A failed attempt against a single provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The attempt did not complete within the request timeout.
    #[error("Timeout: {provider} after {}ms", .after.as_millis())]
    Timeout {
        provider: String,
        after: Duration,
    },

    /// The request could not be delivered or the provider answered with an
    /// unexpected HTTP status.
    #[error("Transport error: {provider} - {message}")]
    Transport { provider: String, message: String },

    /// HTTP 429 or a provider-specific throttle/quota signal.
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        /// Provider hint from `Retry-After`, when present.
        retry_after: Option<Duration>,
    },

    /// The response arrived but was malformed, empty, or failed validation.
    #[error("Invalid data: {provider} - {message}")]
    DataInvalid { provider: String, message: String },
}

impl ProviderError {
    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            after,
        }
    }

    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: None,
        }
    }

    /// Rate limited with a `Retry-After` hint.
    pub fn rate_limited_for(provider: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn data_invalid(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataInvalid {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// The provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Transport { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::DataInvalid { provider, .. } => provider,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Transport { .. } => FailureKind::Transport,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::DataInvalid { .. } => FailureKind::DataInvalid,
        }
    }

    /// How long the provider asked us to stay away, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use marketpulse_market_data::errors::{ProviderError, RetryClass};
    ///
    /// let error = ProviderError::rate_limited("FINNHUB");
    /// assert_eq!(error.retry_class(), RetryClass::AbortProvider);
    ///
    /// let error = ProviderError::transport("YAHOO", "connection refused");
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } => RetryClass::AbortProvider,
            Self::Timeout { .. } | Self::Transport { .. } | Self::DataInvalid { .. } => {
                RetryClass::WithBackoff
            }
        }
    }
}

/// Why a provider produced no quote during a fallback pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderFailure {
    /// The breaker refused the call; no attempt was made.
    Unavailable { provider: ProviderId },
    /// Every attempt failed; carries the last error and how many attempts ran.
    Failed {
        provider: ProviderId,
        error: ProviderError,
        attempts: u32,
    },
}

impl ProviderFailure {
    pub fn provider(&self) -> &ProviderId {
        match self {
            Self::Unavailable { provider } | Self::Failed { provider, .. } => provider,
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { provider } => write!(f, "{}: circuit open", provider),
            Self::Failed {
                provider,
                error,
                attempts,
            } => write!(
                f,
                "{}: {} after {} attempt(s)",
                provider,
                error.kind(),
                attempts
            ),
        }
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by the quote router.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The symbol is malformed or not in the configured allow-list.
    /// Rejected before any network call.
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The provider's circuit breaker refused the call.
    #[error("Provider unavailable: {provider}")]
    ProviderUnavailable { provider: ProviderId },

    /// Every provider was skipped or failed during a single pass.
    #[error("No provider available: {}", join_failures(.failures))]
    NoProviderAvailable { failures: Vec<ProviderFailure> },

    /// A provider id was named that is not registered with the router.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The router was built without any providers.
    #[error("No providers configured")]
    NoProvidersConfigured,

    /// A direct single-provider fetch failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl MarketDataError {
    /// Per-provider reasons carried by `NoProviderAvailable`, empty otherwise.
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            Self::NoProviderAvailable { failures } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_rate_limited_aborts_provider() {
        let error = ProviderError::rate_limited("FINNHUB");
        assert_eq!(error.retry_class(), RetryClass::AbortProvider);
        assert_eq!(error.kind(), FailureKind::RateLimited);
        assert_eq!(error.retry_after(), None);

        let error = ProviderError::rate_limited_for("POLYGON", Duration::from_secs(120));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(120)));
        assert_eq!(error.retry_class(), RetryClass::AbortProvider);
        assert_eq!(
            ProviderError::transport("YAHOO", "refused").retry_after(),
            None
        );
    }

    #[test]
    fn test_transient_errors_retry_with_backoff() {
        let errors = [
            ProviderError::timeout("YAHOO", Duration::from_secs(10)),
            ProviderError::transport("YAHOO", "connection refused"),
            ProviderError::data_invalid("YAHOO", "missing price"),
        ];
        for error in errors {
            assert_eq!(error.retry_class(), RetryClass::WithBackoff, "{}", error);
        }
    }

    #[test]
    fn test_breaker_weights() {
        assert_eq!(FailureKind::RateLimited.breaker_weight(), 2);
        assert_eq!(FailureKind::Timeout.breaker_weight(), 1);
        assert_eq!(FailureKind::Transport.breaker_weight(), 1);
        assert_eq!(FailureKind::DataInvalid.breaker_weight(), 1);
    }

    #[test]
    fn test_error_display() {
        let error = ProviderError::timeout("YAHOO", Duration::from_millis(1500));
        assert_eq!(format!("{}", error), "Timeout: YAHOO after 1500ms");

        let error = ProviderError::transport("POLYGON", "HTTP 502");
        assert_eq!(format!("{}", error), "Transport error: POLYGON - HTTP 502");

        let error = MarketDataError::InvalidSymbol("???".to_string());
        assert_eq!(format!("{}", error), "Invalid symbol: ???");
    }

    #[test]
    fn test_no_provider_available_lists_each_failure() {
        let error = MarketDataError::NoProviderAvailable {
            failures: vec![
                ProviderFailure::Unavailable {
                    provider: Cow::Borrowed("YAHOO"),
                },
                ProviderFailure::Failed {
                    provider: Cow::Borrowed("FINNHUB"),
                    error: ProviderError::timeout("FINNHUB", Duration::from_secs(10)),
                    attempts: 3,
                },
            ],
        };

        assert_eq!(error.failures().len(), 2);
        assert_eq!(
            format!("{}", error),
            "No provider available: YAHOO: circuit open; FINNHUB: timeout after 3 attempt(s)"
        );
    }
}
