//! Environment-driven configuration for the quote router.
//!
//! [`MarketDataConfig::from_env`] reads the process environment;
//! [`MarketDataConfig::from_lookup`] accepts any key lookup so callers (and
//! tests) can supply values from elsewhere. Values are validated once here;
//! everything downstream assumes a valid configuration.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::models::{SymbolPolicy, DEFAULT_MAX_SYMBOL_LENGTH};
use crate::provider::RateLimit;
use crate::registry::{CircuitBreakerConfig, RetryPolicy};

const DEFAULT_PRIMARY_PROVIDER: &str = "YAHOO";
const DEFAULT_FALLBACK_PROVIDERS: &str = "FINNHUB,ALPHA_VANTAGE,POLYGON";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF: f64 = 2.0;
const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 1.0;
const DEFAULT_RETRY_MAX_DELAY_SECS: f64 = 30.0;
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BREAKER_WINDOW_SECS: u64 = 300;
const DEFAULT_STALE_MAX_AGE_SECS: u64 = 600;
const DEFAULT_CIRCUIT_TEST_SYMBOL: &str = "AAPL";

/// Configuration errors, reported at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("{key}: {message}")]
    OutOfRange { key: String, message: String },

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider {0} listed more than once")]
    DuplicateProvider(String),

    #[error("No usable providers configured (missing API keys?)")]
    NoProviders,
}

/// The external data sources this crate can talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Yahoo,
    Finnhub,
    AlphaVantage,
    Polygon,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Yahoo,
        ProviderKind::Finnhub,
        ProviderKind::AlphaVantage,
        ProviderKind::Polygon,
    ];

    /// Identifier used in logs, breaker state and configuration keys.
    pub fn id(self) -> &'static str {
        match self {
            Self::Yahoo => "YAHOO",
            Self::Finnhub => "FINNHUB",
            Self::AlphaVantage => "ALPHA_VANTAGE",
            Self::Polygon => "POLYGON",
        }
    }

    /// Environment key holding the API key, for providers that need one.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::Yahoo => None,
            Self::Finnhub => Some("FINNHUB_API_KEY"),
            Self::AlphaVantage => Some("ALPHA_VANTAGE_API_KEY"),
            Self::Polygon => Some("POLYGON_API_KEY"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    /// Accepts `ALPHA_VANTAGE`, `alpha_vantage`, `alpha-vantage` and `alphavantage`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "YAHOO" | "YAHOOFINANCE" => Ok(Self::Yahoo),
            "FINNHUB" => Ok(Self::Finnhub),
            "ALPHAVANTAGE" => Ok(Self::AlphaVantage),
            "POLYGON" | "POLYGONIO" => Ok(Self::Polygon),
            _ => Err(ConfigError::UnknownProvider(s.trim().to_string())),
        }
    }
}

/// Per-provider settings in priority order.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub weight: u32,
    /// Overrides the provider's built-in client-side rate limit.
    pub rate_limit: Option<RateLimit>,
}

impl ProviderSettings {
    /// Whether the provider can be built with the available credentials.
    pub fn is_usable(&self) -> bool {
        self.kind.api_key_var().is_none() || self.api_key.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct MarketDataConfig {
    /// Primary first, then fallbacks, in the configured order.
    pub providers: Vec<ProviderSettings>,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    /// Oldest cache entry that may be served when every provider fails.
    /// `None` disables the stale fallback.
    pub stale_max_age: Option<Duration>,
    pub symbols: SymbolPolicy,
    pub circuit_test_symbol: String,
}

impl MarketDataConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let cache_ttl = env.seconds("CACHE_TTL", DEFAULT_CACHE_TTL_SECS as f64)?;
        require_positive("CACHE_TTL", cache_ttl)?;

        let request_timeout = env.seconds("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        require_positive("REQUEST_TIMEOUT", request_timeout)?;

        let max_retries: u32 = env.parse("MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        if max_retries < 1 {
            return Err(out_of_range("MAX_RETRIES", "must be at least 1"));
        }

        let backoff: f64 = env.parse("RETRY_BACKOFF", DEFAULT_RETRY_BACKOFF)?;
        if !backoff.is_finite() || backoff < 1.0 {
            return Err(out_of_range("RETRY_BACKOFF", "must be at least 1.0"));
        }

        let base_delay = env.seconds("RETRY_BASE_DELAY", DEFAULT_RETRY_BASE_DELAY_SECS)?;
        let max_delay = env.seconds("RETRY_MAX_DELAY", DEFAULT_RETRY_MAX_DELAY_SECS)?;
        if max_delay < base_delay {
            return Err(out_of_range(
                "RETRY_MAX_DELAY",
                "must not be below RETRY_BASE_DELAY",
            ));
        }
        let jitter = env.flag("RETRY_JITTER", false)?;

        let threshold: u32 = env.parse("CIRCUIT_BREAKER_THRESHOLD", DEFAULT_BREAKER_THRESHOLD)?;
        if threshold < 1 {
            return Err(out_of_range("CIRCUIT_BREAKER_THRESHOLD", "must be at least 1"));
        }

        let recovery_timeout =
            env.seconds("CIRCUIT_BREAKER_TIMEOUT", DEFAULT_BREAKER_TIMEOUT_SECS as f64)?;
        require_positive("CIRCUIT_BREAKER_TIMEOUT", recovery_timeout)?;

        let window = env.seconds("CIRCUIT_BREAKER_WINDOW", DEFAULT_BREAKER_WINDOW_SECS as f64)?;
        let stale_max_age = env.seconds("STALE_MAX_AGE", DEFAULT_STALE_MAX_AGE_SECS as f64)?;

        let max_symbol_length: usize =
            env.parse("MAX_SYMBOL_LENGTH", DEFAULT_MAX_SYMBOL_LENGTH)?;
        if max_symbol_length == 0 {
            return Err(out_of_range("MAX_SYMBOL_LENGTH", "must be at least 1"));
        }
        let allowed = split_list(&env.get("ALLOWED_SYMBOLS").unwrap_or_default());

        let circuit_test_symbol = env
            .get("CIRCUIT_TEST_SYMBOL")
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CIRCUIT_TEST_SYMBOL.to_string());

        let providers = provider_order(&env)?
            .into_iter()
            .map(|kind| provider_settings(&env, kind, request_timeout))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            providers,
            cache_ttl,
            request_timeout,
            retry: RetryPolicy {
                max_attempts: max_retries,
                base_delay,
                max_delay,
                multiplier: backoff,
                jitter,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout,
                failure_window: (!window.is_zero()).then_some(window),
            },
            stale_max_age: (!stale_max_age.is_zero()).then_some(stale_max_age),
            symbols: SymbolPolicy::new(allowed, max_symbol_length),
            circuit_test_symbol,
        })
    }

    /// Providers that have the credentials they need, in priority order.
    pub fn usable_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| {
            if !p.is_usable() {
                debug!("Skipping {} provider: no API key configured", p.kind);
            }
            p.is_usable()
        })
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            providers: ProviderKind::ALL
                .iter()
                .map(|kind| ProviderSettings {
                    kind: *kind,
                    api_key: None,
                    timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
                    weight: 1,
                    rate_limit: None,
                })
                .collect(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            stale_max_age: Some(Duration::from_secs(DEFAULT_STALE_MAX_AGE_SECS)),
            symbols: SymbolPolicy::default(),
            circuit_test_symbol: DEFAULT_CIRCUIT_TEST_SYMBOL.to_string(),
        }
    }
}

/// Typed access over a raw key lookup. Empty values count as unset.
struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    /// Non-negative seconds, fractional allowed.
    fn seconds(&self, key: &str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parse(key, default)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(out_of_range(key, "must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|_| out_of_range(key, "is too large"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                }),
            },
        }
    }
}

fn out_of_range(key: &str, message: &str) -> ConfigError {
    ConfigError::OutOfRange {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn require_positive(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(out_of_range(key, "must be greater than 0"));
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn provider_order<F>(env: &Lookup<F>) -> Result<Vec<ProviderKind>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let primary = env
        .get("PRIMARY_PROVIDER")
        .unwrap_or_else(|| DEFAULT_PRIMARY_PROVIDER.to_string());
    let fallbacks = env
        .get("FALLBACK_PROVIDERS")
        .unwrap_or_else(|| DEFAULT_FALLBACK_PROVIDERS.to_string());

    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for name in std::iter::once(primary).chain(split_list(&fallbacks)) {
        let kind: ProviderKind = name.parse()?;
        if !seen.insert(kind) {
            return Err(ConfigError::DuplicateProvider(kind.id().to_string()));
        }
        order.push(kind);
    }
    Ok(order)
}

fn provider_settings<F>(
    env: &Lookup<F>,
    kind: ProviderKind,
    default_timeout: Duration,
) -> Result<ProviderSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let id = kind.id();

    let timeout_key = format!("{}_TIMEOUT", id);
    let timeout = env.seconds(&timeout_key, default_timeout.as_secs_f64())?;
    require_positive(&timeout_key, timeout)?;

    let weight = env.parse(&format!("{}_WEIGHT", id), 1u32)?;

    let rate_key = format!("{}_RATE_LIMIT", id);
    let rate_limit = match env.get(&rate_key) {
        Some(_) => {
            let per_minute: u32 = env.parse(&rate_key, 0)?;
            if per_minute == 0 {
                return Err(out_of_range(&rate_key, "must be at least 1 request per minute"));
            }
            Some(RateLimit::per_minute(per_minute))
        }
        None => None,
    };

    Ok(ProviderSettings {
        kind,
        api_key: kind.api_key_var().and_then(|var| env.get(var)),
        timeout,
        weight,
        rate_limit,
    })
}
