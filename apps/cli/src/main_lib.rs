use std::sync::Arc;

use marketpulse_market_data::{build_providers, MarketDataConfig, ProviderRouter};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    let log_format =
        std::env::var("MARKETPULSE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Load configuration and build the router with every usable provider.
pub fn build_router() -> anyhow::Result<Arc<ProviderRouter>> {
    let config = MarketDataConfig::from_env()?;
    tracing::debug!(
        "Config: ttl={:?} timeout={:?} retries={} threshold={}",
        config.cache_ttl,
        config.request_timeout,
        config.retry.max_attempts,
        config.breaker.failure_threshold
    );

    let providers = build_providers(&config)?;
    let router = ProviderRouter::with_config(&config, providers)?;
    Ok(Arc::new(router))
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
