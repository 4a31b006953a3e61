//! Builds provider clients from configuration.

use std::sync::Arc;

use log::{info, warn};

use super::alpha_vantage::AlphaVantageProvider;
use super::finnhub::FinnhubProvider;
use super::polygon::PolygonProvider;
use super::yahoo::YahooProvider;
use super::{ProviderDescriptor, QuoteProvider, RateLimit};
use crate::config::{ConfigError, MarketDataConfig, ProviderKind, ProviderSettings};

/// A provider client together with the settings the router applies to it.
#[derive(Clone)]
pub struct ConfiguredProvider {
    pub descriptor: ProviderDescriptor,
    pub client: Arc<dyn QuoteProvider>,
    /// Effective client-side limit: the configured override, else the
    /// provider's own default.
    pub rate_limit: Option<RateLimit>,
}

impl ConfiguredProvider {
    /// Wrap a client, using its own default rate limit.
    pub fn new(descriptor: ProviderDescriptor, client: Arc<dyn QuoteProvider>) -> Self {
        let rate_limit = client.rate_limit();
        Self {
            descriptor,
            client,
            rate_limit,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Build every usable provider in priority order.
///
/// Providers without a required API key, or whose client fails to
/// initialize, are skipped with a log line. Fails only when nothing is left.
pub fn build_providers(config: &MarketDataConfig) -> Result<Vec<ConfiguredProvider>, ConfigError> {
    let mut built = Vec::new();
    let mut init_errors = Vec::new();

    for settings in config.usable_providers() {
        let client = match create_provider(settings) {
            Ok(client) => client,
            Err(message) => {
                warn!("Failed to initialize {} provider: {}", settings.kind, message);
                init_errors.push(settings.kind);
                continue;
            }
        };

        let priority = u32::try_from(built.len()).unwrap_or(u32::MAX);
        let rate_limit = settings.rate_limit.clone().or_else(|| client.rate_limit());

        built.push(ConfiguredProvider {
            descriptor: ProviderDescriptor::new(settings.kind.id(), priority, settings.timeout)
                .with_weight(settings.weight),
            client,
            rate_limit,
        });
    }

    if built.is_empty() {
        warn!(
            "No quote providers could be built (init failures: {:?})",
            init_errors
        );
        return Err(ConfigError::NoProviders);
    }

    info!(
        "Quote providers initialized in priority order: {:?}",
        built
            .iter()
            .map(|p| &*p.descriptor.id)
            .collect::<Vec<&str>>()
    );
    Ok(built)
}

fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn QuoteProvider>, String> {
    let api_key = || settings.api_key.clone().unwrap_or_default();

    let client: Arc<dyn QuoteProvider> = match settings.kind {
        ProviderKind::Yahoo => Arc::new(YahooProvider::new().map_err(|e| e.to_string())?),
        ProviderKind::Finnhub => Arc::new(FinnhubProvider::new(api_key(), settings.timeout)),
        ProviderKind::AlphaVantage => {
            Arc::new(AlphaVantageProvider::new(api_key(), settings.timeout))
        }
        ProviderKind::Polygon => Arc::new(PolygonProvider::new(api_key(), settings.timeout)),
    };
    Ok(client)
}
