//! MarketPulse command line entry point.
//!
//! Reads configuration from the environment (and `.env`), builds the quote
//! router and runs one command against it.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `marketpulse quote AAPL EUR/USD` | Latest quote per symbol, with fallback |
//! | `marketpulse quote AAPL --provider FINNHUB` | Single-provider fetch |
//! | `marketpulse status AAPL` | Cache and breaker state for a symbol |
//! | `marketpulse circuit-test YAHOO` | Trip and probe one provider's breaker |
//! | `marketpulse providers` | Configured providers in priority order |

mod main_lib;

use std::time::Duration;

use clap::{Parser, Subcommand};
use main_lib::{build_router, init_tracing, print_json};

/// Command line interface for MarketPulse
#[derive(Parser, Debug)]
#[command(name = "marketpulse")]
#[command(about = "Resilient latest-quote fetcher")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the latest quote for one or more symbols
    Quote {
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Fetch from this provider only, without fallback
        #[arg(long)]
        provider: Option<String>,

        /// Freshness window in seconds for this request
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Show cache and circuit breaker state for a symbol
    Status { symbol: String },

    /// Force a trip-and-probe cycle on a provider's circuit breaker
    CircuitTest { provider: String },

    /// List configured providers in priority order
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let router = build_router()?;

    match cli.command {
        Command::Quote {
            symbols,
            provider,
            ttl,
        } => {
            let mut failed = 0usize;
            for symbol in &symbols {
                let result = match (&provider, ttl) {
                    (Some(provider), _) => router
                        .fetch_from(provider, symbol)
                        .await
                        .map(|quote| serde_json::to_value(quote)),
                    (None, Some(ttl)) => router
                        .get_quote_with_ttl(symbol, Duration::from_secs(ttl))
                        .await
                        .map(|outcome| serde_json::to_value(outcome)),
                    (None, None) => router
                        .get_quote(symbol)
                        .await
                        .map(|outcome| serde_json::to_value(outcome)),
                };

                match result {
                    Ok(value) => print_json(&value?)?,
                    Err(e) => {
                        tracing::error!("{}: {}", symbol, e);
                        failed += 1;
                    }
                }
            }

            for (provider, metrics) in router.provider_metrics() {
                tracing::debug!(
                    provider = %provider,
                    successes = metrics.successes,
                    failures = metrics.failures.total(),
                    skipped = metrics.skipped,
                    mean_latency_ms = ?metrics.mean_latency_ms,
                    "Provider outcomes"
                );
            }

            if failed > 0 {
                anyhow::bail!("{} of {} quote(s) failed", failed, symbols.len());
            }
        }
        Command::Status { symbol } => print_json(&router.get_status(&symbol)?)?,
        Command::CircuitTest { provider } => {
            print_json(&router.test_circuit(&provider).await?)?;
        }
        Command::Providers => {
            let descriptors: Vec<_> = router.providers().iter().map(|p| &p.descriptor).collect();
            print_json(&descriptors)?;
        }
    }

    Ok(())
}
