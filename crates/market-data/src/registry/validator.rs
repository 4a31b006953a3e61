//! Quote data validation.
//!
//! Validates quotes returned by providers before they are cached:
//! - Strictly positive price
//! - Price below a sanity ceiling
//! - Three-letter currency code
//! - Quote belongs to the requested symbol
//! - Timestamp not in the future (warning only)

use chrono::{Duration as ChronoDuration, Utc};
use log::warn;
use rust_decimal::Decimal;

use crate::errors::ProviderError;
use crate::models::{Quote, Symbol};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - reject quote, count as a provider failure.
    Hard,
    /// Soft warning - accept quote but log warning.
    Soft,
}

/// A single validation finding.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

/// Quote validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Maximum allowed price value (for sanity check).
    pub max_price: Option<Decimal>,
    /// How far ahead of the local clock a provider timestamp may be before
    /// a warning is logged.
    pub future_skew: ChronoDuration,
    /// Reject quotes whose symbol differs from the requested one.
    pub require_symbol_match: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
            future_skew: ChronoDuration::days(1),
            require_symbol_match: true,
        }
    }
}

/// Quote data validator.
pub struct QuoteValidator {
    config: ValidatorConfig,
}

impl QuoteValidator {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a quote fetched for `requested`.
    ///
    /// Hard issues become a `DataInvalid` error attributed to the quote's
    /// provider. Soft issues are logged and the quote is accepted.
    pub fn validate(&self, quote: &Quote, requested: &Symbol) -> Result<(), ProviderError> {
        let issues = self.issues(quote, requested);

        let errors: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !errors.is_empty() {
            return Err(ProviderError::data_invalid(
                quote.provider_id.clone(),
                errors.join("; "),
            ));
        }

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!(
                "Quote validation warning for {} from {}: {}",
                quote.symbol, quote.provider_id, issue.message
            );
        }

        Ok(())
    }

    /// Collect every issue with a quote, without deciding acceptance.
    pub fn issues(&self, quote: &Quote, requested: &Symbol) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if quote.price <= Decimal::ZERO {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!("Non-positive price: {}", quote.price),
            });
        }

        if let Some(max_price) = self.config.max_price {
            if quote.price > max_price {
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Hard,
                    message: format!(
                        "Price {} exceeds sanity limit {}",
                        quote.price, max_price
                    ),
                });
            }
        }

        let currency_ok =
            quote.currency.len() == 3 && quote.currency.chars().all(|c| c.is_ascii_uppercase());
        if !currency_ok {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!("Malformed currency code: '{}'", quote.currency),
            });
        }

        if self.config.require_symbol_match && quote.symbol != requested.as_str() {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!(
                    "Quote is for {} but {} was requested",
                    quote.symbol, requested
                ),
            });
        }

        if quote.timestamp > Utc::now() + self.config.future_skew {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Soft,
                message: format!("Timestamp {} is in the future", quote.timestamp),
            });
        }

        issues
    }
}

impl Default for QuoteValidator {
    fn default() -> Self {
        Self::new()
    }
}
