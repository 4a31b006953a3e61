//! Skip reason tracking for provider selection diagnostics.

use std::fmt;

use crate::errors::FailureKind;
use crate::models::ProviderId;

/// Why a provider was skipped during a fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// Circuit breaker is open for this provider.
    CircuitBreakerOpen,

    /// Circuit is half-open and another request holds the probe slot.
    ProbeInFlight,

    /// The provider asked us to back off via `Retry-After`.
    RetryAfter,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitBreakerOpen => write!(f, "circuit open"),
            Self::ProbeInFlight => write!(f, "probe in flight"),
            Self::RetryAfter => write!(f, "retry-after hold"),
        }
    }
}

/// Record of a single provider attempt during a fetch.
#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub skipped: Option<SkipReason>,
    pub error: Option<(FailureKind, String)>,
    /// Calls made to the provider, including retries.
    pub calls: u32,
    pub success: bool,
}

/// Per-request trace of how each provider was handled.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: Some(reason),
            error: None,
            calls: 0,
            success: false,
        });
    }

    pub fn record_error(
        &mut self,
        provider_id: ProviderId,
        kind: FailureKind,
        error: String,
        calls: u32,
    ) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: Some((kind, error)),
            calls,
            success: false,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId, calls: u32) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: None,
            calls,
            success: true,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({})", a.provider_id, skip)
                } else if let Some((kind, err)) = &a.error {
                    format!("{}: ERROR [{}] ({})", a.provider_id, kind, err)
                } else {
                    format!("{}: UNKNOWN", a.provider_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Total provider calls across the request.
    pub fn total_calls(&self) -> u32 {
        self.attempts.iter().map(|a| a.calls).sum()
    }

    pub fn skip_reasons(&self) -> Vec<(&ProviderId, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (&a.provider_id, s)))
            .collect()
    }
}
