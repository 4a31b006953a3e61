use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::FailureKind;
use crate::registry::{CircuitState, ProviderMetrics};

/// Breaker, configuration and outcome snapshot for one provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Seconds left on a `Retry-After` hold, rounded up.
    pub retry_after_secs: Option<u64>,
    pub priority: u32,
    pub weight: u32,
    pub metrics: ProviderMetrics,
}

/// Diagnostic view of a symbol, backing the market status endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteStatus {
    pub symbol: String,
    /// A cache entry exists, fresh or not.
    pub cached: bool,
    /// The cache entry is within its TTL.
    pub fresh: bool,
    pub cache_age_secs: Option<u64>,
    pub breaker_states: BTreeMap<String, ProviderStatus>,
}

/// Result of the single probe made during a circuit test.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
    /// Another probe already held the HalfOpen slot.
    Skipped,
}

/// Report of a forced trip-and-probe cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CircuitTestReport {
    pub provider: String,
    pub probe_symbol: String,
    pub state_before: CircuitState,
    pub state_after_trip: CircuitState,
    pub probe: ProbeOutcome,
    pub final_state: CircuitState,
}
