//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop hammering a provider that
//! keeps failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are blocked.
//! - **HalfOpen**: Cooldown elapsed; exactly one probe request may run.
//!
//! Independently of state, a provider that answered with `Retry-After` is
//! held off until that deadline passes.
//!
//! The circuit breaker is in-memory and resets on process restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::errors::FailureKind;
use crate::models::ProviderId;

/// Default number of failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default window in which consecutive failures must accumulate.
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(300);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
    /// Testing recovery - a single probe is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Weighted count of consecutive failures.
    consecutive_failures: u32,
    /// When the circuit last opened.
    opened_at: Option<Instant>,
    /// Most recent failure, for the failure window.
    last_failure: Option<Instant>,
    /// A HalfOpen probe has been handed out and not yet reported back.
    probe_in_flight: bool,
    /// Refuse every request before this instant (provider `Retry-After`).
    held_until: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure: None,
            probe_in_flight: false,
            held_until: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.last_failure = None;
        self.probe_in_flight = false;
        self.held_until = None;
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Weighted failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait in Open before allowing a probe.
    pub recovery_timeout: Duration,
    /// Failures further apart than this do not accumulate.
    /// `None` counts every failure until a success.
    pub failure_window: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            failure_window: Some(DEFAULT_FAILURE_WINDOW),
        }
    }
}

/// Per-provider circuit breaker registry.
///
/// Each provider's circuit sits behind its own mutex; the outer map is only
/// write-locked the first time a provider is seen. Calls for different
/// providers never contend.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, Arc<Mutex<Circuit>>>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker that reads time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Fetch (or create) the circuit for a provider.
    fn circuit(&self, provider: &ProviderId) -> Arc<Mutex<Circuit>> {
        {
            let circuits = self.circuits.read().unwrap_or_else(|poisoned| {
                warn!("Circuit breaker registry lock was poisoned, recovering");
                poisoned.into_inner()
            });
            if let Some(circuit) = circuits.get(provider.as_ref()) {
                return circuit.clone();
            }
        }

        let mut circuits = self.circuits.write().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker registry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        circuits
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Circuit::new())))
            .clone()
    }

    /// Lock a circuit, recovering from poison if necessary.
    fn lock(circuit: &Mutex<Circuit>) -> MutexGuard<'_, Circuit> {
        circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check if a request may be sent to a provider.
    ///
    /// Returns true if the circuit is Closed, or if it is HalfOpen and no
    /// probe is in flight. In the latter case the probe slot is claimed and
    /// must be handed back through `record_success`, `record_failure` or
    /// `release_probe`.
    ///
    /// Also performs the Open -> HalfOpen transition once the recovery
    /// timeout has elapsed since the circuit opened. A provider held off by
    /// [`hold_off`](Self::hold_off) is refused in every state until the
    /// hold expires.
    pub fn is_allowed(&self, provider: &ProviderId) -> bool {
        let now = self.clock.now();
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);

        if let Some(until) = circuit.held_until {
            if now < until {
                debug!(
                    "Circuit breaker: '{}' held off for another {:?}",
                    provider,
                    until - now
                );
                return false;
            }
            circuit.held_until = None;
        }

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    debug!(
                        "Circuit breaker: probe already in flight for '{}', refusing",
                        provider
                    );
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let cooled_down = circuit.opened_at.is_some_and(|opened_at| {
                    now.duration_since(opened_at) >= self.config.recovery_timeout
                });
                if cooled_down {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request for a provider.
    ///
    /// Resets the failure count and closes the circuit, whatever state it was in.
    pub fn record_success(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures > 0 {
                    debug!(
                        "Circuit breaker: success for '{}', failure count reset",
                        provider
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful probe",
                    provider
                );
            }
            CircuitState::Open => {
                // Only reachable if a caller bypassed is_allowed
                debug!(
                    "Circuit breaker: unexpected success for '{}' in Open state, closing",
                    provider
                );
            }
        }

        circuit.close();
    }

    /// Record a failed request for a provider.
    ///
    /// Adds the failure kind's weight to the count. A Closed circuit opens
    /// once the threshold is reached; a HalfOpen circuit reopens immediately.
    pub fn record_failure(&self, provider: &ProviderId, kind: FailureKind) {
        let now = self.clock.now();
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);

        if let (Some(window), Some(last)) = (self.config.failure_window, circuit.last_failure) {
            if circuit.state == CircuitState::Closed && now.duration_since(last) > window {
                debug!(
                    "Circuit breaker: previous failures for '{}' fell outside the window",
                    provider
                );
                circuit.consecutive_failures = 0;
            }
        }

        circuit.consecutive_failures = circuit
            .consecutive_failures
            .saturating_add(kind.breaker_weight());
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures (last: {})",
                        provider, circuit.consecutive_failures, kind
                    );
                    circuit.open(now);
                } else {
                    debug!(
                        "Circuit breaker: {} failure for '{}' ({}/{})",
                        kind, provider, circuit.consecutive_failures, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed probe ({})",
                    provider, kind
                );
                circuit.open(now);
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
        }
    }

    /// Hand back a claimed HalfOpen probe slot without reporting an outcome.
    ///
    /// Used when a caller abandons a request after `is_allowed` returned true.
    pub fn release_probe(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        if circuit.state == CircuitState::HalfOpen && circuit.probe_in_flight {
            debug!("Circuit breaker: releasing abandoned probe for '{}'", provider);
            circuit.probe_in_flight = false;
        }
    }

    /// Refuse requests to a provider for `wait`, whatever its state.
    ///
    /// Applied when a provider answers with `Retry-After`. An existing later
    /// deadline is kept.
    pub fn hold_off(&self, provider: &ProviderId, wait: Duration) {
        let until = self.clock.now() + wait;
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        if !circuit.held_until.is_some_and(|current| current >= until) {
            info!(
                "Circuit breaker: holding off '{}' for {:?} (Retry-After)",
                provider, wait
            );
            circuit.held_until = Some(until);
        }
    }

    /// Time left on a provider's `Retry-After` hold, if any.
    pub fn held_for(&self, provider: &ProviderId) -> Option<Duration> {
        let now = self.clock.now();
        let circuit = self.circuit(provider);
        let held_until = Self::lock(&circuit).held_until;
        held_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Force a provider's circuit open, as if the threshold had just been reached.
    pub fn trip(&self, provider: &ProviderId) {
        let now = self.clock.now();
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        info!("Circuit breaker: manually tripping circuit for '{}'", provider);
        circuit.consecutive_failures = circuit
            .consecutive_failures
            .max(self.config.failure_threshold);
        circuit.last_failure = Some(now);
        circuit.open(now);
    }

    /// Skip the remaining cooldown of an Open circuit, making it HalfOpen
    /// with the probe slot free. No-op for other states.
    pub fn force_half_open(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        if circuit.state == CircuitState::Open {
            info!(
                "Circuit breaker: forcing '{}' from Open to HalfOpen",
                provider
            );
            circuit.state = CircuitState::HalfOpen;
            circuit.probe_in_flight = false;
        }
    }

    /// Get the current state for a provider.
    ///
    /// An Open circuit whose cooldown has elapsed still reports Open until
    /// the next `is_allowed` call moves it to HalfOpen.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        let circuit = self.circuit(provider);
        let state = Self::lock(&circuit).state;
        state
    }

    /// Get the weighted consecutive failure count for a provider.
    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        let circuit = self.circuit(provider);
        let count = Self::lock(&circuit).consecutive_failures;
        count
    }

    /// Whether a HalfOpen probe is currently claimed.
    pub fn probe_in_flight(&self, provider: &ProviderId) -> bool {
        let circuit = self.circuit(provider);
        let in_flight = Self::lock(&circuit).probe_in_flight;
        in_flight
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            provider
        );
        Self::lock(&circuit).close();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
