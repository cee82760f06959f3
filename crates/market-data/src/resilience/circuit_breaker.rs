//! Process-wide circuit breaker over the upstream attribute source.
//!
//! Implements the circuit breaker pattern so that a throttling or failing
//! upstream is not hammered by every remaining entity of a scan. The circuit
//! has three states:
//!
//! - **Closed**: Normal operation, fresh fetches are allowed.
//! - **Open**: Upstream is failing, fresh fetches are blocked until the cooldown elapses.
//! - **HalfOpen**: Cooldown elapsed, a single probe fetch is allowed through.
//!
//! Only the state transition is performed under the lock; callers never hold
//! it across the upstream call itself. Each admitted fetch carries an
//! [`Admission`] back with its outcome, so only the HalfOpen probe itself can
//! close, reopen or release the circuit.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time to wait before transitioning from Open to HalfOpen.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Upstream is failing - requests are blocked.
    Open,
    /// Testing recovery - one probe request allowed.
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

/// Permission for one fresh upstream fetch, handed back with its outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Admitted while Closed.
    Normal,
    /// The single HalfOpen probe, identified so that stale tokens are ignored.
    Probe(u64),
}

impl Admission {
    pub fn is_probe(&self) -> bool {
        matches!(self, Admission::Probe(_))
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    /// Id of the probe currently in flight.
    probe: Option<u64>,
    next_probe: u64,
    /// Number of transitions into Open since construction or reset.
    activations: u64,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe: None,
            next_probe: 0,
            activations: 0,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe = None;
        self.activations += 1;
    }

    fn admit_probe(&mut self) -> Admission {
        self.next_probe += 1;
        self.probe = Some(self.next_probe);
        Admission::Probe(self.next_probe)
    }

    /// Whether `admission` is the probe currently deciding a HalfOpen circuit.
    fn holds_probe(&self, admission: Admission) -> bool {
        match admission {
            Admission::Probe(id) => self.state == CircuitState::HalfOpen && self.probe == Some(id),
            Admission::Normal => false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive upstream failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait in Open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub activations: u64,
}

/// Thread-safe circuit breaker shared by every batch of every run.
pub struct CircuitBreaker {
    circuit: Mutex<Circuit>,
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

    /// Create a circuit breaker with custom configuration and time source.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuit: Mutex::new(Circuit::new()),
            config,
            clock,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    ///
    /// The worst case of recovering is a slightly stale failure count,
    /// which is better than panicking mid-scan.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check whether a fresh upstream fetch may be attempted.
    ///
    /// Returns an [`Admission`] if the circuit is Closed, or HalfOpen with no
    /// probe in flight (the caller becomes the probe). Returns `None` while
    /// Open and cooling down, or while another probe is outstanding.
    ///
    /// Handles the Open -> HalfOpen transition once the cooldown has elapsed.
    pub fn allow_fresh_fetch(&self) -> Option<Admission> {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen => {
                if circuit.probe.is_some() {
                    None
                } else {
                    Some(circuit.admit_probe())
                }
            }
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|opened| self.clock.now().signed_duration_since(opened))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.cooldown {
                    info!(
                        "Circuit breaker: cooldown of {:?} elapsed, transitioning from Open to HalfOpen",
                        self.config.cooldown
                    );
                    circuit.state = CircuitState::HalfOpen;
                    Some(circuit.admit_probe())
                } else {
                    None
                }
            }
        }
    }

    /// Record a successful upstream fetch.
    ///
    /// Resets the consecutive failure count. Only the in-flight probe closes
    /// a HalfOpen circuit; late successes from older admissions do not.
    pub fn record_success(&self, admission: Admission) {
        let mut circuit = self.lock_circuit();
        circuit.consecutive_failures = 0;

        if circuit.holds_probe(admission) {
            info!("Circuit breaker: probe succeeded, closing circuit");
            circuit.state = CircuitState::Closed;
            circuit.opened_at = None;
            circuit.probe = None;
            return;
        }

        match circuit.state {
            CircuitState::Closed => {
                debug!("Circuit breaker: success, failure count reset");
            }
            state => {
                // A fetch admitted before the circuit opened finished late.
                debug!("Circuit breaker: late success while {}, state unchanged", state);
            }
        }
    }

    /// Record a terminal upstream failure (rate limit or transient).
    ///
    /// Returns true if this call opened the circuit.
    pub fn record_failure(&self, admission: Admission, is_rate_limit: bool) -> bool {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();
        circuit.consecutive_failures += 1;

        if circuit.holds_probe(admission) {
            warn!("Circuit breaker: probe failed, reopening circuit");
            circuit.open(now);
            return true;
        }

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker: opening circuit after {} consecutive failures (last was {})",
                        circuit.consecutive_failures,
                        if is_rate_limit { "a rate limit" } else { "transient" }
                    );
                    circuit.open(now);
                    true
                } else {
                    debug!(
                        "Circuit breaker: failure ({}/{})",
                        circuit.consecutive_failures, self.config.failure_threshold
                    );
                    false
                }
            }
            state => {
                debug!("Circuit breaker: late failure while {}, state unchanged", state);
                false
            }
        }
    }

    /// Record an upstream error, routing by its retry class.
    ///
    /// Entity-specific failures (unknown symbol) say nothing about upstream
    /// health: they never count toward the threshold and only release the
    /// probe slot if `admission` holds it. Returns true if this call opened
    /// the circuit.
    pub fn record_error(&self, admission: Admission, error: &MarketDataError) -> bool {
        if error.retry_class().affects_circuit() {
            self.record_failure(admission, error.is_rate_limit())
        } else {
            self.release_probe(admission);
            false
        }
    }

    /// Free the HalfOpen probe slot without recording an outcome.
    ///
    /// Used when a probe ends without a breaker-relevant result, such as an
    /// unknown symbol or a cancelled run. A no-op unless `admission` is the
    /// probe in flight.
    pub fn release_probe(&self, admission: Admission) {
        let mut circuit = self.lock_circuit();
        if circuit.holds_probe(admission) {
            debug!("Circuit breaker: probe released without outcome");
            circuit.probe = None;
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    /// Get the consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock_circuit().consecutive_failures
    }

    /// Number of times the circuit has opened.
    pub fn activations(&self) -> u64 {
        self.lock_circuit().activations
    }

    /// Snapshot of the full breaker state.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let circuit = self.lock_circuit();
        CircuitSnapshot {
            state: circuit.state,
            consecutive_failures: circuit.consecutive_failures,
            opened_at: circuit.opened_at,
            activations: circuit.activations,
        }
    }

    /// Force the circuit back to Closed.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        info!("Circuit breaker: manually resetting circuit");
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
        circuit.probe = None;
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
