use dashmap::DashMap;
use gantry_core::config::CircuitBreakerConfig;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// half_open admits at most one probe dispatch at a time.
    probe_in_flight: bool,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Read-only view for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub open_for_seconds: Option<u64>,
}

/// Per-upstream three-state circuit breaker.
///
/// Driven exclusively by real dispatch outcomes: failure = connect error,
/// timeout, or upstream 5xx; success = any response with status < 500.
/// Client-side cancellations report neither.
pub struct CircuitBreaker {
    circuits: DashMap<String, Circuit>,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    enabled: bool,
}

impl CircuitBreaker {
    pub fn new(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            failure_threshold: cfg.failure_threshold,
            success_threshold: cfg.success_threshold,
            open_timeout: Duration::from_secs(cfg.open_timeout_seconds),
            enabled: cfg.enabled,
        }
    }

    /// May a dispatch to `service` proceed right now?
    ///
    /// In `open`, flips to `half_open` once the open timeout has elapsed and
    /// admits the caller as the single probe.
    pub fn allow(&self, service: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let mut circuit = self.circuits.entry(service.to_string()).or_default();
        match circuit.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed =
                    circuit.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.open_timeout {
                    info!(service, "circuit half-open, admitting probe");
                    circuit.state = BreakerState::HalfOpen;
                    circuit.consecutive_successes = 0;
                    circuit.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if circuit.probe_in_flight {
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, service: &str) {
        if !self.enabled {
            return;
        }
        let mut circuit = self.circuits.entry(service.to_string()).or_default();
        match circuit.state {
            BreakerState::Closed => {
                circuit.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                circuit.probe_in_flight = false;
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.success_threshold {
                    info!(service, "circuit closed after recovery");
                    *circuit = Circuit::default();
                }
            }
            // A late result for a request admitted before the circuit opened.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, service: &str) {
        if !self.enabled {
            return;
        }
        let mut circuit = self.circuits.entry(service.to_string()).or_default();
        match circuit.state {
            BreakerState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.failure_threshold {
                    warn!(
                        service,
                        failures = circuit.consecutive_failures,
                        "circuit opened"
                    );
                    circuit.state = BreakerState::Open;
                    circuit.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(service, "probe failed, circuit re-opened");
                circuit.state = BreakerState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.consecutive_successes = 0;
                circuit.probe_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self, service: &str) -> BreakerState {
        self.circuits
            .get(service)
            .map(|c| c.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn is_open(&self, service: &str) -> bool {
        self.state(service) == BreakerState::Open
    }

    /// Release a half-open probe slot without recording an outcome — the
    /// client cancelled before the upstream answered, which counts as
    /// neither success nor failure.
    pub fn abandon_probe(&self, service: &str) {
        if !self.enabled {
            return;
        }
        if let Some(mut circuit) = self.circuits.get_mut(service) {
            if circuit.state == BreakerState::HalfOpen {
                circuit.probe_in_flight = false;
            }
        }
    }

    /// Administrative reset: force closed and zero all counters.
    pub fn reset(&self, service: &str) {
        self.circuits.insert(service.to_string(), Circuit::default());
        info!(service, "circuit reset by administrator");
    }

    pub fn snapshot(&self, service: &str) -> CircuitSnapshot {
        let make = |c: &Circuit| CircuitSnapshot {
            service: service.to_string(),
            state: c.state,
            consecutive_failures: c.consecutive_failures,
            consecutive_successes: c.consecutive_successes,
            open_for_seconds: c.opened_at.map(|t| t.elapsed().as_secs()),
        };
        match self.circuits.get(service) {
            Some(c) => make(&c),
            None => make(&Circuit::default()),
        }
    }
}
