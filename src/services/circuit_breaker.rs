//! Per-backend circuit breakers.
//!
//! Each backend URL gets one three-state failure detector shared by every
//! request targeting that backend. Only transport-level failures trip the
//! breaker; upstream HTTP statuses, including 5xx, are reported as success
//! by the dispatcher.

use ahash::HashMap as AHashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{info, warn};

/// State of a circuit breaker.
///
/// * `Closed` - normal operation, all calls proceed
/// * `Open` - calls are refused without invoking the work
/// * `HalfOpen` - a bounded number of concurrent probes test recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds and timings controlling state transitions.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transport failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit refuses calls before admitting a probe.
    pub open_duration: Duration,
    /// Concurrent probes admitted while half-open.
    pub half_open_probe_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_probe_limit: 1,
        }
    }
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// A single backend's circuit breaker.
///
/// All transitions happen under one mutex and are atomic with respect to
/// concurrent callers; the lock is never held across an await point. The
/// wrapped work runs outside the lock.
///
/// # State machine
///
/// - `Closed`: calls proceed. Success resets the failure count; a failure
///   increments it, and reaching `failure_threshold` opens the circuit.
/// - `Open`: calls are refused until `open_duration` has elapsed since
///   `opened_at`; the next admission then becomes a half-open probe.
/// - `HalfOpen`: at most `half_open_probe_limit` probes run concurrently,
///   further callers are refused. A probe success closes the circuit; a
///   probe failure re-opens it with a fresh `opened_at`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
}

/// Errors surfaced by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit refused the call without invoking the work.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// The work ran and returned an error; the failure has been recorded.
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Permission to run one call, handed out by `try_admit`.
///
/// Dropping an unsettled admission (the caller's future was cancelled)
/// releases a half-open probe slot without recording an outcome.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Admission<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.settle(self.probe, true);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.settle(self.probe, false);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe_slot();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            core: Mutex::new(Core {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        })
    }

    /// Executes `work` under breaker protection.
    ///
    /// Refuses immediately with `CircuitOpen` when the circuit is open (or
    /// half-open with all probe slots taken). Otherwise runs the work and
    /// records its outcome: `Ok` counts as success regardless of what the
    /// value contains, `Err` counts as a failure.
    pub async fn call<F, T, E>(&self, work: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let admission = match self.try_admit() {
            Some(admission) => admission,
            None => return Err(CircuitBreakerError::CircuitOpen),
        };

        match work.await {
            Ok(value) => {
                admission.succeed();
                Ok(value)
            }
            Err(error) => {
                admission.fail();
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    fn try_admit(&self) -> Option<Admission<'_>> {
        let mut core = self.lock_core();

        match core.state {
            CircuitState::Closed => Some(Admission {
                breaker: self,
                probe: false,
                settled: false,
            }),
            CircuitState::Open => {
                let elapsed = core
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    core.state = CircuitState::HalfOpen;
                    core.half_open_in_flight = 1;
                    info!("circuit breaker {} half-open, probing", self.name);
                    Some(Admission {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if core.half_open_in_flight < self.config.half_open_probe_limit {
                    core.half_open_in_flight += 1;
                    Some(Admission {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn settle(&self, probe: bool, success: bool) {
        let mut core = self.lock_core();

        if probe {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }

        if success {
            match core.state {
                CircuitState::HalfOpen if probe => {
                    core.state = CircuitState::Closed;
                    core.consecutive_failures = 0;
                    core.opened_at = None;
                    core.half_open_in_flight = 0;
                    info!("circuit breaker {} closed, backend recovered", self.name);
                }
                CircuitState::Closed => {
                    core.consecutive_failures = 0;
                }
                // A stale probe settling after the circuit re-opened does not
                // change the state.
                _ => {}
            }
        } else {
            match core.state {
                CircuitState::Closed => {
                    core.consecutive_failures += 1;
                    if core.consecutive_failures >= self.config.failure_threshold {
                        self.open(&mut core);
                    }
                }
                CircuitState::HalfOpen => {
                    self.open(&mut core);
                }
                CircuitState::Open => {}
            }
        }
    }

    fn open(&self, core: &mut Core) {
        core.state = CircuitState::Open;
        core.opened_at = Some(Instant::now());
        core.half_open_in_flight = 0;
        warn!(
            "circuit breaker {} opened after {} consecutive failures",
            self.name, core.consecutive_failures
        );
    }

    fn release_probe_slot(&self) {
        let mut core = self.lock_core();
        core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock_core().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_core().consecutive_failures
    }
}

/// One breaker's state as reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Maps backend URLs to their breakers.
///
/// A breaker is created lazily on the first dispatch to a backend and lives
/// for the process; every request targeting the same backend URL shares it.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<AHashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(AHashMap::default()),
        }
    }

    /// Returns the breaker for `backend`, creating it on first use.
    pub fn breaker_for(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(backend)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A concurrent writer may have beaten us to the insert.
        Arc::clone(
            breakers
                .entry(backend.to_string())
                .or_insert_with(|| CircuitBreaker::new(backend.to_string(), self.config.clone())),
        )
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(backend, breaker)| BreakerSnapshot {
                backend: backend.clone(),
                state: breaker.state(),
                consecutive_failures: breaker.consecutive_failures(),
            })
            .collect()
    }
}
