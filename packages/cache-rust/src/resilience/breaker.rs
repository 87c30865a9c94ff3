//! Rolling-window circuit breaker guarding the far tier.
//!
//! Failures are sampled over a sliding time window. When the failure ratio
//! crosses the threshold (after a minimum number of samples), the circuit
//! opens and calls short-circuit without touching the backend. After the
//! break duration a single half-open probe is admitted; its outcome decides
//! between closing the circuit and re-opening it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Circuit-breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio at which the circuit opens.
    pub failure_ratio: f64,
    /// Rolling window over which samples are kept.
    pub sampling_window: Duration,
    /// Samples required in the window before the ratio is consulted.
    pub minimum_throughput: u32,
    /// How long the circuit stays open before admitting a probe.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(10),
            minimum_throughput: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probing: bool },
}

struct Inner {
    state: State,
    /// (completion time, failed) samples inside the rolling window.
    samples: VecDeque<(Instant, bool)>,
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given tuning.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// Open circuits reject until the break elapses, then admit exactly one
    /// half-open probe; further callers are rejected until the probe
    /// completes.
    pub fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::Closed => true,
            State::Open { until } => {
                if now >= until {
                    inner.state = State::HalfOpen { probing: true };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { probing: false } => {
                inner.state = State::HalfOpen { probing: true };
                true
            }
            State::HalfOpen { probing: true } => false,
        }
    }

    /// Records a successful (or non-transient) completion.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Closed;
                inner.samples.clear();
            }
            State::Closed => {
                inner.samples.push_back((now, false));
                self.prune(&mut inner, now);
            }
            // Late completion from before the trip; the window restarts when
            // the circuit closes again.
            State::Open { .. } => {}
        }
    }

    /// Records a transient failure, opening the circuit when the windowed
    /// ratio crosses the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Open {
                    until: now + self.config.break_duration,
                };
                inner.samples.clear();
            }
            State::Closed => {
                inner.samples.push_back((now, true));
                self.prune(&mut inner, now);
                if self.should_trip(&inner) {
                    inner.state = State::Open {
                        until: now + self.config.break_duration,
                    };
                    inner.samples.clear();
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Whether the circuit currently rejects calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            State::Open { until } => Instant::now() < until,
            _ => false,
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(&(at, _)) = inner.samples.front() {
            if now.duration_since(at) > self.config.sampling_window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn should_trip(&self, inner: &Inner) -> bool {
        let total = inner.samples.len();
        if total < self.config.minimum_throughput as usize {
            return false;
        }
        let failures = inner.samples.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / total as f64 >= self.config.failure_ratio
    }
}
