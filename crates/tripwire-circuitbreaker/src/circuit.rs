use crate::config::CircuitBreakerConfig;
use crate::{CircuitState, TransitionReason};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of circuit breaker metrics for observability.
///
/// All fields come from a single critical section, so they are consistent with
/// each other.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitMetrics {
    /// Current state of the circuit breaker.
    pub state: CircuitState,
    /// Consecutive failures since the last success or reset.
    pub failure_count: u32,
    /// Successful probes in the current half-open window.
    pub success_count: u32,
    /// Probes currently running while half-open.
    pub half_open_in_flight: u32,
    /// Time since the last state transition.
    pub time_since_state_change: Duration,
    /// Time left before an open circuit starts admitting probes.
    pub remaining_open_time: Option<Duration>,
}

/// A state change performed inside a critical section, reported afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: CircuitState,
    pub(crate) to: CircuitState,
    pub(crate) reason: TransitionReason,
}

/// Result of asking for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may run. `epoch` identifies the window that admitted it and
    /// `probe` is set when a half-open slot was reserved.
    Permitted {
        state: CircuitState,
        epoch: u64,
        probe: bool,
    },
    /// The call must not run.
    Rejected { state: CircuitState },
}

/// The breaker's mutable bookkeeping. Always accessed under the breaker's mutex.
pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    last_state_change: Instant,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    // Bumped on every (re-)entry into a state; ties calls to their window.
    epoch: u64,
}

impl Circuit {
    pub(crate) fn new(state_atomic: Arc<AtomicU8>, now: Instant) -> Self {
        state_atomic.store(CircuitState::Closed as u8, Ordering::Release);
        Self {
            state: CircuitState::Closed,
            state_atomic,
            last_state_change: now,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            half_open_in_flight: 0,
            epoch: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub(crate) fn success_count(&self) -> u32 {
        self.success_count
    }

    pub(crate) fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub(crate) fn metrics(&self, config: &CircuitBreakerConfig, now: Instant) -> CircuitMetrics {
        let remaining_open_time = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                config
                    .open_timeout()
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        };

        CircuitMetrics {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            half_open_in_flight: self.half_open_in_flight,
            time_since_state_change: now.saturating_duration_since(self.last_state_change),
            remaining_open_time,
        }
    }

    /// Moves `Open` to `HalfOpen` once the open timeout has elapsed.
    fn refresh(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Option<Transition> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = self
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or(Duration::MAX);
        if elapsed >= config.open_timeout() {
            self.transition_to(
                CircuitState::HalfOpen,
                TransitionReason::OpenTimeoutElapsed,
                now,
            )
        } else {
            None
        }
    }

    /// Answers whether a call would be admitted, without reserving a probe slot.
    pub(crate) fn can_execute(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (bool, Option<Transition>) {
        let transition = self.refresh(config, now);
        let permitted = match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.half_open_in_flight < config.half_open_max_attempts(),
        };
        (permitted, transition)
    }

    /// Admission check and half-open slot reservation in one step.
    pub(crate) fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (Admission, Option<Transition>) {
        let transition = self.refresh(config, now);
        let admission = match self.state {
            CircuitState::Closed => Admission::Permitted {
                state: self.state,
                epoch: self.epoch,
                probe: false,
            },
            CircuitState::Open => Admission::Rejected { state: self.state },
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < config.half_open_max_attempts() {
                    self.half_open_in_flight += 1;
                    Admission::Permitted {
                        state: self.state,
                        epoch: self.epoch,
                        probe: true,
                    }
                } else {
                    Admission::Rejected { state: self.state }
                }
            }
        };
        (admission, transition)
    }

    /// Returns a probe slot reserved in `epoch`, if that window is still current.
    pub(crate) fn release_probe(&mut self, epoch: u64) {
        if self.state == CircuitState::HalfOpen && self.epoch == epoch {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Whether an outcome from a call admitted in `epoch` must be discarded.
    ///
    /// A half-open window only counts the probes it admitted itself.
    pub(crate) fn is_stale(&self, epoch: u64) -> bool {
        self.state == CircuitState::HalfOpen && self.epoch != epoch
    }

    pub(crate) fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Transition> {
        self.failure_count = 0;

        if self.state == CircuitState::HalfOpen {
            self.success_count = self.success_count.saturating_add(1);
            if self.success_count >= config.success_threshold() {
                return self.transition_to(
                    CircuitState::Closed,
                    TransitionReason::SuccessThresholdReached,
                    now,
                );
            }
        }
        None
    }

    pub(crate) fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Transition> {
        self.failure_count = self.failure_count.saturating_add(1);

        match self.state {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, TransitionReason::ProbeFailed, now)
            }
            CircuitState::Closed if self.failure_count >= config.failure_threshold() => self
                .transition_to(
                    CircuitState::Open,
                    TransitionReason::FailureThresholdReached,
                    now,
                ),
            _ => None,
        }
    }

    pub(crate) fn force_open(&mut self, now: Instant) -> Option<Transition> {
        self.transition_to(CircuitState::Open, TransitionReason::ForcedOpen, now)
    }

    pub(crate) fn force_close(&mut self, now: Instant) -> Option<Transition> {
        self.transition_to(CircuitState::Closed, TransitionReason::ForcedClosed, now)
    }

    /// Enters `to`, applying its entry resets.
    ///
    /// Forced transitions skip the state table and re-enter the current state
    /// when it already matches; a `Transition` is only reported when the state
    /// actually changes.
    fn transition_to(
        &mut self,
        to: CircuitState,
        reason: TransitionReason,
        now: Instant,
    ) -> Option<Transition> {
        let from = self.state;
        if !reason.is_forced() {
            let checked = from.transition(to);
            debug_assert!(checked.is_ok(), "{:?}", checked);
            if checked.is_err() {
                return None;
            }
        }

        match to {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.opened_at = None;
            }
            CircuitState::Open => {
                // A trip from Closed keeps the failures that caused it.
                if from == CircuitState::HalfOpen {
                    self.failure_count = 0;
                }
                self.success_count = 0;
                self.opened_at = Some(now);
            }
            CircuitState::HalfOpen => {
                self.failure_count = 0;
                self.success_count = 0;
            }
        }
        self.half_open_in_flight = 0;
        self.epoch = self.epoch.wrapping_add(1);

        if from == to {
            return None;
        }

        self.state = to;
        self.state_atomic.store(to as u8, Ordering::Release);
        self.last_state_change = now;
        Some(Transition { from, to, reason })
    }
}
