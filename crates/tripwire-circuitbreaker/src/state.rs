use std::fmt;
use thiserror::Error;

/// Represents the state of the circuit breaker.
///
/// Legal transitions:
///
/// ```text
/// Closed ──trip──▶ Open ──timeout──▶ HalfOpen ──successes──▶ Closed
///                   ▲                    │
///                   └──── probe failed ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of probe calls are allowed.
    HalfOpen = 2,
}

/// A transition that is not part of the state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal circuit transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the circuit was in.
    pub from: CircuitState,
    /// State that was requested.
    pub to: CircuitState,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Returns whether the state table has an edge from `self` to `to`.
    pub fn can_transition_to(self, to: CircuitState) -> bool {
        matches!(
            (self, to),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }

    /// Validates the transition `self -> to`, returning the new state.
    pub fn transition(self, to: CircuitState) -> Result<CircuitState, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Returns whether the guarded operation may be invoked in this state.
    ///
    /// `HalfOpen` still bounds the number of concurrent probes.
    pub fn permits_calls(self) -> bool {
        !matches!(self, CircuitState::Open)
    }

    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the circuit changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransitionReason {
    /// Consecutive failures in `Closed` reached `failure_threshold`.
    FailureThresholdReached,
    /// `open_timeout` elapsed and a caller asked for admission.
    OpenTimeoutElapsed,
    /// A probe failed while half-open.
    ProbeFailed,
    /// Half-open probes reached `success_threshold`.
    SuccessThresholdReached,
    /// `force_open` was called.
    ForcedOpen,
    /// `force_close` (or a registry reset) was called.
    ForcedClosed,
}

impl TransitionReason {
    /// Administrative transitions bypass the state table.
    pub fn is_forced(self) -> bool {
        matches!(
            self,
            TransitionReason::ForcedOpen | TransitionReason::ForcedClosed
        )
    }

    /// Stable label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionReason::FailureThresholdReached => "failure_threshold_reached",
            TransitionReason::OpenTimeoutElapsed => "open_timeout_elapsed",
            TransitionReason::ProbeFailed => "probe_failed",
            TransitionReason::SuccessThresholdReached => "success_threshold_reached",
            TransitionReason::ForcedOpen => "forced_open",
            TransitionReason::ForcedClosed => "forced_closed",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
