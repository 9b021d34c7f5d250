use crate::CircuitState;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a [`CircuitBreakerConfig`](crate::CircuitBreakerConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count threshold is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    InvalidThreshold {
        /// Name of the offending setting.
        field: &'static str,
        /// Value that was supplied.
        value: u32,
        /// Smallest accepted value.
        min: u32,
    },

    /// The open timeout is shorter than one second.
    #[error("open_timeout must be at least 1s, got {value:?}")]
    InvalidOpenTimeout {
        /// Value that was supplied.
        value: Duration,
    },
}

/// A call was rejected without invoking the guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is {state}; call not permitted")]
pub struct CircuitOpenError {
    name: String,
    state: CircuitState,
}

impl CircuitOpenError {
    pub(crate) fn new(name: impl Into<String>, state: CircuitState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// Name of the breaker that rejected the call.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State observed at rejection time.
    ///
    /// `Open`, or `HalfOpen` when every probe slot was taken.
    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call; the operation was not invoked.
    #[error("{0}")]
    OpenCircuit(CircuitOpenError),

    /// The operation ran and failed. The error is passed through untouched.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the error indicates the circuit rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::OpenCircuit(_))
    }

    /// Returns the rejection details if the circuit rejected the call.
    pub fn open_error(&self) -> Option<&CircuitOpenError> {
        match self {
            CircuitBreakerError::OpenCircuit(e) => Some(e),
            CircuitBreakerError::Inner(_) => None,
        }
    }

    /// Returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::OpenCircuit(_) => None,
        }
    }
}

impl<E> From<E> for CircuitBreakerError<E> {
    fn from(err: E) -> Self {
        CircuitBreakerError::Inner(err)
    }
}
