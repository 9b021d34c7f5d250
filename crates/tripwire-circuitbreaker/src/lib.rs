//! A thread-safe circuit breaker for calls to unreliable dependencies.
//!
//! A circuit breaker wraps calls to a remote dependency (an HTTP service, a
//! payment gateway, a message broker), fails fast once the dependency is
//! observed to be unhealthy, and later probes it cautiously for recovery.
//!
//! ## States
//! - **Closed**: Normal operation, calls pass through and consecutive failures are counted
//! - **Open**: Circuit is tripped, calls are rejected immediately
//! - **Half-Open**: A bounded number of probe calls test whether the dependency recovered
//!
//! The `Open → HalfOpen` transition is evaluated lazily: there is no timer
//! thread. The first admission check after `open_timeout` has elapsed performs
//! the transition, so an idle breaker only recovers when somebody asks.
//!
//! ## Usage
//!
//! ### Guarding a call
//!
//! ```rust
//! use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//!
//! let breaker = CircuitBreaker::new("inventory", CircuitBreakerConfig::default());
//!
//! let result: Result<u32, CircuitBreakerError<std::io::Error>> =
//!     breaker.execute(|| Ok(42));
//! assert_eq!(result.unwrap(), 42);
//! ```
//!
//! ### With a fallback
//!
//! When a fallback is supplied, a rejected call runs the fallback instead and
//! the caller sees its result. The operation's own errors are never replaced.
//!
//! ```rust
//! use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("pricing", CircuitBreakerConfig::default());
//! breaker.force_open();
//!
//! let price: Result<&str, std::io::Error> = breaker.execute_with_fallback(
//!     || Ok("live price"),
//!     || Ok("cached price"),
//! );
//! assert_eq!(price.unwrap(), "cached price");
//! ```
//!
//! ### Sharing breakers by service name
//!
//! ```rust
//! use std::time::Duration;
//! use tripwire_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
//!
//! let registry = CircuitBreakerRegistry::builder()
//!     .service_config("payments", CircuitBreakerConfig::aggressive())
//!     .build();
//!
//! let payments = registry.get("payments");
//! assert_eq!(payments.config().failure_threshold(), 3);
//! assert_eq!(registry.states()["payments"], CircuitState::Closed);
//! ```
//!
//! ### Async operations and Tower
//!
//! [`CircuitBreaker::execute_async`] guards a future-returning operation, and
//! [`CircuitBreakerLayer`] applies a breaker to any Tower service.
//!
//! ## Concurrency
//!
//! One breaker is meant to be shared (`Arc<CircuitBreaker>`) by every caller of
//! a dependency. Bookkeeping happens under a short internal mutex that never
//! wraps user code; the guarded operation, fallbacks and event listeners always
//! run outside it. [`CircuitBreaker::state`] is a lock-free atomic read.
//!
//! ## Feature Flags
//! - `tracing` (default): logs state transitions and rejections using the `tracing` crate
//! - `metrics`: enables metrics collection using the `metrics` crate
//! - `serde`: enables `Serialize`/`Deserialize` for states, metrics snapshots and configs

use crate::circuit::{Admission, Circuit, Transition};
use futures::Future;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
#[cfg(feature = "metrics")]
use std::sync::Once;
use std::time::Instant;
#[cfg(feature = "tracing")]
use tracing::{debug, info, trace};
use tripwire_core::{EventListeners, FnListener};

pub use circuit::CircuitMetrics;
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::{CircuitBreakerError, CircuitOpenError, ConfigError};
pub use events::CircuitBreakerEvent;
pub use layer::{CircuitBreakerLayer, CircuitBreakerService, CircuitBreakerWithFallback};
pub use registry::{CircuitBreakerRegistry, CircuitBreakerRegistryBuilder};
pub use state::{CircuitState, InvalidTransition, TransitionReason};
pub use tripwire_core::{Clock, ManualClock, SharedClock, SystemClock};

mod circuit;
mod config;
mod error;
mod events;
mod layer;
mod registry;
mod state;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "circuitbreaker_calls_total",
            "Total number of calls through the circuit breaker"
        );
        describe_counter!(
            "circuitbreaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_gauge!(
            "circuitbreaker_state",
            "Current state of the circuit breaker"
        );
        describe_histogram!(
            "circuitbreaker_call_duration_seconds",
            "Duration of calls through the circuit breaker"
        );
    });
}

/// Sets the one-hot `circuitbreaker_state` gauge for `current`.
#[cfg(feature = "metrics")]
fn set_state_gauge(name: &str, current: CircuitState) {
    for state in [
        CircuitState::Closed,
        CircuitState::Open,
        CircuitState::HalfOpen,
    ] {
        gauge!("circuitbreaker_state", "circuitbreaker" => name.to_string(), "state" => state.as_str())
            .set(if state == current { 1.0 } else { 0.0 });
    }
}

/// A circuit breaker guarding one logical dependency.
///
/// Create one with [`CircuitBreaker::new`] or [`CircuitBreaker::builder`], or
/// obtain a shared instance from a [`CircuitBreakerRegistry`].
pub struct CircuitBreaker {
    name: String,
    config: Arc<CircuitBreakerConfig>,
    circuit: Mutex<Circuit>,
    state_atomic: Arc<AtomicU8>,
    clock: SharedClock,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreaker {
    /// Creates a breaker using the system clock and no listeners.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::builder(name).config(config).build()
    }

    /// Returns a builder for a breaker named `name`.
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(name)
    }

    /// Name of the dependency this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state of the circuit.
    ///
    /// This is a lock-free read. It does not perform the lazy `Open → HalfOpen`
    /// transition; use [`can_execute`](Self::can_execute) for that.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Returns whether the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Returns a simple health status string.
    ///
    /// Returns "healthy" when circuit is closed, "degraded" when half-open,
    /// "unhealthy" when open.
    pub fn health_status(&self) -> &'static str {
        match self.state() {
            CircuitState::Closed => "healthy",
            CircuitState::HalfOpen => "degraded",
            CircuitState::Open => "unhealthy",
        }
    }

    /// Consecutive failures recorded since the last success or reset.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count()
    }

    /// Successful probes recorded in the current half-open window.
    pub fn success_count(&self) -> u32 {
        self.lock().success_count()
    }

    /// When the circuit last opened, if it is open.
    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at()
    }

    /// Returns a snapshot of the current circuit breaker metrics.
    pub fn metrics(&self) -> CircuitMetrics {
        let now = self.clock.now();
        self.lock().metrics(&self.config, now)
    }

    /// Returns whether a call would be admitted right now.
    ///
    /// **This query can change state.** If the circuit is open and
    /// `open_timeout` has elapsed since it opened, this call performs the
    /// `Open → HalfOpen` transition before answering. While half-open it answers
    /// whether a probe slot is free, without reserving it.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let (permitted, transition) = self.lock().can_execute(&self.config, now);
        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }
        permitted
    }

    /// Runs `operation` if the circuit admits it.
    ///
    /// - Rejected: returns [`CircuitBreakerError::OpenCircuit`] without calling `operation`.
    /// - `Ok(value)`: records a success and returns the value.
    /// - `Err(e)`: records a failure and returns [`CircuitBreakerError::Inner`]
    ///   holding `e` unchanged.
    ///
    /// The breaker imposes no timeout on `operation`.
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(rejected) => return Err(CircuitBreakerError::OpenCircuit(rejected)),
        };
        permit.complete(operation()).map_err(CircuitBreakerError::Inner)
    }

    /// Runs `operation` if admitted, otherwise `fallback`.
    ///
    /// The caller sees exactly one of: the operation's value, the operation's
    /// error, or the fallback's result. `operation` is never invoked when the
    /// fallback runs.
    pub fn execute_with_fallback<T, E, F, FB>(&self, operation: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        FB: FnOnce() -> Result<T, E>,
    {
        match self.acquire() {
            Ok(permit) => permit.complete(operation()),
            Err(_) => {
                self.fallback_started();
                fallback()
            }
        }
    }

    /// Async form of [`execute`](Self::execute).
    ///
    /// No lock is held while the operation's future runs. Dropping the returned
    /// future before it completes frees any half-open probe slot it held and
    /// records nothing.
    pub async fn execute_async<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(rejected) => return Err(CircuitBreakerError::OpenCircuit(rejected)),
        };
        let result = operation().await;
        permit.complete(result).map_err(CircuitBreakerError::Inner)
    }

    /// Async form of [`execute_with_fallback`](Self::execute_with_fallback).
    pub async fn execute_async_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        match self.acquire() {
            Ok(permit) => {
                let result = operation().await;
                permit.complete(result)
            }
            Err(_) => {
                self.fallback_started();
                fallback().await
            }
        }
    }

    /// Records a successful call made outside [`execute`](Self::execute).
    ///
    /// Clears the consecutive failure count. While half-open, counts toward
    /// `success_threshold` and closes the circuit once it is reached.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let (state, transition) = {
            let mut circuit = self.lock();
            let state = circuit.state();
            (state, circuit.record_success(&self.config, now))
        };
        self.after_outcome(true, state, transition, now);
    }

    /// Records a failed call made outside [`execute`](Self::execute).
    ///
    /// While closed, trips the circuit at `failure_threshold` consecutive
    /// failures. While half-open, a single failure reopens it.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let (state, transition) = {
            let mut circuit = self.lock();
            let state = circuit.state();
            (state, circuit.record_failure(&self.config, now))
        };
        self.after_outcome(false, state, transition, now);
    }

    /// Forces the circuit into the open state, restarting the open timer.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let transition = self.lock().force_open(now);
        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }
    }

    /// Forces the circuit into the closed state and clears all counters.
    ///
    /// Calling it on a closed circuit only clears the counters.
    pub fn force_close(&self) {
        let now = self.clock.now();
        let transition = self.lock().force_close(now);
        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Circuit> {
        // Every critical section leaves the circuit consistent, so a poisoned
        // lock still guards valid data.
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let (admission, transition) = self.lock().try_acquire(&self.config, now);
        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }

        match admission {
            Admission::Permitted {
                state,
                epoch,
                probe,
            } => {
                #[cfg(feature = "tracing")]
                trace!(breaker = %self.name, state = %state, "circuit breaker permitted call");

                self.emit(CircuitBreakerEvent::CallPermitted {
                    breaker_name: self.name.clone(),
                    timestamp: now,
                    state,
                });
                Ok(Permit {
                    breaker: self,
                    epoch,
                    probe,
                    #[cfg(feature = "metrics")]
                    started: Instant::now(),
                })
            }
            Admission::Rejected { state } => {
                #[cfg(feature = "tracing")]
                debug!(breaker = %self.name, state = %state, "circuit breaker rejected call");

                #[cfg(feature = "metrics")]
                counter!("circuitbreaker_calls_total", "circuitbreaker" => self.name.clone(), "outcome" => "rejected").increment(1);

                self.emit(CircuitBreakerEvent::CallRejected {
                    breaker_name: self.name.clone(),
                    timestamp: now,
                    state,
                });
                Err(CircuitOpenError::new(self.name.clone(), state))
            }
        }
    }

    pub(crate) fn fallback_started(&self) {
        #[cfg(feature = "tracing")]
        debug!(breaker = %self.name, "calling fallback handler");

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => self.name.clone(), "outcome" => "fallback").increment(1);
    }

    fn finish(&self, epoch: u64, probe: bool, success: bool) {
        let now = self.clock.now();
        let (state, transition) = {
            let mut circuit = self.lock();
            if probe {
                circuit.release_probe(epoch);
            }
            if circuit.is_stale(epoch) {
                drop(circuit);
                #[cfg(feature = "tracing")]
                debug!(breaker = %self.name, success, "discarding outcome admitted before the half-open window");
                return;
            }
            let state = circuit.state();
            let transition = if success {
                circuit.record_success(&self.config, now)
            } else {
                circuit.record_failure(&self.config, now)
            };
            (state, transition)
        };
        self.after_outcome(success, state, transition, now);
    }

    fn after_outcome(
        &self,
        success: bool,
        state: CircuitState,
        transition: Option<Transition>,
        now: Instant,
    ) {
        let breaker_name = self.name.clone();
        let event = if success {
            CircuitBreakerEvent::SuccessRecorded {
                breaker_name,
                timestamp: now,
                state,
            }
        } else {
            CircuitBreakerEvent::FailureRecorded {
                breaker_name,
                timestamp: now,
                state,
            }
        };
        self.emit(event);

        if let Some(transition) = transition {
            self.on_transition(transition, now);
        }
    }

    fn on_transition(&self, transition: Transition, now: Instant) {
        let Transition { from, to, reason } = transition;

        #[cfg(feature = "tracing")]
        info!(
            breaker = %self.name,
            from = %from,
            to = %to,
            reason = %reason,
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => self.name.clone(),
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);

            set_state_gauge(&self.name, to);
        }

        self.emit(CircuitBreakerEvent::StateTransition {
            breaker_name: self.name.clone(),
            timestamp: now,
            from_state: from,
            to_state: to,
            reason,
        });
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        if !self.listeners.is_empty() {
            self.listeners.emit(&event);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Admission to run one guarded call.
///
/// Reports the call's outcome through [`complete`](Self::complete). Dropped
/// without completing (panic, cancelled future), it only returns its half-open
/// probe slot. Outcomes reaching a half-open window other than the one that
/// admitted the call are discarded.
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    #[cfg(feature = "metrics")]
    started: Instant,
}

impl Permit<'_> {
    pub(crate) fn complete<T, E>(mut self, result: Result<T, E>) -> Result<T, E> {
        #[cfg(feature = "metrics")]
        {
            let outcome = if result.is_ok() { "success" } else { "failure" };
            counter!("circuitbreaker_calls_total", "circuitbreaker" => self.breaker.name.clone(), "outcome" => outcome).increment(1);
            histogram!("circuitbreaker_call_duration_seconds", "circuitbreaker" => self.breaker.name.clone())
                .record(self.started.elapsed().as_secs_f64());
        }

        let probe = std::mem::take(&mut self.probe);
        self.breaker.finish(self.epoch, probe, result.is_ok());
        result
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if std::mem::take(&mut self.probe) {
            self.breaker.lock().release_probe(self.epoch);
        }
    }
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder {
    name: String,
    config: Arc<CircuitBreakerConfig>,
    clock: SharedClock,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerBuilder {
    /// Creates a builder with the standard config, the system clock and no listeners.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(CircuitBreakerConfig::default()),
            clock: SystemClock::shared(),
            listeners: EventListeners::new(),
        }
    }

    /// Sets the configuration.
    ///
    /// Default: [`CircuitBreakerConfig::standard`]
    pub fn config(mut self, config: impl Into<Arc<CircuitBreakerConfig>>) -> Self {
        self.config = config.into();
        self
    }

    /// Sets the clock the breaker reads time from.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Adds every listener in `listeners`.
    pub fn listeners(mut self, listeners: &EventListeners<CircuitBreakerEvent>) -> Self {
        self.listeners.extend(listeners);
        self
    }

    /// Registers a callback for every event the breaker emits.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback when the circuit breaker transitions between states.
    ///
    /// # Callback Signature
    /// `Fn(CircuitState, CircuitState, TransitionReason)` - the state the circuit
    /// left, the state it entered, and why.
    ///
    /// # Example
    /// ```rust
    /// use tripwire_circuitbreaker::{CircuitBreaker, CircuitState};
    ///
    /// let breaker = CircuitBreaker::builder("search")
    ///     .on_state_transition(|from, to, reason| {
    ///         println!("search: {} -> {} ({})", from, to, reason);
    ///         if to == CircuitState::Open {
    ///             println!("WARNING: search degraded");
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState, TransitionReason) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    reason,
                    ..
                } = event
                {
                    f(*from_state, *to_state, *reason);
                }
            }));
        self
    }

    /// Registers a callback when a call is rejected.
    ///
    /// Called with the state observed at rejection (`Open`, or `HalfOpen` when
    /// all probe slots are taken).
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::CallRejected { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Builds the breaker in the `Closed` state.
    pub fn build(self) -> CircuitBreaker {
        #[cfg(feature = "metrics")]
        {
            describe_metrics();
            set_state_gauge(&self.name, CircuitState::Closed);
        }

        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        let now = self.clock.now();
        CircuitBreaker {
            name: self.name,
            config: self.config,
            circuit: Mutex::new(Circuit::new(Arc::clone(&state_atomic), now)),
            state_atomic,
            clock: self.clock,
            listeners: self.listeners,
        }
    }
}
