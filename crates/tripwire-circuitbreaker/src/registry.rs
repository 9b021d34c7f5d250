//! Named, shared circuit breakers.

use crate::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitMetrics, CircuitState,
    TransitionReason,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::{debug, info};
use tripwire_core::{EventListeners, FnListener, SharedClock, SystemClock};

/// A concurrent map from service name to a shared [`CircuitBreaker`].
///
/// The first [`get`](Self::get) for a name creates its breaker, using that
/// name's override config if one was registered and the default config
/// otherwise. Every later `get` for the same name returns the same instance,
/// even when the first calls race.
///
/// Entries are never removed.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tripwire_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
///
/// let registry = CircuitBreakerRegistry::builder()
///     .default_config(CircuitBreakerConfig::lenient())
///     .service_config("payments", CircuitBreakerConfig::aggressive())
///     .build();
///
/// let payments = registry.get("payments");
/// let search = registry.get("search");
/// assert_eq!(payments.config().failure_threshold(), 3);
/// assert_eq!(search.config().failure_threshold(), 10);
/// assert!(Arc::ptr_eq(&search, &registry.get("search")));
/// ```
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: Arc<CircuitBreakerConfig>,
    overrides: HashMap<String, Arc<CircuitBreakerConfig>>,
    clock: SharedClock,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry using the standard config for every service.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for a registry.
    pub fn builder() -> CircuitBreakerRegistryBuilder {
        CircuitBreakerRegistryBuilder::new()
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        // The read guard above must be gone before taking the shard's write lock.
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            #[cfg(feature = "tracing")]
            debug!(breaker = name, "creating circuit breaker");

            Arc::new(self.create(name))
        });
        Arc::clone(entry.value())
    }

    fn create(&self, name: &str) -> CircuitBreaker {
        let config = self
            .overrides
            .get(name)
            .unwrap_or(&self.default_config);

        CircuitBreaker::builder(name)
            .config(Arc::clone(config))
            .clock(Arc::clone(&self.clock))
            .listeners(&self.listeners)
            .build()
    }

    /// Returns the state of every breaker created so far.
    ///
    /// Each state is read independently; the map is not a consistent
    /// snapshot across breakers that are changing concurrently.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Returns a metrics snapshot of every breaker created so far.
    pub fn metrics(&self) -> HashMap<String, CircuitMetrics> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Force-closes every breaker created so far.
    ///
    /// Breakers created while the reset is running may or may not be visited.
    pub fn reset_all(&self) {
        // Collect first so no map guard is held while listeners run.
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        #[cfg(feature = "tracing")]
        info!(count = breakers.len(), "resetting all circuit breakers");

        for breaker in breakers {
            breaker.force_close();
        }
    }

    /// Returns true if a breaker for `name` has been created.
    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Names of every breaker created so far, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// The config used for services without an override.
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.len())
            .field("default_config", &self.default_config)
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

/// Builder for [`CircuitBreakerRegistry`].
pub struct CircuitBreakerRegistryBuilder {
    default_config: Arc<CircuitBreakerConfig>,
    overrides: HashMap<String, Arc<CircuitBreakerConfig>>,
    clock: SharedClock,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerRegistryBuilder {
    /// Creates a builder with the standard default config and the system clock.
    pub fn new() -> Self {
        Self {
            default_config: Arc::new(CircuitBreakerConfig::default()),
            overrides: HashMap::new(),
            clock: SystemClock::shared(),
            listeners: EventListeners::new(),
        }
    }

    /// Sets the config used for services without an override.
    ///
    /// Default: [`CircuitBreakerConfig::standard`]
    pub fn default_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.default_config = Arc::new(config);
        self
    }

    /// Registers an override config for one service name.
    ///
    /// Registering the same name twice keeps the last config.
    pub fn service_config(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), Arc::new(config));
        self
    }

    /// Sets the clock every breaker in the registry reads time from.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a callback for every event of every breaker in the registry.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback for state transitions of every breaker in the registry.
    ///
    /// The callback receives the breaker's name along with the transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState, TransitionReason) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    breaker_name,
                    from_state,
                    to_state,
                    reason,
                    ..
                } = event
                {
                    f(breaker_name, *from_state, *to_state, *reason);
                }
            }));
        self
    }

    /// Builds the empty registry.
    pub fn build(self) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry {
            breakers: DashMap::new(),
            default_config: self.default_config,
            overrides: self.overrides,
            clock: self.clock,
            listeners: self.listeners,
        }
    }
}

impl Default for CircuitBreakerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
