use crate::error::ConfigError;
use std::time::Duration;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HALF_OPEN_MAX_ATTEMPTS: u32 = 3;

/// Tuning parameters for a circuit breaker.
///
/// Values are validated when the config is built and never change afterwards.
/// Every threshold must be at least 1 and the open timeout at least one second;
/// out-of-range values are an error, not clamped.
///
/// # Presets
///
/// | preset | failures to trip | successes to close | open timeout | concurrent probes |
/// |---|---|---|---|---|
/// | [`standard`](Self::standard) (also `Default`) | 5 | 3 | 30s | 3 |
/// | [`aggressive`](Self::aggressive) | 3 | 5 | 60s | 3 |
/// | [`lenient`](Self::lenient) | 10 | 2 | 15s | 3 |
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tripwire_circuitbreaker::CircuitBreakerConfig;
///
/// let config = CircuitBreakerConfig::builder()
///     .failure_threshold(3)
///     .open_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.failure_threshold(), 3);
///
/// assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawConfig"))]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    half_open_max_attempts: u32,
}

impl CircuitBreakerConfig {
    /// Validates and builds a config from explicit values.
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        open_timeout: Duration,
        half_open_max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        check_threshold("failure_threshold", failure_threshold)?;
        check_threshold("success_threshold", success_threshold)?;
        check_threshold("half_open_max_attempts", half_open_max_attempts)?;
        if open_timeout < Duration::from_secs(1) {
            return Err(ConfigError::InvalidOpenTimeout {
                value: open_timeout,
            });
        }

        Ok(Self {
            failure_threshold,
            success_threshold,
            open_timeout,
            half_open_max_attempts,
        })
    }

    /// Creates a new configuration builder starting from the standard preset.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Preset: balanced configuration suitable for most dependencies.
    ///
    /// Trips after 5 consecutive failures, stays open for 30 seconds, admits up
    /// to 3 concurrent probes and closes after 3 successful probes.
    pub fn standard() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            half_open_max_attempts: DEFAULT_HALF_OPEN_MAX_ATTEMPTS,
        }
    }

    /// Preset: trip quickly and be slow to trust the dependency again.
    ///
    /// Trips after 3 consecutive failures, stays open for 60 seconds and needs
    /// 5 successful probes to close.
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_max_attempts: DEFAULT_HALF_OPEN_MAX_ATTEMPTS,
        }
    }

    /// Preset: tolerate bursts of failures and recover quickly.
    ///
    /// Trips after 10 consecutive failures, stays open for 15 seconds and
    /// closes after 2 successful probes.
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 2,
            open_timeout: Duration::from_secs(15),
            half_open_max_attempts: DEFAULT_HALF_OPEN_MAX_ATTEMPTS,
        }
    }

    /// Consecutive failures in `Closed` that trip the circuit.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Successful probes in `HalfOpen` that close the circuit.
    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    /// How long the circuit stays open before admitting probes.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// Maximum number of probes in flight at once while half-open.
    pub fn half_open_max_attempts(&self) -> u32 {
        self.half_open_max_attempts
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_threshold(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value < 1 {
        return Err(ConfigError::InvalidThreshold {
            field,
            value,
            min: 1,
        });
    }
    Ok(())
}

/// Builder for [`CircuitBreakerConfig`].
///
/// Starts from the standard preset (or any other preset) and validates
/// everything in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    half_open_max_attempts: u32,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with the standard preset's values.
    pub fn new() -> Self {
        Self::from_config(&CircuitBreakerConfig::standard())
    }

    /// Starts from the [aggressive](CircuitBreakerConfig::aggressive) preset.
    pub fn aggressive() -> Self {
        Self::from_config(&CircuitBreakerConfig::aggressive())
    }

    /// Starts from the [lenient](CircuitBreakerConfig::lenient) preset.
    pub fn lenient() -> Self {
        Self::from_config(&CircuitBreakerConfig::lenient())
    }

    fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            open_timeout: config.open_timeout,
            half_open_max_attempts: config.half_open_max_attempts,
        }
    }

    /// Sets the number of consecutive failures that trips the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Sets the number of successful probes needed to close the circuit.
    ///
    /// Default: 3
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    /// Sets the duration the circuit remains open before transitioning to half-open.
    ///
    /// Default: 30 seconds
    pub fn open_timeout(mut self, duration: Duration) -> Self {
        self.open_timeout = duration;
        self
    }

    /// Sets how many probes may be in flight at once while half-open.
    ///
    /// Default: 3
    pub fn half_open_max_attempts(mut self, n: u32) -> Self {
        self.half_open_max_attempts = n;
        self
    }

    /// Validates the settings and builds the configuration.
    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            self.success_threshold,
            self.open_timeout,
            self.half_open_max_attempts,
        )
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk form of the configuration. Missing fields take the standard preset's values.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout_secs: u64,
    half_open_max_attempts: u32,
}

#[cfg(feature = "serde")]
impl Default for RawConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            open_timeout_secs: DEFAULT_OPEN_TIMEOUT.as_secs(),
            half_open_max_attempts: DEFAULT_HALF_OPEN_MAX_ATTEMPTS,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<RawConfig> for CircuitBreakerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        CircuitBreakerConfig::new(
            raw.failure_threshold,
            raw.success_threshold,
            Duration::from_secs(raw.open_timeout_secs),
            raw.half_open_max_attempts,
        )
    }
}
