//! Builder API for ergonomic circuit breaker configuration

use crate::{
    CircuitBreakerConfig, CircuitState, ConfigError, classifier::FailureClassifier,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`CircuitBreakerConfig`] with fluent API
///
/// Values that default to another setting (minimum calls, permitted
/// half-open calls, max wait) follow that setting unless set explicitly.
///
/// ```rust
/// use breaker_ring::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::builder()
///     .failure_rate_threshold(70.0)
///     .ring_buffer_size_in_closed_state(6)
///     .ring_buffer_size_in_half_open_state(2)
///     .wait_duration_in_open_state(Duration::from_secs(10))
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(config.minimum_number_of_calls(), 6);
/// assert_eq!(config.permitted_calls_in_half_open_state(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
    minimum_number_of_calls: Option<usize>,
    permitted_calls_in_half_open_state: Option<usize>,
    max_wait_duration_in_open_state: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            minimum_number_of_calls: None,
            permitted_calls_in_half_open_state: None,
            max_wait_duration_in_open_state: None,
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            config: config.clone(),
            minimum_number_of_calls: Some(config.minimum_number_of_calls),
            permitted_calls_in_half_open_state: Some(config.permitted_calls_in_half_open_state),
            max_wait_duration_in_open_state: Some(config.max_wait_duration_in_open_state),
        }
    }

    /// Set the failure rate threshold in percent (0-100]
    /// Circuit opens when failure rate >= this value
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Set the slow call rate threshold in percent (0-100]
    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Calls lasting longer than this are recorded as slow
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    /// Set the ring buffer size used while closed
    pub fn ring_buffer_size_in_closed_state(mut self, size: usize) -> Self {
        self.config.ring_buffer_size_in_closed_state = size;
        self
    }

    /// Set minimum number of buffered calls before rates are evaluated
    pub fn minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.minimum_number_of_calls = Some(calls);
        self
    }

    /// Set the ring buffer size used while half-open
    pub fn ring_buffer_size_in_half_open_state(mut self, size: usize) -> Self {
        self.config.ring_buffer_size_in_half_open_state = size;
        self
    }

    /// Set how many trial calls are let through while half-open
    pub fn permitted_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.permitted_calls_in_half_open_state = Some(calls);
        self
    }

    /// Set the time spent open before probing
    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    /// Set the ceiling for escalated wait durations
    pub fn max_wait_duration_in_open_state(mut self, max: Duration) -> Self {
        self.max_wait_duration_in_open_state = Some(max);
        self
    }

    /// Set the multiplier applied to the wait on every consecutive reopen
    pub fn wait_interval_multiplier(mut self, multiplier: f64) -> Self {
        self.config.wait_interval_multiplier = multiplier;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub fn wait_jitter_factor(mut self, factor: f64) -> Self {
        self.config.wait_jitter_factor = factor;
        self
    }

    /// Enable or disable the automatic OPEN -> HALF_OPEN transition
    pub fn automatic_transition_from_open_to_half_open(mut self, enabled: bool) -> Self {
        self.config.automatic_transition = enabled;
        self
    }

    /// Start breakers in CLOSED, DISABLED, FORCED_OPEN or METRICS_ONLY
    pub fn initial_state(mut self, state: CircuitState) -> Self {
        self.config.initial_state = state;
        self
    }

    /// Set how many events each breaker keeps for introspection
    pub fn event_log_capacity(mut self, capacity: usize) -> Self {
        self.config.event_log_capacity = capacity;
        self
    }

    /// Set a failure classifier to filter which errors should count
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breaker_ring::{CircuitBreakerConfig, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// let config = CircuitBreakerConfig::builder()
    ///     .classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // not-found lookups are expected and never count
    ///         ctx.error.downcast_ref::<&str>() != Some(&"not found")
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// # let _ = config;
    /// ```
    pub fn classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.config.classifier = classifier;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        let mut config = self.config;
        config.minimum_number_of_calls = self
            .minimum_number_of_calls
            .unwrap_or(config.ring_buffer_size_in_closed_state);
        config.permitted_calls_in_half_open_state = self
            .permitted_calls_in_half_open_state
            .unwrap_or(config.ring_buffer_size_in_half_open_state);
        config.max_wait_duration_in_open_state = self
            .max_wait_duration_in_open_state
            .unwrap_or(config.wait_duration_in_open_state);

        config.validate()?;
        Ok(config)
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
