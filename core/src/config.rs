//! Immutable circuit breaker configuration
//!
//! A [`CircuitBreakerConfig`] can only be obtained through
//! [`CircuitBreakerConfig::builder`], which validates every field, so a
//! breaker never runs with thresholds that make no sense. Configurations are
//! shared as `Arc<CircuitBreakerConfig>` by any number of breakers.

use crate::circuit::CircuitState;
use crate::classifier::FailureClassifier;
use crate::window::SlidingWindow;
use crate::{CircuitBreakerConfigBuilder, ConfigError};
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_rate_threshold: f32,
    pub(crate) slow_call_rate_threshold: f32,
    pub(crate) slow_call_duration_threshold: Duration,
    pub(crate) ring_buffer_size_in_closed_state: usize,
    pub(crate) minimum_number_of_calls: usize,
    pub(crate) ring_buffer_size_in_half_open_state: usize,
    pub(crate) permitted_calls_in_half_open_state: usize,
    pub(crate) wait_duration_in_open_state: Duration,
    pub(crate) max_wait_duration_in_open_state: Duration,
    pub(crate) wait_interval_multiplier: f64,
    pub(crate) wait_jitter_factor: f64,
    pub(crate) automatic_transition: bool,
    pub(crate) initial_state: CircuitState,
    pub(crate) event_log_capacity: usize,
    pub(crate) classifier: Arc<dyn FailureClassifier>,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Failure percentage at or above which the breaker opens
    pub fn failure_rate_threshold(&self) -> f32 {
        self.failure_rate_threshold
    }

    /// Slow-call percentage at or above which the breaker opens
    pub fn slow_call_rate_threshold(&self) -> f32 {
        self.slow_call_rate_threshold
    }

    /// Calls taking longer than this are slow
    pub fn slow_call_duration_threshold(&self) -> Duration {
        self.slow_call_duration_threshold
    }

    pub fn ring_buffer_size_in_closed_state(&self) -> usize {
        self.ring_buffer_size_in_closed_state
    }

    /// Buffered calls required before rates are evaluated in CLOSED state
    pub fn minimum_number_of_calls(&self) -> usize {
        self.minimum_number_of_calls
    }

    pub fn ring_buffer_size_in_half_open_state(&self) -> usize {
        self.ring_buffer_size_in_half_open_state
    }

    pub fn permitted_calls_in_half_open_state(&self) -> usize {
        self.permitted_calls_in_half_open_state
    }

    pub fn wait_duration_in_open_state(&self) -> Duration {
        self.wait_duration_in_open_state
    }

    /// Ceiling for the escalated wait duration
    pub fn max_wait_duration_in_open_state(&self) -> Duration {
        self.max_wait_duration_in_open_state
    }

    pub fn wait_interval_multiplier(&self) -> f64 {
        self.wait_interval_multiplier
    }

    pub fn wait_jitter_factor(&self) -> f64 {
        self.wait_jitter_factor
    }

    /// Whether OPEN moves to HALF_OPEN by itself once the wait elapses
    pub fn automatic_transition_enabled(&self) -> bool {
        self.automatic_transition
    }

    pub fn initial_state(&self) -> CircuitState {
        self.initial_state
    }

    pub fn event_log_capacity(&self) -> usize {
        self.event_log_capacity
    }

    pub fn classifier(&self) -> &Arc<dyn FailureClassifier> {
        &self.classifier
    }

    /// Fresh window for a CLOSED (or METRICS_ONLY) period
    pub(crate) fn closed_window(&self) -> SlidingWindow {
        SlidingWindow::new(
            self.ring_buffer_size_in_closed_state,
            self.minimum_number_of_calls,
        )
    }

    /// Fresh window for a HALF_OPEN period
    pub(crate) fn half_open_window(&self) -> SlidingWindow {
        SlidingWindow::new(
            self.ring_buffer_size_in_half_open_state,
            self.permitted_calls_in_half_open_state,
        )
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ConfigError::FailureRateThreshold(self.failure_rate_threshold));
        }
        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return Err(ConfigError::SlowCallRateThreshold(
                self.slow_call_rate_threshold,
            ));
        }
        if self.slow_call_duration_threshold.is_zero() {
            return Err(ConfigError::ZeroSlowCallDuration);
        }
        if self.ring_buffer_size_in_closed_state == 0 {
            return Err(ConfigError::ZeroRingBufferSize(CircuitState::Closed));
        }
        if self.ring_buffer_size_in_half_open_state == 0 {
            return Err(ConfigError::ZeroRingBufferSize(CircuitState::HalfOpen));
        }
        if !(1..=self.ring_buffer_size_in_closed_state).contains(&self.minimum_number_of_calls) {
            return Err(ConfigError::MinimumNumberOfCalls {
                minimum: self.minimum_number_of_calls,
                capacity: self.ring_buffer_size_in_closed_state,
            });
        }
        if !(1..=self.ring_buffer_size_in_half_open_state)
            .contains(&self.permitted_calls_in_half_open_state)
        {
            return Err(ConfigError::PermittedCallsInHalfOpen {
                permitted: self.permitted_calls_in_half_open_state,
                capacity: self.ring_buffer_size_in_half_open_state,
            });
        }
        if self.wait_duration_in_open_state.is_zero() {
            return Err(ConfigError::ZeroWaitDuration);
        }
        if self.max_wait_duration_in_open_state < self.wait_duration_in_open_state {
            return Err(ConfigError::MaxWaitDuration {
                wait: self.wait_duration_in_open_state,
                max: self.max_wait_duration_in_open_state,
            });
        }
        if !(self.wait_interval_multiplier.is_finite() && self.wait_interval_multiplier >= 1.0) {
            return Err(ConfigError::WaitIntervalMultiplier(
                self.wait_interval_multiplier,
            ));
        }
        if !(0.0..=1.0).contains(&self.wait_jitter_factor) {
            return Err(ConfigError::WaitJitterFactor(self.wait_jitter_factor));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::ZeroEventLogCapacity);
        }
        if matches!(
            self.initial_state,
            CircuitState::Open | CircuitState::HalfOpen
        ) {
            return Err(ConfigError::InitialState(self.initial_state));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            ring_buffer_size_in_closed_state: 100,
            minimum_number_of_calls: 100,
            ring_buffer_size_in_half_open_state: 10,
            permitted_calls_in_half_open_state: 10,
            wait_duration_in_open_state: Duration::from_secs(60),
            max_wait_duration_in_open_state: Duration::from_secs(60),
            wait_interval_multiplier: 1.0,
            wait_jitter_factor: 0.0,
            automatic_transition: true,
            initial_state: CircuitState::Closed,
            event_log_capacity: 100,
            classifier: Arc::new(crate::classifier::DefaultClassifier),
        }
    }
}
