//! Events emitted by circuit breakers

use crate::circuit::CircuitState;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Event type, used for filtering subscriptions and history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Success,
    Error,
    IgnoredError,
    NotPermitted,
    StateTransition,
    Reset,
    FailureRateExceeded,
    SlowCallRateExceeded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Success => "SUCCESS",
            EventKind::Error => "ERROR",
            EventKind::IgnoredError => "IGNORED_ERROR",
            EventKind::NotPermitted => "NOT_PERMITTED",
            EventKind::StateTransition => "STATE_TRANSITION",
            EventKind::Reset => "RESET",
            EventKind::FailureRateExceeded => "FAILURE_RATE_EXCEEDED",
            EventKind::SlowCallRateExceeded => "SLOW_CALL_RATE_EXCEEDED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific data carried by an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Success {
        elapsed: Duration,
    },
    Error {
        elapsed: Duration,
        /// Type name of the reported error
        error_type: &'static str,
    },
    IgnoredError {
        elapsed: Duration,
        error_type: &'static str,
    },
    NotPermitted,
    StateTransition {
        from: CircuitState,
        to: CircuitState,
    },
    Reset,
    FailureRateExceeded {
        rate: f32,
    },
    SlowCallRateExceeded {
        rate: f32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Success { .. } => EventKind::Success,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::IgnoredError { .. } => EventKind::IgnoredError,
            EventPayload::NotPermitted => EventKind::NotPermitted,
            EventPayload::StateTransition { .. } => EventKind::StateTransition,
            EventPayload::Reset => EventKind::Reset,
            EventPayload::FailureRateExceeded { .. } => EventKind::FailureRateExceeded,
            EventPayload::SlowCallRateExceeded { .. } => EventKind::SlowCallRateExceeded,
        }
    }
}

/// A single event published by a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerEvent {
    pub breaker_name: Arc<str>,
    pub created_at: SystemTime,
    pub payload: EventPayload,
}

impl CircuitBreakerEvent {
    pub fn new(breaker_name: Arc<str>, payload: EventPayload) -> Self {
        Self {
            breaker_name,
            created_at: SystemTime::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.breaker_name;
        match &self.payload {
            EventPayload::Success { elapsed } => {
                write!(f, "CircuitBreaker '{name}' recorded a successful call ({elapsed:?})")
            }
            EventPayload::Error {
                elapsed,
                error_type,
            } => write!(
                f,
                "CircuitBreaker '{name}' recorded an error: '{error_type}' ({elapsed:?})"
            ),
            EventPayload::IgnoredError {
                elapsed,
                error_type,
            } => write!(
                f,
                "CircuitBreaker '{name}' recorded an error which has been ignored: '{error_type}' ({elapsed:?})"
            ),
            EventPayload::NotPermitted => {
                write!(f, "CircuitBreaker '{name}' recorded a call which was not permitted")
            }
            EventPayload::StateTransition { from, to } => {
                write!(f, "CircuitBreaker '{name}' changed state from {from} to {to}")
            }
            EventPayload::Reset => write!(f, "CircuitBreaker '{name}' reset"),
            EventPayload::FailureRateExceeded { rate } => write!(
                f,
                "CircuitBreaker '{name}' exceeded failure rate threshold. Current failure rate: {rate}"
            ),
            EventPayload::SlowCallRateExceeded { rate } => write!(
                f,
                "CircuitBreaker '{name}' exceeded slow call rate threshold. Current slow call rate: {rate}"
            ),
        }
    }
}
