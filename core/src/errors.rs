//! Error types for circuit breaker operations

use crate::circuit::CircuitState;
use std::time::Duration;

/// The breaker refused a call; the protected operation must not run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CircuitBreaker '{name}' is {state} and does not permit further calls")]
pub struct CallNotPermitted {
    pub name: String,
    pub state: CircuitState,
}

/// Errors returned by the protected-call helpers
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker did not grant a permit
    #[error(transparent)]
    NotPermitted(#[from] CallNotPermitted),
    /// The wrapped operation failed
    #[error("Circuit execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitError<E> {
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, CircuitError::NotPermitted(_))
    }

    /// The operation's own error, if it ran and failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::NotPermitted(_) => None,
        }
    }
}

/// Explicit transition into the state the breaker already occupies
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CircuitBreaker '{name}' cannot transition from {from} to {to}")]
pub struct IllegalStateTransition {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Configuration rejected when it is built
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failure rate threshold must be in (0, 100], got {0}")]
    FailureRateThreshold(f32),
    #[error("slow call rate threshold must be in (0, 100], got {0}")]
    SlowCallRateThreshold(f32),
    #[error("slow call duration threshold must be greater than zero")]
    ZeroSlowCallDuration,
    #[error("ring buffer size in {0} state must be greater than zero")]
    ZeroRingBufferSize(CircuitState),
    #[error("minimum number of calls must be in 1..={capacity}, got {minimum}")]
    MinimumNumberOfCalls { minimum: usize, capacity: usize },
    #[error("permitted calls in half-open state must be in 1..={capacity}, got {permitted}")]
    PermittedCallsInHalfOpen { permitted: usize, capacity: usize },
    #[error("wait duration in open state must be greater than zero")]
    ZeroWaitDuration,
    #[error("max wait duration {max:?} is shorter than wait duration {wait:?}")]
    MaxWaitDuration { wait: Duration, max: Duration },
    #[error("wait interval multiplier must be finite and >= 1.0, got {0}")]
    WaitIntervalMultiplier(f64),
    #[error("wait jitter factor must be in [0, 1], got {0}")]
    WaitJitterFactor(f64),
    #[error("event log capacity must be greater than zero")]
    ZeroEventLogCapacity,
    #[error("a breaker cannot start in {0} state")]
    InitialState(CircuitState),
}
