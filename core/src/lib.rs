//! BreakerRing - count-based circuit breakers over a sliding ring buffer
//!
//! This crate provides the core of a circuit breaker library:
//! - Ring-buffer sliding window with O(1) failure and slow-call rates
//! - State machine covering Closed, Open, HalfOpen, Disabled, ForcedOpen and MetricsOnly
//! - Lock-free permission checks and a hard ceiling on half-open trial calls
//! - Per-breaker event bus with a bounded event log
//! - Registry of named breakers with a read-only status query
//!
//! # Example
//!
//! ```rust
//! use breaker_ring::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::builder()
//!     .ring_buffer_size_in_closed_state(6)
//!     .failure_rate_threshold(70.0)
//!     .wait_duration_in_open_state(Duration::from_secs(30))
//!     .build()
//!     .expect("valid configuration");
//!
//! let registry = CircuitBreakerRegistry::with_config(config);
//! let breaker = registry.breaker("backendA");
//!
//! // Execute with circuit protection
//! let result = breaker.call(|| Ok::<_, String>("success"));
//! assert_eq!(result.unwrap(), "success");
//!
//! // Check circuit state
//! if breaker.state() == CircuitState::Open {
//!     println!("Circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod errors;
pub mod event;
pub mod event_bus;
mod permits;
pub mod registry;
mod subscribers;
pub mod window;

pub use builder::CircuitBreakerConfigBuilder;
pub use circuit::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerSnapshot, CircuitState, FallbackContext,
    Permit,
};
pub use classifier::{
    DefaultClassifier, ErrorClass, FailureClassifier, FailureContext, PredicateClassifier,
    TypedClassifier,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::CircuitBreakerConfig;
pub use errors::{CallNotPermitted, CircuitError, ConfigError, IllegalStateTransition};
pub use event::{CircuitBreakerEvent, EventKind, EventPayload};
pub use event_bus::{EventBus, EventHistory};
pub use registry::{BreakerStatus, CircuitBreakerRegistry, Health, RegistryEvent};
pub use subscribers::SubscriptionId;
pub use window::{CallRecord, Outcome, SlidingWindow, UNDEFINED_RATE, WindowSnapshot};
