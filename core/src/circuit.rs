//! Circuit breaker state machine over sliding-window metrics
//!
//! A [`CircuitBreaker`] guards one named downstream operation. Callers ask
//! for a permit, run the operation themselves and report the outcome; the
//! breaker records it into the window of its current state and evaluates
//! thresholds synchronously on the call that completes the window.
//!
//! The current state is mirrored in an atomic so permission checks in
//! CLOSED, HALF_OPEN, DISABLED, FORCED_OPEN and METRICS_ONLY never take a
//! lock. Window updates and transitions are serialized by a short mutex
//! section. Events caused by that section are queued on the event bus
//! before it ends and delivered after it ends.

mod machine;

use crate::CircuitBreakerConfig;
use crate::classifier::{ErrorClass, FailureContext};
use crate::clock::{Clock, MonotonicClock};
use crate::errors::{CallNotPermitted, CircuitError, IllegalStateTransition};
use crate::event::{CircuitBreakerEvent, EventKind, EventPayload};
use crate::event_bus::{EventBus, EventHistory};
use crate::permits::{HalfOpenPermits, NO_PERIOD};
use crate::subscribers::SubscriptionId;
use crate::window::{Outcome, SlidingWindow, WindowSnapshot};
use machine::{CircuitEvent, DynamicCircuit, MachineContext};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow, outcomes are evaluated against the thresholds
    Closed = 0,
    /// Calls are rejected until the wait duration elapses
    Open = 1,
    /// A limited number of trial calls decide between Closed and Open
    HalfOpen = 2,
    /// Calls flow, nothing is recorded
    Disabled = 3,
    /// Calls are rejected until an explicit transition
    ForcedOpen = 4,
    /// Calls flow and are recorded, the breaker never opens
    MetricsOnly = 5,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
            CircuitState::Disabled => "Disabled",
            CircuitState::ForcedOpen => "ForcedOpen",
            CircuitState::MetricsOnly => "MetricsOnly",
        }
    }

    /// Whether outcomes reported in this state land in the window
    pub fn records_outcomes(self) -> bool {
        matches!(
            self,
            CircuitState::Closed | CircuitState::HalfOpen | CircuitState::MetricsOnly
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            3 => CircuitState::Disabled,
            4 => CircuitState::ForcedOpen,
            5 => CircuitState::MetricsOnly,
            _ => CircuitState::Closed,
        }
    }

    /// Machine event that moves into this state
    fn entry_event(self) -> CircuitEvent {
        match self {
            CircuitState::Closed => CircuitEvent::Close,
            CircuitState::Open => CircuitEvent::Trip,
            CircuitState::HalfOpen => CircuitEvent::Probe,
            CircuitState::Disabled => CircuitEvent::Disable,
            CircuitState::ForcedOpen => CircuitEvent::ForceOpen,
            CircuitState::MetricsOnly => CircuitEvent::RecordOnly,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to fallbacks when a call is not permitted
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub breaker_name: String,
    pub state: CircuitState,
}

/// Permission for one call
///
/// Report the call through [`on_success`](Permit::on_success) or
/// [`on_error`](Permit::on_error), or hand the permit back unused with
/// [`release`](Permit::release). Each consumes the permit. A HALF_OPEN
/// permit only counts for the half-open period it was granted in.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u32,
}

impl Permit<'_> {
    pub fn on_success(self, elapsed: Duration) {
        self.breaker.on_success(elapsed);
    }

    pub fn on_error<E: Any>(self, elapsed: Duration, error: &E) {
        self.breaker.on_error(elapsed, error);
    }

    /// Give the permit back without running the call
    ///
    /// Returns whether a trial slot was handed back. Permits from CLOSED,
    /// METRICS_ONLY or DISABLED, and permits from a half-open period that
    /// has since ended, release nothing.
    pub fn release(self) -> bool {
        self.breaker.permits.release(self.generation)
    }
}

/// Metrics of the active window plus breaker-level counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub failure_rate: f32,
    pub slow_call_rate: f32,
    pub buffered_calls: usize,
    pub max_buffered_calls: usize,
    pub total_calls: u64,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub ignored_calls: usize,
    /// Calls rejected since the last state transition
    pub not_permitted_calls: u64,
}

impl CircuitBreakerMetrics {
    fn new(window: WindowSnapshot, not_permitted_calls: u64) -> Self {
        Self {
            failure_rate: window.failure_rate,
            slow_call_rate: window.slow_call_rate,
            buffered_calls: window.buffered_calls,
            max_buffered_calls: window.capacity,
            total_calls: window.total_calls,
            successful_calls: window.success_calls,
            failed_calls: window.failure_calls,
            slow_calls: window.slow_calls,
            ignored_calls: window.ignored_calls,
            not_permitted_calls,
        }
    }
}

/// Consistent view of state and metrics for health reporting
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub metrics: CircuitBreakerMetrics,
    /// Time spent in the current state
    pub time_in_state: Duration,
    /// Wait that applies to the current opening, when Open
    pub open_wait: Option<Duration>,
}

/// State guarded by the breaker's mutex
struct BreakerCore {
    machine: DynamicCircuit,
    state: CircuitState,
    window: SlidingWindow,
    entered_at: Duration,
    /// Consecutive openings without an intervening Closed period
    open_attempts: u32,
}

/// Circuit breaker guarding one named operation
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    state: AtomicU8,
    core: Mutex<BreakerCore>,
    permits: HalfOpenPermits,
    not_permitted: AtomicU64,
    events: EventBus,
}

impl CircuitBreaker {
    /// Create a breaker on the process monotonic clock
    pub fn new(name: impl Into<String>, config: Arc<CircuitBreakerConfig>) -> Self {
        Self::with_clock(name, config, Arc::new(MonotonicClock::new()))
    }

    /// Create a breaker reading time from `clock`
    ///
    /// The breaker starts in the configured initial state; no event is
    /// published for it.
    pub fn with_clock(
        name: impl Into<String>,
        config: Arc<CircuitBreakerConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let mut machine = DynamicCircuit::new(MachineContext::new(clock.clone()));

        // Validation only admits initial states reachable from Closed
        let initial = config.initial_state();
        let state = if initial != CircuitState::Closed
            && machine.handle(initial.entry_event()).is_ok()
        {
            initial
        } else {
            CircuitState::Closed
        };

        let core = BreakerCore {
            machine,
            state,
            window: config.closed_window(),
            entered_at: clock.now(),
            open_attempts: 0,
        };

        Self {
            events: EventBus::new(name.clone(), config.event_log_capacity()),
            name,
            config,
            clock,
            state: AtomicU8::new(state as u8),
            core: Mutex::new(core),
            permits: HalfOpenPermits::new(),
            not_permitted: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<CircuitBreakerConfig> {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Try to obtain permission for one call without blocking
    ///
    /// In OPEN the first caller to observe an elapsed wait (with automatic
    /// transition enabled) moves the breaker to HALF_OPEN and takes the
    /// first trial permit. A refusal publishes a NOT_PERMITTED event.
    pub fn try_acquire_permission(&self) -> bool {
        self.try_acquire_permit().is_some()
    }

    /// [`try_acquire_permission`](Self::try_acquire_permission) handing out
    /// a [`Permit`] that can later be released
    pub fn try_acquire_permit(&self) -> Option<Permit<'_>> {
        let granted = match self.state() {
            CircuitState::Closed | CircuitState::MetricsOnly | CircuitState::Disabled => {
                Some(NO_PERIOD)
            }
            CircuitState::ForcedOpen => None,
            CircuitState::HalfOpen => self
                .permits
                .try_acquire()
                .or_else(|| self.acquire_after_state_change()),
            CircuitState::Open => self.acquire_while_open(),
        };

        match granted {
            Some(generation) => Some(Permit {
                breaker: self,
                generation,
            }),
            None => {
                self.not_permitted.fetch_add(1, Ordering::Relaxed);
                self.publish(EventPayload::NotPermitted);
                None
            }
        }
    }

    /// [`try_acquire_permit`](Self::try_acquire_permit) as a `Result`
    pub fn acquire_permission(&self) -> Result<Permit<'_>, CallNotPermitted> {
        self.try_acquire_permit().ok_or_else(|| CallNotPermitted {
            name: self.name.to_string(),
            state: self.state(),
        })
    }

    /// Give back a permit that was acquired but not used
    ///
    /// See [`Permit::release`].
    pub fn release_permission(&self, permit: Permit<'_>) -> bool {
        debug_assert!(std::ptr::eq(permit.breaker, self));
        permit.release()
    }

    /// Report a call that completed normally
    pub fn on_success(&self, elapsed: Duration) {
        let outcome = Outcome::success(elapsed, self.config.slow_call_duration_threshold());
        self.publish(EventPayload::Success { elapsed });
        self.record(outcome, elapsed);
    }

    /// Report a call that failed with `error`
    ///
    /// The configured classifier decides whether the error counts as a
    /// failure or is ignored. A classifier that panics counts the error
    /// as a failure.
    pub fn on_error<E: Any>(&self, elapsed: Duration, error: &E) {
        let error_type = std::any::type_name::<E>();
        let context = FailureContext {
            breaker_name: &self.name,
            error,
            elapsed,
        };
        let class = catch_unwind(AssertUnwindSafe(|| {
            self.config.classifier().classify(&context)
        }))
        .unwrap_or_else(|_| {
            warn!(
                breaker.name = %self.name,
                error.kind = error_type,
                "failure classifier panicked, counting error as failure"
            );
            ErrorClass::Failure
        });

        match class {
            ErrorClass::Failure => {
                self.publish(EventPayload::Error {
                    elapsed,
                    error_type,
                });
                let outcome =
                    Outcome::failure(elapsed, self.config.slow_call_duration_threshold());
                self.record(outcome, elapsed);
            }
            ErrorClass::Ignored => {
                self.publish(EventPayload::IgnoredError {
                    elapsed,
                    error_type,
                });
                self.record(Outcome::IgnoredError, elapsed);
            }
        }
    }

    /// Run `f` under the breaker
    ///
    /// Rejected calls return [`CircuitError::NotPermitted`] without running
    /// `f`. The call is timed with the breaker clock.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        E: Any,
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.acquire_permission()?;
        Self::execute(permit, f).map_err(CircuitError::Execution)
    }

    /// Run `f` under the breaker, answering with `fallback` when rejected
    pub fn call_or_else<T, E, F, G>(&self, f: F, fallback: G) -> Result<T, E>
    where
        E: Any,
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(&FallbackContext) -> Result<T, E>,
    {
        match self.acquire_permission() {
            Ok(permit) => Self::execute(permit, f),
            Err(rejected) => {
                let ctx = FallbackContext {
                    breaker_name: rejected.name,
                    state: rejected.state,
                };
                fallback(&ctx)
            }
        }
    }

    fn execute<T, E, F>(permit: Permit<'_>, f: F) -> Result<T, E>
    where
        E: Any,
        F: FnOnce() -> Result<T, E>,
    {
        let clock = permit.breaker.clock();
        let start = clock.now();
        let result = f();
        let elapsed = clock.now().saturating_sub(start);

        match &result {
            Ok(_) => permit.on_success(elapsed),
            Err(error) => permit.on_error(elapsed, error),
        }
        result
    }

    pub fn transition_to_closed_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::Closed)
    }

    pub fn transition_to_open_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::Open)
    }

    pub fn transition_to_half_open_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::HalfOpen)
    }

    pub fn transition_to_disabled_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::Disabled)
    }

    pub fn transition_to_forced_open_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::ForcedOpen)
    }

    pub fn transition_to_metrics_only_state(&self) -> Result<(), IllegalStateTransition> {
        self.transition_to(CircuitState::MetricsOnly)
    }

    /// Return to CLOSED from any state with an empty window
    ///
    /// Publishes one STATE_TRANSITION (even CLOSED -> CLOSED) followed by
    /// RESET. The wait escalation starts over.
    pub fn reset(&self) {
        {
            let mut core = self.core.lock();
            let from = core.state;
            core.machine = DynamicCircuit::new(MachineContext::new(self.clock.clone()));
            self.settle(&mut core, from, CircuitState::Closed, false);
            self.enqueue(EventPayload::Reset);
        }

        self.events.flush();
    }

    /// Metrics of the active window
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let window = self.core.lock().window.snapshot();
        CircuitBreakerMetrics::new(window, self.not_permitted.load(Ordering::Relaxed))
    }

    /// State and metrics read under one lock
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let core = self.core.lock();
        let open_wait = core.machine.open_data().map(|data| data.wait);

        CircuitBreakerSnapshot {
            name: self.name.to_string(),
            state: core.state,
            metrics: CircuitBreakerMetrics::new(
                core.window.snapshot(),
                self.not_permitted.load(Ordering::Relaxed),
            ),
            time_in_state: self.clock.now().saturating_sub(core.entered_at),
            open_wait,
        }
    }

    /// The breaker's event bus and bounded event log
    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events accepted by `predicate`
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionId
    where
        P: Fn(&CircuitBreakerEvent) -> bool + Send + Sync + 'static,
        H: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(predicate, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Snapshot of the event log, optionally filtered by kind
    pub fn history(&self, filter: Option<EventKind>) -> EventHistory {
        self.events.history(filter)
    }

    fn transition_to(&self, to: CircuitState) -> Result<(), IllegalStateTransition> {
        {
            let mut core = self.core.lock();
            let from = core.state;
            if core.machine.handle(to.entry_event()).is_err() {
                return Err(IllegalStateTransition {
                    name: self.name.to_string(),
                    from,
                    to,
                });
            }
            self.settle(&mut core, from, to, false);
        }

        self.events.flush();
        Ok(())
    }

    /// Permission path for a breaker observed as OPEN
    ///
    /// Returns the generation of the granted permit.
    fn acquire_while_open(&self) -> Option<u32> {
        let claimed = {
            let mut core = self.core.lock();
            let state = core.state;
            match state {
                CircuitState::Open => {
                    if !self.config.automatic_transition_enabled()
                        || core.machine.handle(CircuitEvent::AttemptReset).is_err()
                    {
                        return None;
                    }
                    self.settle(&mut core, CircuitState::Open, CircuitState::HalfOpen, true)
                }
                // Someone else moved the breaker on while we waited for the lock
                CircuitState::HalfOpen => return self.permits.try_acquire(),
                CircuitState::ForcedOpen => return None,
                CircuitState::Closed | CircuitState::MetricsOnly | CircuitState::Disabled => {
                    return Some(NO_PERIOD);
                }
            }
        };

        self.events.flush();
        claimed
    }

    /// A HALF_OPEN permit was refused; retry if the breaker moved meanwhile
    fn acquire_after_state_change(&self) -> Option<u32> {
        match self.state() {
            CircuitState::HalfOpen | CircuitState::ForcedOpen => None,
            CircuitState::Open => self.acquire_while_open(),
            CircuitState::Closed | CircuitState::MetricsOnly | CircuitState::Disabled => {
                Some(NO_PERIOD)
            }
        }
    }

    fn record(&self, outcome: Outcome, elapsed: Duration) {
        {
            let mut core = self.core.lock();
            if !core.state.records_outcomes() {
                debug!(
                    breaker.name = %self.name,
                    breaker.state = core.state.as_str(),
                    call.outcome = outcome.as_str(),
                    "outcome not recorded"
                );
                return;
            }

            core.window.record(outcome, elapsed);
            if core.state == CircuitState::HalfOpen {
                self.permits.complete();
            }
            self.evaluate(&mut core);
        }

        self.events.flush();
    }

    /// Check the thresholds right after a record. Caller holds the lock.
    fn evaluate(&self, core: &mut BreakerCore) {
        let snapshot = core.window.snapshot();
        let ready = match core.state {
            CircuitState::Closed => snapshot.buffered_calls >= core.window.minimum_calls(),
            CircuitState::HalfOpen => {
                snapshot.buffered_calls >= self.config.permitted_calls_in_half_open_state()
            }
            _ => false,
        };
        if !ready {
            return;
        }

        let failure_exceeded = snapshot.failure_rate >= self.config.failure_rate_threshold();
        let slow_exceeded = snapshot.slow_call_rate >= self.config.slow_call_rate_threshold();

        if failure_exceeded {
            self.enqueue(EventPayload::FailureRateExceeded {
                rate: snapshot.failure_rate,
            });
        }
        if slow_exceeded {
            self.enqueue(EventPayload::SlowCallRateExceeded {
                rate: snapshot.slow_call_rate,
            });
        }

        let to = if failure_exceeded || slow_exceeded {
            CircuitState::Open
        } else if core.state == CircuitState::HalfOpen {
            CircuitState::Closed
        } else {
            return;
        };

        let from = core.state;
        if core.machine.handle(to.entry_event()).is_ok() {
            self.settle(core, from, to, false);
        }
    }

    /// Per-state bookkeeping after the machine moved. Caller holds the lock.
    ///
    /// Queues the STATE_TRANSITION event. With `claim_permit` the caller
    /// takes the first HALF_OPEN permit before any other thread can observe
    /// the new state, and gets back its generation.
    fn settle(
        &self,
        core: &mut BreakerCore,
        from: CircuitState,
        to: CircuitState,
        claim_permit: bool,
    ) -> Option<u32> {
        let now = self.clock.now();
        let frozen_rate = core.window.snapshot().failure_rate;

        match to {
            CircuitState::Open => {
                core.open_attempts = core.open_attempts.saturating_add(1);
                let wait = self.open_wait(core.open_attempts);
                if let Some(data) = core.machine.open_data_mut() {
                    data.opened_at = now;
                    data.wait = wait;
                }
            }
            CircuitState::HalfOpen => core.window = self.config.half_open_window(),
            CircuitState::Closed => {
                core.open_attempts = 0;
                core.window = self.config.closed_window();
            }
            CircuitState::Disabled | CircuitState::ForcedOpen | CircuitState::MetricsOnly => {
                core.window = self.config.closed_window();
            }
        }

        let mut claimed = None;
        if to == CircuitState::HalfOpen {
            self.permits
                .reset(self.config.permitted_calls_in_half_open_state());
            if claim_permit {
                claimed = self.permits.try_acquire();
            }
        } else {
            self.permits.revoke();
        }

        core.state = to;
        core.entered_at = now;
        self.not_permitted.store(0, Ordering::Relaxed);
        debug_assert_eq!(core.machine.current_state(), to.as_str());
        self.state.store(to as u8, Ordering::Release);

        if matches!(to, CircuitState::Open | CircuitState::ForcedOpen) {
            warn!(
                breaker.name = %self.name,
                breaker.from = from.as_str(),
                breaker.to = to.as_str(),
                breaker.failure_rate = frozen_rate,
                breaker.open_attempts = core.open_attempts,
                "circuit breaker opened"
            );
        } else {
            info!(
                breaker.name = %self.name,
                breaker.from = from.as_str(),
                breaker.to = to.as_str(),
                "circuit breaker changed state"
            );
        }

        self.enqueue(EventPayload::StateTransition { from, to });
        claimed
    }

    /// Wait for the `attempt`-th consecutive opening
    fn open_wait(&self, attempt: u32) -> Duration {
        let base = self.config.wait_duration_in_open_state();
        let max = self.config.max_wait_duration_in_open_state();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

        let scaled =
            base.as_nanos() as f64 * self.config.wait_interval_multiplier().powi(exponent);
        let wait = if scaled.is_finite() && scaled < max.as_nanos() as f64 {
            Duration::from_nanos(scaled as u64)
        } else {
            max
        };

        let jitter = self.config.wait_jitter_factor();
        if jitter <= 0.0 {
            return wait;
        }

        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: wait_ms,
            multiplier: 1.0,
            max_delay_ms: wait_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, jitter))
    }

    fn publish(&self, payload: EventPayload) {
        self.events
            .publish(CircuitBreakerEvent::new(self.name.clone(), payload));
    }

    /// Queue an event in lock order; delivered by the next flush
    fn enqueue(&self, payload: EventPayload) {
        self.events
            .enqueue(CircuitBreakerEvent::new(self.name.clone(), payload));
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{PredicateClassifier, window::UNDEFINED_RATE};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex as StdMutex};
    use std::thread;

    const FAST: Duration = Duration::from_millis(5);

    fn breaker_with(config: CircuitBreakerConfig) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreaker::with_clock(
            "backendA",
            Arc::new(config),
            clock.clone(),
        ));
        (breaker, clock)
    }

    fn small_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(6)
            .failure_rate_threshold(70.0)
            .ring_buffer_size_in_half_open_state(2)
            .wait_duration_in_open_state(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    fn transitions(breaker: &CircuitBreaker) -> Vec<(CircuitState, CircuitState)> {
        breaker
            .history(Some(EventKind::StateTransition))
            .iter()
            .filter_map(|event| match event.payload {
                EventPayload::StateTransition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().ring_buffer_size_in_closed_state() {
            breaker.on_error(FAST, &"boom");
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_breaker_starts_closed() {
        let (breaker, _) = breaker_with(small_config());

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire_permission());
        assert_eq!(breaker.metrics().failure_rate, UNDEFINED_RATE);
        assert!(breaker.history(None).is_empty());
    }

    #[test]
    fn test_opens_on_call_that_fills_window() {
        let (breaker, _) = breaker_with(small_config());

        breaker.on_error(FAST, &"e1");
        breaker.on_error(FAST, &"e2");
        breaker.on_success(FAST);
        breaker.on_error(FAST, &"e3");
        breaker.on_error(FAST, &"e4");
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.on_error(FAST, &"e5");
        assert_eq!(breaker.state(), CircuitState::Open);

        let metrics = breaker.metrics();
        assert_eq!(metrics.buffered_calls, 6);
        assert_eq!(metrics.failed_calls, 5);
        assert_eq!(metrics.failure_rate, 83.33);
        assert_eq!(
            transitions(&breaker),
            vec![(CircuitState::Closed, CircuitState::Open)]
        );
    }

    #[test]
    fn test_rate_exceeded_event_precedes_transition() {
        let (breaker, _) = breaker_with(small_config());
        trip(&breaker);

        let kinds: Vec<EventKind> = breaker
            .history(None)
            .iter()
            .map(|e| e.kind())
            .filter(|k| *k != EventKind::Error)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::FailureRateExceeded, EventKind::StateTransition]
        );
    }

    #[test]
    fn test_healthy_window_stays_closed() {
        let (breaker, _) = breaker_with(small_config());

        for _ in 0..4 {
            breaker.on_success(FAST);
        }
        breaker.on_error(FAST, &"e1");
        breaker.on_error(FAST, &"e2");

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_rate, 33.33);
    }

    #[test]
    fn test_open_rejects_until_wait_elapses() {
        let (breaker, clock) = breaker_with(small_config());
        trip(&breaker);

        for _ in 0..5 {
            assert!(!breaker.try_acquire_permission());
        }
        clock.advance(Duration::from_secs(9));
        assert!(!breaker.try_acquire_permission());
        assert_eq!(breaker.metrics().not_permitted_calls, 6);
        assert_eq!(breaker.history(Some(EventKind::NotPermitted)).len(), 6);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.try_acquire_permission());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_open_window_is_frozen() {
        let (breaker, _) = breaker_with(small_config());
        trip(&breaker);

        breaker.on_success(FAST);
        breaker.on_error(FAST, &"late");

        let metrics = breaker.metrics();
        assert_eq!(metrics.buffered_calls, 6);
        assert_eq!(metrics.failed_calls, 6);
    }

    #[test]
    fn test_concurrent_callers_cause_one_half_open_transition() {
        let (breaker, clock) = breaker_with(small_config());
        trip(&breaker);
        clock.advance(Duration::from_secs(10));

        let barrier = Arc::new(Barrier::new(10));
        let granted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let barrier = Arc::clone(&barrier);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    barrier.wait();
                    if breaker.try_acquire_permission() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(granted.load(Ordering::SeqCst), 2);
        assert_eq!(
            transitions(&breaker),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
            ]
        );
    }

    #[test]
    fn test_half_open_grants_exactly_permitted_calls() {
        let (breaker, _) = breaker_with(small_config());
        breaker.transition_to_half_open_state().unwrap();

        let barrier = Arc::new(Barrier::new(10));
        let granted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let barrier = Arc::clone(&barrier);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    barrier.wait();
                    if breaker.try_acquire_permission() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.metrics().not_permitted_calls, 8);
    }

    #[test]
    fn test_half_open_closes_after_successful_trials() {
        let (breaker, clock) = breaker_with(small_config());
        trip(&breaker);
        clock.advance(Duration::from_secs(10));

        assert!(breaker.try_acquire_permission());
        breaker.on_success(FAST);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire_permission());
        breaker.on_success(FAST);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().buffered_calls, 0);
        assert_eq!(breaker.metrics().max_buffered_calls, 6);
    }

    #[test]
    fn test_half_open_reopens_with_escalating_wait() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(6)
            .failure_rate_threshold(70.0)
            .ring_buffer_size_in_half_open_state(2)
            .wait_duration_in_open_state(Duration::from_secs(10))
            .wait_interval_multiplier(2.0)
            .max_wait_duration_in_open_state(Duration::from_secs(30))
            .build()
            .unwrap();
        let (breaker, clock) = breaker_with(config);
        trip(&breaker);
        assert_eq!(breaker.snapshot().open_wait, Some(Duration::from_secs(10)));

        let reopen = |expected: Duration| {
            clock.advance(breaker.snapshot().open_wait.unwrap());
            assert!(breaker.try_acquire_permission());
            breaker.on_error(FAST, &"still down");
            assert!(breaker.try_acquire_permission());
            breaker.on_error(FAST, &"still down");
            assert_eq!(breaker.state(), CircuitState::Open);
            assert_eq!(breaker.snapshot().open_wait, Some(expected));
        };

        reopen(Duration::from_secs(20));
        reopen(Duration::from_secs(30));
        reopen(Duration::from_secs(30));

        // a Closed period resets the escalation
        breaker.transition_to_closed_state().unwrap();
        trip(&breaker);
        assert_eq!(breaker.snapshot().open_wait, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_jittered_wait_stays_within_bounds() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(2)
            .wait_duration_in_open_state(Duration::from_secs(10))
            .wait_jitter_factor(0.5)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);
        trip(&breaker);

        let wait = breaker.snapshot().open_wait.unwrap();
        assert!(wait >= Duration::from_secs(5), "wait was {wait:?}");
        assert!(wait <= Duration::from_secs(10), "wait was {wait:?}");
    }

    #[test]
    fn test_no_automatic_transition_when_disabled() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(2)
            .wait_duration_in_open_state(Duration::from_secs(1))
            .automatic_transition_from_open_to_half_open(false)
            .build()
            .unwrap();
        let (breaker, clock) = breaker_with(config);
        trip(&breaker);

        clock.advance(Duration::from_secs(60));
        assert!(!breaker.try_acquire_permission());
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.transition_to_half_open_state().unwrap();
        assert!(breaker.try_acquire_permission());
    }

    #[test]
    fn test_reset_from_open() {
        let (breaker, _) = breaker_with(small_config());
        trip(&breaker);

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().buffered_calls, 0);
        assert_eq!(
            transitions(&breaker),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
        let history = breaker.history(None);
        let last: Vec<EventKind> = history.iter().map(|e| e.kind()).collect();
        assert_eq!(
            &last[last.len() - 2..],
            &[EventKind::StateTransition, EventKind::Reset]
        );

        breaker.on_success(FAST);
        assert_eq!(breaker.metrics().buffered_calls, 1);
    }

    #[test]
    fn test_reset_from_every_state() {
        for target in [
            CircuitState::Open,
            CircuitState::HalfOpen,
            CircuitState::Disabled,
            CircuitState::ForcedOpen,
            CircuitState::MetricsOnly,
        ] {
            let (breaker, _) = breaker_with(small_config());
            breaker.transition_to(target).unwrap();
            breaker.reset();

            assert_eq!(breaker.state(), CircuitState::Closed);
            assert_eq!(breaker.metrics().buffered_calls, 0);
            assert_eq!(breaker.history(Some(EventKind::StateTransition)).len(), 2);
            assert_eq!(breaker.history(Some(EventKind::Reset)).len(), 1);
        }
    }

    #[test]
    fn test_reset_while_closed_still_reports_transition() {
        let (breaker, _) = breaker_with(small_config());
        breaker.on_success(FAST);

        breaker.reset();

        assert_eq!(
            transitions(&breaker),
            vec![(CircuitState::Closed, CircuitState::Closed)]
        );
        assert_eq!(breaker.metrics().buffered_calls, 0);
    }

    #[test]
    fn test_transition_to_current_state_is_rejected() {
        let (breaker, _) = breaker_with(small_config());

        let err = breaker.transition_to_closed_state().unwrap_err();
        assert_eq!(err.from, CircuitState::Closed);
        assert_eq!(err.to, CircuitState::Closed);

        breaker.transition_to_forced_open_state().unwrap();
        assert!(breaker.transition_to_forced_open_state().is_err());
        assert_eq!(transitions(&breaker).len(), 1);
    }

    #[test]
    fn test_forced_open_rejects_everything() {
        let (breaker, clock) = breaker_with(small_config());
        breaker.transition_to_forced_open_state().unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(!breaker.try_acquire_permission());

        let err = breaker.acquire_permission().unwrap_err();
        assert_eq!(err.state, CircuitState::ForcedOpen);
        assert_eq!(err.name, "backendA");
    }

    #[test]
    fn test_disabled_permits_without_recording() {
        let (breaker, _) = breaker_with(small_config());
        breaker.transition_to_disabled_state().unwrap();

        for _ in 0..20 {
            assert!(breaker.try_acquire_permission());
            breaker.on_error(FAST, &"ignored while disabled");
        }

        assert_eq!(breaker.state(), CircuitState::Disabled);
        assert_eq!(breaker.metrics().buffered_calls, 0);
        // outcome events are still published
        assert_eq!(breaker.history(Some(EventKind::Error)).len(), 20);
    }

    #[test]
    fn test_metrics_only_records_but_never_opens() {
        let (breaker, _) = breaker_with(small_config());
        breaker.transition_to_metrics_only_state().unwrap();

        for _ in 0..12 {
            assert!(breaker.try_acquire_permission());
            breaker.on_error(FAST, &"boom");
        }

        assert_eq!(breaker.state(), CircuitState::MetricsOnly);
        let metrics = breaker.metrics();
        assert_eq!(metrics.buffered_calls, 6);
        assert_eq!(metrics.total_calls, 12);
        assert_eq!(metrics.failure_rate, 100.0);
    }

    #[test]
    fn test_initial_state_from_config() {
        let config = CircuitBreakerConfig::builder()
            .initial_state(CircuitState::ForcedOpen)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);

        assert_eq!(breaker.state(), CircuitState::ForcedOpen);
        assert!(breaker.history(None).is_empty());
        breaker.transition_to_closed_state().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_ignored_errors_occupy_slots() {
        let classifier = Arc::new(PredicateClassifier::new(|ctx: &FailureContext<'_>| {
            ctx.error.downcast_ref::<&str>() != Some(&"not found")
        }));
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(4)
            .failure_rate_threshold(50.0)
            .classifier(classifier)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);

        breaker.on_error(FAST, &"not found");
        breaker.on_error(FAST, &"not found");
        breaker.on_error(FAST, &"not found");
        breaker.on_error(FAST, &"timeout");

        let metrics = breaker.metrics();
        assert_eq!(metrics.buffered_calls, 4);
        assert_eq!(metrics.ignored_calls, 3);
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.failure_rate, 25.0);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.history(Some(EventKind::IgnoredError)).len(), 3);
    }

    #[test]
    fn test_panicking_classifier_counts_failure() {
        let classifier = Arc::new(PredicateClassifier::new(|_: &FailureContext<'_>| -> bool {
            panic!("Simulated classifier panic")
        }));
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(2)
            .classifier(classifier)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);

        breaker.on_error(FAST, &"boom");
        breaker.on_error(FAST, &"boom");

        assert_eq!(breaker.metrics().failed_calls, 2);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_slow_calls_open_the_breaker() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(4)
            .slow_call_duration_threshold(Duration::from_millis(100))
            .slow_call_rate_threshold(50.0)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);

        breaker.on_success(Duration::from_millis(100));
        breaker.on_success(Duration::from_millis(101));
        breaker.on_success(FAST);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_success(Duration::from_secs(2));

        let metrics = breaker.metrics();
        assert_eq!(metrics.slow_calls, 2);
        assert_eq!(metrics.slow_call_rate, 50.0);
        assert_eq!(metrics.failure_rate, 0.0);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker
                .history(Some(EventKind::SlowCallRateExceeded))
                .len(),
            1
        );
    }

    #[test]
    fn test_call_records_outcomes_and_short_circuits() {
        let (breaker, _) = breaker_with(small_config());

        let ok: Result<u32, CircuitError<String>> = breaker.call(|| Ok(42));
        assert_eq!(ok.unwrap(), 42);

        for _ in 0..5 {
            let err = breaker.call(|| Err::<u32, _>("down".to_string()));
            assert!(matches!(err, Err(CircuitError::Execution(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let ran = AtomicUsize::new(0);
        let rejected = breaker.call(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        });
        assert!(rejected.unwrap_err().is_not_permitted());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_call_or_else_uses_fallback_when_rejected() {
        let (breaker, _) = breaker_with(small_config());
        breaker.transition_to_forced_open_state().unwrap();

        let result = breaker.call_or_else(
            || Ok::<_, String>("live"),
            |ctx| {
                assert_eq!(ctx.breaker_name, "backendA");
                assert_eq!(ctx.state, CircuitState::ForcedOpen);
                Ok("cached")
            },
        );
        assert_eq!(result.unwrap(), "cached");
    }

    #[test]
    fn test_call_measures_with_breaker_clock() {
        let config = CircuitBreakerConfig::builder()
            .slow_call_duration_threshold(Duration::from_secs(1))
            .build()
            .unwrap();
        let (breaker, clock) = breaker_with(config);

        let _ = breaker.call(|| {
            clock.advance(Duration::from_secs(3));
            Ok::<_, String>(())
        });

        assert_eq!(breaker.metrics().slow_calls, 1);
        let history = breaker.history(Some(EventKind::Success));
        let event = history.iter().next().unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Success {
                elapsed: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn test_release_permission_is_capped() {
        let (breaker, _) = breaker_with(small_config());
        let closed = breaker.acquire_permission().unwrap();
        assert!(!breaker.release_permission(closed), "closed permits hold no slot");

        breaker.transition_to_half_open_state().unwrap();
        let permit = breaker.acquire_permission().unwrap();
        assert!(breaker.release_permission(permit));

        assert!(breaker.try_acquire_permission());
        assert!(breaker.try_acquire_permission());
        assert!(!breaker.try_acquire_permission());
    }

    #[test]
    fn test_permit_from_earlier_half_open_period_is_not_reusable() {
        let (breaker, _) = breaker_with(small_config());
        breaker.transition_to_half_open_state().unwrap();
        let stale = breaker.acquire_permission().unwrap();

        breaker.transition_to_open_state().unwrap();
        breaker.transition_to_half_open_state().unwrap();
        let _current = breaker.acquire_permission().unwrap();

        assert!(!stale.release());
        let mut granted = 1;
        while breaker.try_acquire_permission() {
            granted += 1;
        }
        assert_eq!(granted, 2);
    }

    #[test]
    fn test_release_after_reported_outcome_grants_nothing() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(6)
            .ring_buffer_size_in_half_open_state(3)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);
        breaker.transition_to_half_open_state().unwrap();

        let reported = breaker.acquire_permission().unwrap();
        breaker.on_success(FAST);
        assert!(!reported.release());

        // a guard that reports its outcome is consumed by it
        breaker.acquire_permission().unwrap().on_success(FAST);

        assert!(breaker.try_acquire_permission());
        assert!(!breaker.try_acquire_permission());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_transition_history_forms_a_chain_under_contention() {
        let config = CircuitBreakerConfig::builder()
            .event_log_capacity(256)
            .build()
            .unwrap();

        for _ in 0..200 {
            let (breaker, _) = breaker_with(config.clone());
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [
                [CircuitState::ForcedOpen, CircuitState::Disabled],
                [CircuitState::MetricsOnly, CircuitState::Closed],
            ]
            .into_iter()
            .map(|targets| {
                let breaker = Arc::clone(&breaker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20 {
                        for target in targets {
                            // losing the race to the same target is fine
                            let _ = breaker.transition_to(target);
                        }
                    }
                })
            })
            .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let chain = transitions(&breaker);
            assert!(!chain.is_empty());
            assert_eq!(chain[0].0, CircuitState::Closed);
            for pair in chain.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "broken chain: {chain:?}");
            }
            assert_eq!(chain[chain.len() - 1].1, breaker.state());
        }
    }

    #[test]
    fn test_subscriber_panic_does_not_break_breaker() {
        let (breaker, _) = breaker_with(small_config());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        breaker.subscribe(|_| true, |_| panic!("Simulated subscriber panic"));
        breaker.subscribe(
            |e| e.kind() == EventKind::StateTransition,
            move |e| seen_clone.lock().unwrap().push(e.to_string()),
        );

        trip(&breaker);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["CircuitBreaker 'backendA' changed state from Closed to Open".to_string()]
        );
        assert_eq!(breaker.history(None).len(), 8);
    }

    #[test]
    fn test_subscriber_may_call_back_into_breaker() {
        let (breaker, _) = breaker_with(small_config());
        let observed = Arc::new(StdMutex::new(None));
        let observed_clone = Arc::clone(&observed);
        let weak = Arc::downgrade(&breaker);

        breaker.subscribe(
            |e| e.kind() == EventKind::StateTransition,
            move |_| {
                if let Some(breaker) = weak.upgrade() {
                    *observed_clone.lock().unwrap() = Some(breaker.snapshot().state);
                }
            },
        );

        trip(&breaker);
        assert_eq!(*observed.lock().unwrap(), Some(CircuitState::Open));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let config = CircuitBreakerConfig::builder()
            .ring_buffer_size_in_closed_state(1000)
            .event_log_capacity(1)
            .build()
            .unwrap();
        let (breaker, _) = breaker_with(config);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.on_success(FAST);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = breaker.metrics();
        assert_eq!(metrics.buffered_calls, 800);
        assert_eq!(metrics.successful_calls, 800);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_snapshot_reports_time_in_state() {
        let (breaker, clock) = breaker_with(small_config());
        clock.advance(Duration::from_secs(4));
        breaker.transition_to_disabled_state().unwrap();
        clock.advance(Duration::from_secs(3));

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name, "backendA");
        assert_eq!(snapshot.state, CircuitState::Disabled);
        assert_eq!(snapshot.time_in_state, Duration::from_secs(3));
        assert_eq!(snapshot.open_wait, None);
    }
}
