//! Transition table of the circuit breaker lifecycle
//!
//! The table has no self loops, so asking the machine to move into the
//! state it already occupies is rejected. OPEN carries the instant it was
//! entered and the wait that applies to this opening; the automatic
//! OPEN -> HALF_OPEN move is guarded on that wait having elapsed.

use crate::clock::{Clock, MonotonicClock};
use state_machines::state_machine;
use std::sync::Arc;
use std::time::Duration;

/// Shared data visible to guards
#[derive(Clone)]
pub struct MachineContext {
    pub clock: Arc<dyn Clock>,
}

impl MachineContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for MachineContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl std::fmt::Debug for MachineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineContext")
            .field("clock", &self.clock)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Clock reading when the breaker opened
    pub opened_at: Duration,
    /// Time to stay open before a probe is allowed
    pub wait: Duration,
}

impl OpenData {
    pub fn ready_at(&self) -> Duration {
        self.opened_at.saturating_add(self.wait)
    }
}

state_machine! {
    name: Circuit,
    context: MachineContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen,
        Disabled,
        ForcedOpen,
        MetricsOnly,
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen, Disabled, ForcedOpen, MetricsOnly], to: Open }
        }
        attempt_reset {
            guards: [wait_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        probe {
            transition: { from: [Closed, Open, Disabled, ForcedOpen, MetricsOnly], to: HalfOpen }
        }
        close {
            transition: { from: [Open, HalfOpen, Disabled, ForcedOpen, MetricsOnly], to: Closed }
        }
        disable {
            transition: { from: [Closed, Open, HalfOpen, ForcedOpen, MetricsOnly], to: Disabled }
        }
        force_open {
            transition: { from: [Closed, Open, HalfOpen, Disabled, MetricsOnly], to: ForcedOpen }
        }
        record_only {
            transition: { from: [Closed, Open, HalfOpen, Disabled, ForcedOpen], to: MetricsOnly }
        }
    }
}

impl Circuit<Open> {
    /// True once the wait recorded for this opening has passed
    fn wait_elapsed(&self, ctx: &MachineContext) -> bool {
        self.state_data_open()
            .is_some_and(|data| ctx.clock.now() >= data.ready_at())
    }
}
