//! Fixed-capacity ring buffer of call outcomes
//!
//! Aggregates are maintained incrementally on every [`SlidingWindow::record`]
//! so reading a [`WindowSnapshot`] never rescans the buffer.

use std::time::Duration;

/// Rate reported while fewer than the minimum number of calls are buffered
pub const UNDEFINED_RATE: f32 = -1.0;

/// Classified outcome of one protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Error,
    SlowSuccess,
    SlowError,
    /// Error the classifier chose to ignore; occupies a slot but is neither
    /// a success nor a failure
    IgnoredError,
}

impl Outcome {
    /// Outcome of a call that returned normally
    pub fn success(elapsed: Duration, slow_threshold: Duration) -> Self {
        if elapsed > slow_threshold {
            Outcome::SlowSuccess
        } else {
            Outcome::Success
        }
    }

    /// Outcome of a call whose error counts as a failure
    pub fn failure(elapsed: Duration, slow_threshold: Duration) -> Self {
        if elapsed > slow_threshold {
            Outcome::SlowError
        } else {
            Outcome::Error
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success | Outcome::SlowSuccess)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Error | Outcome::SlowError)
    }

    pub fn is_slow(self) -> bool {
        matches!(self, Outcome::SlowSuccess | Outcome::SlowError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Error => "Error",
            Outcome::SlowSuccess => "SlowSuccess",
            Outcome::SlowError => "SlowError",
            Outcome::IgnoredError => "IgnoredError",
        }
    }
}

/// A single buffered outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Point-in-time aggregate view of a [`SlidingWindow`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    /// Records ever made into this window, including evicted ones
    pub total_calls: u64,
    pub buffered_calls: usize,
    pub capacity: usize,
    pub success_calls: usize,
    pub failure_calls: usize,
    pub slow_calls: usize,
    pub ignored_calls: usize,
    /// Percentage of buffered calls that failed, or [`UNDEFINED_RATE`]
    pub failure_rate: f32,
    /// Percentage of buffered calls that were slow, or [`UNDEFINED_RATE`]
    pub slow_call_rate: f32,
}

impl WindowSnapshot {
    pub fn is_full(&self) -> bool {
        self.buffered_calls == self.capacity
    }
}

/// Ring buffer of the most recent `capacity` call outcomes
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    records: Vec<CallRecord>,
    capacity: usize,
    minimum_calls: usize,
    /// Slot holding the oldest record once the buffer is full
    next: usize,
    total_calls: u64,
    success_calls: usize,
    failure_calls: usize,
    slow_calls: usize,
    ignored_calls: usize,
}

impl SlidingWindow {
    /// Create an empty window
    ///
    /// `capacity` is raised to at least one and `minimum_calls` is clamped
    /// into `1..=capacity`; configuration validation rejects such values
    /// before they ever reach a breaker.
    pub fn new(capacity: usize, minimum_calls: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            minimum_calls: minimum_calls.clamp(1, capacity),
            next: 0,
            total_calls: 0,
            success_calls: 0,
            failure_calls: 0,
            slow_calls: 0,
            ignored_calls: 0,
        }
    }

    /// Append an outcome, evicting the oldest one when at capacity
    pub fn record(&mut self, outcome: Outcome, elapsed: Duration) {
        let record = CallRecord { outcome, elapsed };

        if self.records.len() < self.capacity {
            self.records.push(record);
        } else {
            let evicted = std::mem::replace(&mut self.records[self.next], record);
            self.adjust(evicted.outcome, false);
            self.next = (self.next + 1) % self.capacity;
        }

        self.adjust(outcome, true);
        self.total_calls = self.total_calls.saturating_add(1);
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let buffered = self.records.len();
        let evaluable = buffered >= self.minimum_calls;

        WindowSnapshot {
            total_calls: self.total_calls,
            buffered_calls: buffered,
            capacity: self.capacity,
            success_calls: self.success_calls,
            failure_calls: self.failure_calls,
            slow_calls: self.slow_calls,
            ignored_calls: self.ignored_calls,
            failure_rate: if evaluable {
                percentage(self.failure_calls, buffered)
            } else {
                UNDEFINED_RATE
            },
            slow_call_rate: if evaluable {
                percentage(self.slow_calls, buffered)
            } else {
                UNDEFINED_RATE
            },
        }
    }

    pub fn buffered_calls(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn minimum_calls(&self) -> usize {
        self.minimum_calls
    }

    pub fn is_full(&self) -> bool {
        self.records.len() == self.capacity
    }

    /// Buffered records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &CallRecord> {
        self.records[self.next..]
            .iter()
            .chain(self.records[..self.next].iter())
    }

    fn adjust(&mut self, outcome: Outcome, add: bool) {
        let step = |counter: &mut usize| {
            if add {
                *counter += 1;
            } else {
                *counter -= 1;
            }
        };

        if outcome.is_success() {
            step(&mut self.success_calls);
        }
        if outcome.is_failure() {
            step(&mut self.failure_calls);
        }
        if outcome.is_slow() {
            step(&mut self.slow_calls);
        }
        if outcome == Outcome::IgnoredError {
            step(&mut self.ignored_calls);
        }
    }
}

/// `100 * count / buffered`, truncated to hundredths
///
/// Integer arithmetic keeps the result identical on every platform, so a
/// threshold sitting on a fractional boundary always compares the same way.
pub(crate) fn percentage(count: usize, buffered: usize) -> f32 {
    if buffered == 0 {
        return UNDEFINED_RATE;
    }
    let hundredths = (count as u64).saturating_mul(10_000) / buffered as u64;
    hundredths as f32 / 100.0
}
