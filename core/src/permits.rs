//! Permit ceiling for half-open trial calls
//!
//! A lock-free counter of remaining permits. Acquisition is a
//! compare-and-swap decrement that refuses at zero, so a burst of
//! simultaneous callers can never be granted more than the configured
//! number of trial calls.
//!
//! Every half-open period gets a new generation, packed into the same word
//! as the remaining count. A permit carries the generation it was taken
//! from and can only be handed back to that period.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Generation stamped on permits granted outside HALF_OPEN
pub(crate) const NO_PERIOD: u32 = 0;

const REMAINING_MASK: u64 = 0xFFFF_FFFF;

fn pack(generation: u32, remaining: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(remaining)
}

fn generation_of(word: u64) -> u32 {
    (word >> 32) as u32
}

fn remaining_of(word: u64) -> u32 {
    (word & REMAINING_MASK) as u32
}

#[derive(Debug)]
pub(crate) struct HalfOpenPermits {
    /// Generation in the high half, permits left in the low half
    state: AtomicU64,
    /// Permits granted per half-open period
    limit: AtomicU32,
    /// Outcomes recorded in the current period
    completed: AtomicU32,
}

impl HalfOpenPermits {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(pack(NO_PERIOD, 0)),
            limit: AtomicU32::new(0),
            completed: AtomicU32::new(0),
        }
    }

    /// Start a new half-open period with `limit` permits
    ///
    /// Callers serialize `reset` and `revoke` under the breaker lock.
    pub fn reset(&self, limit: usize) {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.limit.store(limit, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.advance(limit);
    }

    /// Withdraw every permit (the breaker left HALF_OPEN)
    pub fn revoke(&self) {
        self.advance(0);
    }

    fn advance(&self, remaining: u32) {
        let current = generation_of(self.state.load(Ordering::Acquire));
        let next = match current.wrapping_add(1) {
            NO_PERIOD => 1,
            next => next,
        };
        self.state.store(pack(next, remaining), Ordering::Release);
    }

    /// Try to take a permit without blocking
    ///
    /// Returns the generation of the period the permit belongs to.
    pub fn try_acquire(&self) -> Option<u32> {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            if remaining_of(current) == 0 {
                return None;
            }

            match self.state.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(generation_of(current)),
                // Another thread modified the counter, try again
                Err(actual) => current = actual,
            }
        }
    }

    /// Count one outcome recorded while HALF_OPEN
    pub fn complete(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Hand back a permit of `generation` that was acquired but never used
    ///
    /// Refused when the period has ended, and never raises the count of
    /// available plus completed calls above the period's limit.
    pub fn release(&self, generation: u32) -> bool {
        if generation == NO_PERIOD {
            return false;
        }
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            if generation_of(current) != generation {
                return false;
            }
            let limit = self.limit.load(Ordering::Relaxed);
            let completed = self.completed.load(Ordering::Acquire);
            if remaining_of(current).saturating_add(completed) >= limit {
                return false;
            }

            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn available(&self) -> usize {
        remaining_of(self.state.load(Ordering::Acquire)) as usize
    }
}
