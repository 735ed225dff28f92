//! Subscriber lists with panic isolation
//!
//! The list is copy-on-write: delivery clones an `Arc` of the current list
//! and runs handlers without holding any lock, so a handler may subscribe,
//! unsubscribe or publish again.

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: SubscriptionId,
    predicate: Option<Predicate<E>>,
    handler: Handler<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            predicate: self.predicate.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

pub(crate) struct Subscribers<E> {
    entries: RwLock<Arc<Vec<Subscriber<E>>>>,
    next_id: AtomicU64,
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(
        &self,
        predicate: Option<Predicate<E>>,
        handler: Handler<E>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let mut updated = Vec::with_capacity(entries.len() + 1);
        updated.extend(entries.iter().cloned());
        updated.push(Subscriber {
            id,
            predicate,
            handler,
        });
        *entries = Arc::new(updated);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|s| s.id == id) {
            return false;
        }
        let updated: Vec<_> = entries.iter().filter(|s| s.id != id).cloned().collect();
        *entries = Arc::new(updated);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Deliver `event` to every matching subscriber in registration order
    ///
    /// Returns how many handlers panicked; a panicking predicate or handler
    /// is skipped and delivery continues with the next subscriber.
    pub fn deliver(&self, event: &E, source: &str) -> usize {
        let entries = Arc::clone(&self.entries.read());
        let mut failed = 0;

        for subscriber in entries.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if subscriber.predicate.as_ref().is_none_or(|p| p(event)) {
                    (subscriber.handler)(event);
                }
            }));

            if outcome.is_err() {
                failed += 1;
                tracing::warn!(
                    breaker.name = source,
                    subscription = subscriber.id.0,
                    "event subscriber panicked; continuing delivery"
                );
            }
        }

        failed
    }
}

impl<E> std::fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}
