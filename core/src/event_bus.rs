//! Per-breaker event fan-out backed by a bounded event log
//!
//! Every published event is appended to a fixed-capacity log (the oldest
//! entry is evicted on overflow) and then handed to each live subscriber.
//! [`EventBus::history`] returns an immutable snapshot of the log.
//!
//! Events first enter a FIFO outbox. The breaker enqueues while it still
//! holds its own lock, so the outbox order is the order of the state
//! changes; draining happens afterwards, without that lock.

use crate::event::{CircuitBreakerEvent, EventKind};
use crate::subscribers::{SubscriptionId, Subscribers};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Event publisher and bounded event log of one circuit breaker
pub struct EventBus {
    source: Arc<str>,
    capacity: usize,
    log: Mutex<VecDeque<CircuitBreakerEvent>>,
    /// Events enqueued but not yet logged
    outbox: Mutex<VecDeque<CircuitBreakerEvent>>,
    subscribers: Subscribers<CircuitBreakerEvent>,
    /// Serializes append + delivery so subscribers observe publish order.
    /// Re-entrant: a handler may publish on the same thread.
    dispatch: ReentrantMutex<()>,
}

impl EventBus {
    /// Create a bus whose log keeps at most `capacity` events (minimum one)
    pub fn new(source: Arc<str>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            source,
            capacity,
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            outbox: Mutex::new(VecDeque::new()),
            subscribers: Subscribers::new(),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Append to the log and deliver to every matching subscriber
    ///
    /// Events enqueued earlier by another thread are delivered first.
    pub fn publish(&self, event: CircuitBreakerEvent) {
        self.enqueue(event);
        self.flush();
    }

    /// Reserve the event's position without delivering it
    pub(crate) fn enqueue(&self, event: CircuitBreakerEvent) {
        self.outbox.lock().push_back(event);
    }

    /// Log and deliver everything in the outbox, oldest first
    ///
    /// Whichever thread holds `dispatch` drains events enqueued by others
    /// too, so the log follows the outbox order.
    pub(crate) fn flush(&self) {
        let _ordered = self.dispatch.lock();

        loop {
            let Some(event) = self.outbox.lock().pop_front() else {
                break;
            };

            {
                let mut log = self.log.lock();
                if log.len() == self.capacity {
                    log.pop_front();
                }
                log.push_back(event.clone());
            }

            self.subscribers.deliver(&event, &self.source);
        }
    }

    /// Subscribe to events accepted by `predicate`
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionId
    where
        P: Fn(&CircuitBreakerEvent) -> bool + Send + Sync + 'static,
        H: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .subscribe(Some(Arc::new(predicate)), Arc::new(handler))
    }

    /// Subscribe to every event
    pub fn subscribe_all<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(None, Arc::new(handler))
    }

    /// Subscribe to events of one kind
    pub fn on_kind<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.subscribe(move |event| event.kind() == kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Snapshot of the log, optionally restricted to one event kind
    ///
    /// Later publishes never show up in an already returned history.
    pub fn history(&self, filter: Option<EventKind>) -> EventHistory {
        let events: Arc<[CircuitBreakerEvent]> = self.log.lock().iter().cloned().collect();
        EventHistory { events, filter }
    }

    /// Number of events currently held in the log
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("source", &self.source)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

/// Immutable, restartable view over a log snapshot
///
/// Filtering is applied lazily on every iteration.
#[derive(Debug, Clone)]
pub struct EventHistory {
    events: Arc<[CircuitBreakerEvent]>,
    filter: Option<EventKind>,
}

impl EventHistory {
    /// Iterate over matching events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &CircuitBreakerEvent> + '_ {
        let filter = self.filter;
        self.events
            .iter()
            .filter(move |event| filter.is_none_or(|kind| event.kind() == kind))
    }

    /// Count of matching events
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<CircuitBreakerEvent> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a EventHistory {
    type Item = &'a CircuitBreakerEvent;
    type IntoIter = Box<dyn Iterator<Item = &'a CircuitBreakerEvent> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
