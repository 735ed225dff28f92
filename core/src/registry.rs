//! Named circuit breakers and the status query over them
//!
//! A [`CircuitBreakerRegistry`] is an ordinary value: create it once at
//! start-up and hand it (usually inside an `Arc`) to whatever needs named
//! breakers. Lookups of existing names only touch one map shard for
//! reading; creation of a missing name is serialized on that shard so
//! concurrent first-time callers all receive the same instance.

use crate::CircuitBreakerConfig;
use crate::circuit::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use crate::subscribers::{SubscriptionId, Subscribers};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::info;

/// Health reported for a breaker by the status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    Up,
    Down,
    Unknown,
}

impl Health {
    pub fn from_state(state: CircuitState) -> Self {
        match state {
            CircuitState::Open | CircuitState::ForcedOpen => Health::Down,
            CircuitState::HalfOpen => Health::Unknown,
            CircuitState::Closed | CircuitState::Disabled | CircuitState::MetricsOnly => {
                Health::Up
            }
        }
    }
}

/// Read-only status of one named breaker
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStatus {
    pub health: Health,
    pub snapshot: CircuitBreakerSnapshot,
}

impl BreakerStatus {
    fn of(breaker: &CircuitBreaker) -> Self {
        let snapshot = breaker.snapshot();
        Self {
            health: Health::from_state(snapshot.state),
            snapshot,
        }
    }
}

/// Change to the set of registered breakers
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(Arc<CircuitBreaker>),
    Removed(Arc<CircuitBreaker>),
    Replaced {
        old: Arc<CircuitBreaker>,
        new: Arc<CircuitBreaker>,
    },
}

impl RegistryEvent {
    pub fn breaker_name(&self) -> &str {
        match self {
            RegistryEvent::Added(breaker) | RegistryEvent::Removed(breaker) => breaker.name(),
            RegistryEvent::Replaced { new, .. } => new.name(),
        }
    }
}

/// Registry of circuit breakers keyed by name
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: Arc<CircuitBreakerConfig>,
    /// Per-name overrides, captured when a breaker is created
    configurations: DashMap<String, Arc<CircuitBreakerConfig>>,
    clock: Arc<dyn Clock>,
    subscribers: Subscribers<RegistryEvent>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use the default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a registry with a custom default configuration
    pub fn with_config(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(Arc::new(default_config), Arc::new(MonotonicClock::new()))
    }

    /// Create a registry whose breakers all read time from `clock`
    pub fn with_clock(default_config: Arc<CircuitBreakerConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            configurations: DashMap::new(),
            clock,
            subscribers: Subscribers::new(),
        }
    }

    pub fn default_config(&self) -> &Arc<CircuitBreakerConfig> {
        &self.default_config
    }

    /// Get the breaker for `name`, creating it on first use
    ///
    /// A new breaker takes the override registered for `name`, or the
    /// default configuration.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let config = self
            .configurations
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default_config.clone());
        self.get_or_create(name, config)
    }

    /// Get the breaker for `name`, creating it with `config` on first use
    ///
    /// An existing breaker is returned unchanged; `config` is ignored then.
    pub fn breaker_with_config(
        &self,
        name: &str,
        config: Arc<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.get_or_create(name, config)
    }

    fn get_or_create(&self, name: &str, config: Arc<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        let created = match self.breakers.entry(name.to_string()) {
            Entry::Occupied(entry) => return entry.get().clone(),
            Entry::Vacant(entry) => {
                let breaker = Arc::new(CircuitBreaker::with_clock(
                    name,
                    config,
                    self.clock.clone(),
                ));
                entry.insert(breaker.clone());
                breaker
            }
        };

        info!(breaker.name = name, "circuit breaker registered");
        self.notify(RegistryEvent::Added(created.clone()));
        created
    }

    /// Look up a breaker without creating it
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Unregister a breaker; holders of the `Arc` keep a working instance
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let (_, removed) = self.breakers.remove(name)?;
        info!(breaker.name = name, "circuit breaker removed");
        self.notify(RegistryEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Register `breaker` under its own name, returning the one it displaced
    pub fn replace(&self, breaker: Arc<CircuitBreaker>) -> Option<Arc<CircuitBreaker>> {
        let previous = self
            .breakers
            .insert(breaker.name().to_string(), breaker.clone());

        match &previous {
            Some(old) => {
                info!(breaker.name = breaker.name(), "circuit breaker replaced");
                self.notify(RegistryEvent::Replaced {
                    old: old.clone(),
                    new: breaker,
                });
            }
            None => {
                info!(breaker.name = breaker.name(), "circuit breaker registered");
                self.notify(RegistryEvent::Added(breaker));
            }
        }
        previous
    }

    /// Snapshot of every registered breaker
    pub fn all_breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Register a configuration override for breakers later created as `name`
    ///
    /// Breakers that already exist keep the configuration they were built
    /// with.
    pub fn add_configuration(
        &self,
        name: impl Into<String>,
        config: Arc<CircuitBreakerConfig>,
    ) -> Option<Arc<CircuitBreakerConfig>> {
        self.configurations.insert(name.into(), config)
    }

    pub fn remove_configuration(&self, name: &str) -> Option<Arc<CircuitBreakerConfig>> {
        self.configurations
            .remove(name)
            .map(|(_, config)| config)
    }

    pub fn configuration(&self, name: &str) -> Option<Arc<CircuitBreakerConfig>> {
        self.configurations
            .get(name)
            .map(|entry| entry.value().clone())
    }

    /// Status of one breaker, if registered
    pub fn status(&self, name: &str) -> Option<BreakerStatus> {
        self.find(name).map(|breaker| BreakerStatus::of(&breaker))
    }

    /// Status of every registered breaker
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        self.all_breakers()
            .iter()
            .map(|breaker| BreakerStatus::of(breaker))
            .collect()
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        for breaker in self.all_breakers() {
            breaker.reset();
        }
    }

    /// Subscribe to registry membership changes
    pub fn on_event<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    // Callers must not hold a map guard here: handlers may use the registry.
    fn notify(&self, event: RegistryEvent) {
        self.subscribers.deliver(&event, "registry");
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}
