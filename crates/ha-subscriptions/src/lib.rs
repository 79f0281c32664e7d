//! Subscription table for the automation daemon
//!
//! Automation code registers listeners here; the dispatcher asks the table
//! which listeners match a notification. One tagged table holds all kinds
//! of subscriptions:
//! - state changes, by entity id prefix (empty prefix matches everything)
//! - service calls, by exact (domain, service), case-insensitive
//! - companion service calls, the same but in the daemon's own domain
//! - custom events, by exact event type or by predicate

mod subscription;

pub use subscription::{
    Delivery, EventHandler, EventPredicate, HandlerFuture, HandlerResult, Invocation,
    ServiceHandler, StateHandler, Subscription, SubscriptionId, SubscriptionKind,
};

use dashmap::DashMap;
use ha_core::EntityState;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Domain used for companion services when none is configured
pub const DEFAULT_COMPANION_DOMAIN: &str = "netdaemon";

/// The table of active subscriptions
///
/// Safe to add to, cancel from and match against concurrently. Handlers may
/// register or cancel subscriptions while a fan-out is running; matching
/// only ever looks at the table as it is when a notification is classified.
pub struct SubscriptionRegistry {
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    /// Counter for generating unique subscription IDs
    next_id: AtomicU64,
    /// Domain of the companion services
    companion_domain: String,
}

impl SubscriptionRegistry {
    /// Create an empty registry using the default companion domain
    pub fn new() -> Self {
        Self::with_companion_domain(DEFAULT_COMPANION_DOMAIN)
    }

    /// Create an empty registry with a specific companion domain
    pub fn with_companion_domain(domain: impl Into<String>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            companion_domain: domain.into().to_lowercase(),
        }
    }

    pub fn companion_domain(&self) -> &str {
        &self.companion_domain
    }

    fn insert(&self, subscription: Subscription) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(subscription_id = %id, kind = %subscription.kind(), "Adding subscription");
        self.subscriptions.insert(id, Arc::new(subscription));
        id
    }

    /// Listen for state changes of entities whose id starts with `pattern`
    ///
    /// An empty pattern matches every entity.
    pub fn listen_state<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(String, Option<Arc<EntityState>>, Option<Arc<EntityState>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: StateHandler = Arc::new(move |entity_id, new_state, old_state| {
            Box::pin(handler(entity_id, new_state, old_state)) as HandlerFuture
        });
        self.insert(Subscription::State {
            pattern: pattern.into(),
            handler,
        })
    }

    /// Listen for custom events of exactly `event_type`
    pub fn listen_event<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(Subscription::Event {
            event_type: event_type.into(),
            handler: event_handler(handler),
        })
    }

    /// Listen for custom events selected by `predicate`
    pub fn listen_event_where<P, F, Fut>(&self, predicate: P, handler: F) -> SubscriptionId
    where
        P: Fn(&str, &Value) -> bool + Send + Sync + 'static,
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(Subscription::EventPredicate {
            predicate: Arc::new(predicate),
            handler: event_handler(handler),
        })
    }

    /// Listen for invocations of `domain.service` on the remote platform
    ///
    /// Domain and service are matched case-insensitively.
    pub fn listen_service_call<F, Fut>(
        &self,
        domain: impl AsRef<str>,
        service: impl AsRef<str>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(Subscription::ServiceCall {
            domain: domain.as_ref().to_lowercase(),
            service: service.as_ref().to_lowercase(),
            handler: service_handler(handler),
            companion: false,
        })
    }

    /// Listen for invocations of a service in the companion domain
    pub fn listen_companion_service_call<F, Fut>(
        &self,
        service: impl AsRef<str>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(Subscription::ServiceCall {
            domain: self.companion_domain.clone(),
            service: service.as_ref().to_lowercase(),
            handler: service_handler(handler),
            companion: true,
        })
    }

    /// Remove a subscription; unknown ids are ignored
    ///
    /// Returns whether the subscription existed.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        trace!(subscription_id = %id, removed, "Canceling subscription");
        removed
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Collect the handler calls matching `delivery`
    ///
    /// Handlers are not run here; see [`Invocation::run`]. Event predicates
    /// are evaluated after the table is released, so a predicate may itself
    /// listen or cancel.
    pub fn matching(&self, delivery: &Delivery<'_>) -> Vec<Invocation> {
        let snapshot: Vec<(SubscriptionId, Arc<Subscription>)> = self
            .subscriptions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        snapshot
            .into_iter()
            .filter_map(|(id, subscription)| subscription.invocation_for(id, delivery))
            .collect()
    }

    /// Drop every subscription made by automation code
    ///
    /// Companion service subscriptions belong to the daemon's own platform
    /// integration and are kept.
    #[instrument(skip(self))]
    pub fn clear_automation(&self) {
        self.subscriptions
            .retain(|_, s| s.kind() == SubscriptionKind::CompanionServiceCall);
        debug!(remaining = self.subscriptions.len(), "Cleared automation subscriptions");
    }

    /// Drop every subscription, companion ones included
    pub fn clear(&self) {
        self.subscriptions.clear();
    }

    /// Number of subscriptions of a kind
    pub fn count(&self, kind: SubscriptionKind) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn event_handler<F, Fut>(handler: F) -> EventHandler
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |event_type, data| Box::pin(handler(event_type, data)) as HandlerFuture)
}

fn service_handler<F, Fut>(handler: F) -> ServiceHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |data| Box::pin(handler(data)) as HandlerFuture)
}

/// Thread-safe wrapper for SubscriptionRegistry
pub type SharedSubscriptionRegistry = Arc<SubscriptionRegistry>;
