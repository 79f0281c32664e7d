//! Subscription entries and the deliveries they match

use ha_core::{EntityState, ServiceCall};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use tracing::error;

/// Result of one handler invocation
pub type HandlerResult = anyhow::Result<()>;

/// Future type for async handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// State handler: (entity_id, new_state, old_state)
pub type StateHandler = Arc<
    dyn Fn(String, Option<Arc<EntityState>>, Option<Arc<EntityState>>) -> HandlerFuture
        + Send
        + Sync,
>;

/// Service call handler: receives the service data
pub type ServiceHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Custom event handler: (event_type, data)
pub type EventHandler = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

/// Selects custom events by (event_type, data)
pub type EventPredicate = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// A unique identifier for a subscription, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription listens to, used in logs and for selective clearing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    State,
    ServiceCall,
    CompanionServiceCall,
    Event,
    EventPredicate,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::ServiceCall => "service_call",
            Self::CompanionServiceCall => "companion_service_call",
            Self::Event => "event",
            Self::EventPredicate => "event_predicate",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered matcher together with its handler
pub enum Subscription {
    /// By prefix of the entity id, empty pattern matches every entity
    State {
        pattern: String,
        handler: StateHandler,
    },
    /// By exact (domain, service), both stored lowercase
    ServiceCall {
        domain: String,
        service: String,
        handler: ServiceHandler,
        companion: bool,
    },
    /// By exact event type
    Event {
        event_type: String,
        handler: EventHandler,
    },
    /// By predicate over (event_type, data)
    EventPredicate {
        predicate: EventPredicate,
        handler: EventHandler,
    },
}

impl Subscription {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::State { .. } => SubscriptionKind::State,
            Self::ServiceCall {
                companion: false, ..
            } => SubscriptionKind::ServiceCall,
            Self::ServiceCall {
                companion: true, ..
            } => SubscriptionKind::CompanionServiceCall,
            Self::Event { .. } => SubscriptionKind::Event,
            Self::EventPredicate { .. } => SubscriptionKind::EventPredicate,
        }
    }

    /// Build the deferred handler call if this subscription matches `delivery`
    pub(crate) fn invocation_for(
        &self,
        id: SubscriptionId,
        delivery: &Delivery<'_>,
    ) -> Option<Invocation> {
        let call: Box<dyn FnOnce() -> HandlerFuture + Send> = match (self, delivery) {
            (
                Self::State { pattern, handler },
                Delivery::StateChanged {
                    entity_id,
                    new_state,
                    old_state,
                },
            ) if entity_id.starts_with(pattern.as_str()) => {
                let handler = Arc::clone(handler);
                let entity_id = entity_id.to_string();
                let new_state = new_state.clone();
                let old_state = old_state.clone();
                Box::new(move || handler(entity_id, new_state, old_state))
            }
            (
                Self::ServiceCall {
                    domain,
                    service,
                    handler,
                    ..
                },
                Delivery::ServiceCall(call),
            ) if call.is(domain, service) => {
                let handler = Arc::clone(handler);
                let data = call.service_data.clone();
                Box::new(move || handler(data))
            }
            (
                Self::Event {
                    event_type,
                    handler,
                },
                Delivery::Event {
                    event_type: fired,
                    data,
                },
            ) if event_type == fired => {
                let handler = Arc::clone(handler);
                let event_type = event_type.clone();
                let data = (*data).clone();
                Box::new(move || handler(event_type, data))
            }
            (
                Self::EventPredicate { predicate, handler },
                Delivery::Event { event_type, data },
            ) if predicate_matches(id, predicate, event_type, data) => {
                let handler = Arc::clone(handler);
                let event_type = event_type.to_string();
                let data = (*data).clone();
                Box::new(move || handler(event_type, data))
            }
            _ => return None,
        };

        Some(Invocation {
            subscription_id: id,
            kind: self.kind(),
            call,
        })
    }
}

/// Run a user predicate; a panic counts as no match
fn predicate_matches(
    id: SubscriptionId,
    predicate: &EventPredicate,
    event_type: &str,
    data: &Value,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| predicate(event_type, data))) {
        Ok(matched) => matched,
        Err(_) => {
            error!(
                subscription_id = %id,
                kind = SubscriptionKind::EventPredicate.as_str(),
                event_type,
                "Event predicate panicked, treating as no match"
            );
            false
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State { pattern, .. } => f.debug_struct("State").field("pattern", pattern).finish(),
            Self::ServiceCall {
                domain,
                service,
                companion,
                ..
            } => f
                .debug_struct("ServiceCall")
                .field("domain", domain)
                .field("service", service)
                .field("companion", companion)
                .finish(),
            Self::Event { event_type, .. } => f
                .debug_struct("Event")
                .field("event_type", event_type)
                .finish(),
            Self::EventPredicate { .. } => f.write_str("EventPredicate"),
        }
    }
}

/// One notification, in the shape subscriptions match against
#[derive(Debug, Clone)]
pub enum Delivery<'a> {
    StateChanged {
        entity_id: &'a str,
        new_state: Option<Arc<EntityState>>,
        old_state: Option<Arc<EntityState>>,
    },
    ServiceCall(&'a ServiceCall),
    Event {
        event_type: &'a str,
        data: &'a Value,
    },
}

/// A matched handler call, not started yet
///
/// The handler itself only runs when [`Invocation::run`] is called, so the
/// caller decides on which task the user code executes.
pub struct Invocation {
    pub subscription_id: SubscriptionId,
    pub kind: SubscriptionKind,
    call: Box<dyn FnOnce() -> HandlerFuture + Send>,
}

impl Invocation {
    /// Call the handler and return its future
    pub fn run(self) -> HandlerFuture {
        (self.call)()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("subscription_id", &self.subscription_id)
            .field("kind", &self.kind)
            .finish()
    }
}
