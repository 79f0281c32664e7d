//! Event dispatcher
//!
//! Classifies one raw event at a time, keeps the state store current and
//! fans matching handlers out as supervised tasks. Reading the next event
//! never waits for an earlier fan-out to finish.

use futures::FutureExt;
use ha_core::{Event, Notification};
use ha_registries::SharedRegistryResolver;
use ha_state_store::SharedStateStore;
use ha_subscriptions::{Delivery, Invocation, SharedSubscriptionRegistry};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, trace, warn};

use crate::client::SharedClient;
use crate::error::ClientError;

/// Outcome of fanning one notification out to its handlers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Handlers that matched
    pub matched: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Routes inbound events to the state store and to subscriptions
pub struct Dispatcher {
    client: SharedClient,
    resolver: SharedRegistryResolver,
    store: SharedStateStore,
    subscriptions: SharedSubscriptionRegistry,
    /// Fan-out units not yet reaped
    in_flight: Mutex<JoinSet<FanOutReport>>,
}

impl Dispatcher {
    pub fn new(
        client: SharedClient,
        resolver: SharedRegistryResolver,
        store: SharedStateStore,
        subscriptions: SharedSubscriptionRegistry,
    ) -> Self {
        Self {
            client,
            resolver,
            store,
            subscriptions,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, JoinSet<FanOutReport>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one event without waiting for its handlers
    ///
    /// Only transport failures during a registry resync are returned;
    /// malformed events are logged and dropped.
    pub async fn handle(&self, event: Event) -> Result<(), ClientError> {
        let Some((label, invocations)) = self.prepare(event).await? else {
            return Ok(());
        };

        let mut in_flight = self.in_flight();
        // Reap finished units so the set does not grow without bound
        while let Some(Some(finished)) = in_flight.join_next().now_or_never() {
            log_unit_outcome(finished);
        }
        in_flight.spawn(fan_out(label, invocations));
        Ok(())
    }

    /// Handle one event and wait for all of its handlers
    ///
    /// Returns `None` when nothing was fanned out.
    pub async fn process(&self, event: Event) -> Result<Option<FanOutReport>, ClientError> {
        match self.prepare(event).await? {
            Some((label, invocations)) => Ok(Some(fan_out(label, invocations).await)),
            None => Ok(None),
        }
    }

    /// Wait for every in-flight fan-out unit
    ///
    /// Returns how many units were awaited.
    pub async fn drain(&self) -> usize {
        let mut completed = 0;
        loop {
            // Never hold the lock across an await
            let mut set = std::mem::take(&mut *self.in_flight());
            if set.is_empty() {
                return completed;
            }
            while let Some(finished) = set.join_next().await {
                log_unit_outcome(finished);
                completed += 1;
            }
        }
    }

    /// Number of fan-out units spawned and not yet reaped
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Reload registries and states from the remote platform
    #[instrument(skip(self))]
    pub async fn resync(&self) -> Result<(), ClientError> {
        let ticket = self.store.begin_resync();
        let devices = self.client.get_devices().await?;
        let areas = self.client.get_areas().await?;
        let entities = self.client.get_entities().await?;
        self.resolver.replace(devices, areas, entities);

        let states = self.client.get_all_states().await?;
        self.store.finish_resync(ticket, states);
        debug!(entities = self.store.len(), "Resynced registries and states");
        Ok(())
    }

    /// Classify, update the store and collect matching handler calls
    async fn prepare(
        &self,
        event: Event,
    ) -> Result<Option<(String, Vec<Invocation>)>, ClientError> {
        let event_type = event.event_type.clone();
        let notification = match Notification::classify(event) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Dropping malformed notification");
                return Ok(None);
            }
        };
        let label = notification.label();
        trace!(notification = %label, "Dispatching notification");

        let invocations = match &notification {
            Notification::StateChanged(data) => {
                let Some(new_state) = data.new_state.clone() else {
                    return Ok(None);
                };
                let stored = self.store.upsert(new_state);
                let old_state = data.old_state.clone().map(|old| {
                    let area = self.resolver.area_for(&old.entity_id);
                    Arc::new(old.with_area(area))
                });
                self.subscriptions.matching(&Delivery::StateChanged {
                    entity_id: &data.entity_id,
                    new_state: Some(stored),
                    old_state,
                })
            }
            Notification::EntityRemoved { entity_id } => {
                debug!(entity_id = %entity_id, "State change without new state, ignoring");
                return Ok(None);
            }
            Notification::ServiceCall(call) => {
                self.subscriptions.matching(&Delivery::ServiceCall(call))
            }
            Notification::RegistryUpdated(kind) => {
                debug!(registry = ?kind, "Registry updated, resyncing");
                self.resync().await?;
                return Ok(None);
            }
            Notification::Custom { event_type, data } => {
                self.subscriptions.matching(&Delivery::Event {
                    event_type: event_type.as_str(),
                    data,
                })
            }
        };

        if invocations.is_empty() {
            return Ok(None);
        }
        Ok(Some((label, invocations)))
    }
}

/// Run every matched handler as its own task and join them all
///
/// A failing or panicking handler is logged and does not affect siblings.
async fn fan_out(label: String, invocations: Vec<Invocation>) -> FanOutReport {
    let mut report = FanOutReport {
        matched: invocations.len(),
        failed: 0,
    };

    let mut handlers = JoinSet::new();
    for invocation in invocations {
        let subscription_id = invocation.subscription_id;
        let kind = invocation.kind;
        handlers.spawn(async move {
            let outcome = AssertUnwindSafe(async move { invocation.run().await })
                .catch_unwind()
                .await;
            (subscription_id, kind, outcome)
        });
    }

    while let Some(joined) = handlers.join_next().await {
        match joined {
            Ok((_, _, Ok(Ok(())))) => {}
            Ok((subscription_id, kind, Ok(Err(e)))) => {
                report.failed += 1;
                error!(
                    subscription_id = %subscription_id,
                    kind = %kind,
                    notification = %label,
                    error = %format!("{:#}", e),
                    "Handler failed"
                );
            }
            Ok((subscription_id, kind, Err(panic))) => {
                report.failed += 1;
                error!(
                    subscription_id = %subscription_id,
                    kind = %kind,
                    notification = %label,
                    panic = panic_message(panic.as_ref()),
                    "Handler panicked"
                );
            }
            Err(e) => {
                // Only reachable when the runtime shuts down under us
                report.failed += 1;
                warn!(notification = %label, error = %e, "Handler task aborted");
            }
        }
    }

    report
}

fn log_unit_outcome(finished: Result<FanOutReport, tokio::task::JoinError>) {
    match finished {
        Ok(report) => trace!(matched = report.matched, failed = report.failed, "Fan-out complete"),
        Err(e) => warn!(error = %e, "Fan-out unit aborted"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
