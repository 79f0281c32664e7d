//! The daemon host
//!
//! Owns the shared stores, drives the transport collaborator and exposes
//! the operations automation code uses.

use ha_config::DaemonConfig;
use ha_core::{Attributes, EntityId, EntityState, Value};
use ha_registries::{RegistryResolver, SharedRegistryResolver};
use ha_state_store::{SharedStateStore, StateStore};
use ha_subscriptions::{
    HandlerResult, SharedSubscriptionRegistry, SubscriptionId, SubscriptionRegistry,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::announce::{drain_announcements, Announcement, AnnouncementQueue};
use crate::apps::AppRegistry;
use crate::client::SharedClient;
use crate::data::{DataCache, SharedDataRepository};
use crate::dispatcher::Dispatcher;
use crate::error::{DaemonError, DaemonResult};
use crate::wait::{WaitCondition, WaitResult};

/// Pause before asking the transport again after an empty read
const IDLE_READ_DELAY: Duration = Duration::from_millis(10);

/// State value of the daemon's own status entity while connected
pub const STATUS_CONNECTED: &str = "Connected";

/// Resets a flag when dropped
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The automation daemon
pub struct Daemon {
    config: DaemonConfig,
    client: SharedClient,
    resolver: SharedRegistryResolver,
    store: SharedStateStore,
    subscriptions: SharedSubscriptionRegistry,
    dispatcher: Arc<Dispatcher>,
    announcements: AnnouncementQueue,
    /// Consumer side of the announcement queue while no drain loop owns it
    announcement_receiver: Mutex<Option<mpsc::Receiver<Announcement>>>,
    apps: AppRegistry,
    data: DataCache,
    /// Cancels the current run from `stop`
    run_token: Mutex<Option<CancellationToken>>,
    connected: AtomicBool,
    running: AtomicBool,
}

impl Daemon {
    /// Create a daemon talking to the platform through `client`
    pub fn new(config: DaemonConfig, client: SharedClient) -> Self {
        Self::with_repository(config, client, None)
    }

    /// Create a daemon with a repository backing `save_data`/`get_data`
    pub fn with_repository(
        config: DaemonConfig,
        client: SharedClient,
        repository: Option<SharedDataRepository>,
    ) -> Self {
        let resolver = Arc::new(RegistryResolver::new());
        let store = Arc::new(StateStore::new(resolver.clone()));
        let subscriptions = Arc::new(SubscriptionRegistry::with_companion_domain(
            config.companion_domain.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            client.clone(),
            resolver.clone(),
            store.clone(),
            subscriptions.clone(),
        ));
        let (announcements, receiver) =
            AnnouncementQueue::new(config.announcements.queue_capacity);

        Self {
            config,
            client,
            resolver,
            store,
            subscriptions,
            dispatcher,
            announcements,
            announcement_receiver: Mutex::new(Some(receiver)),
            apps: AppRegistry::new(),
            data: DataCache::new(repository),
            run_token: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state_store(&self) -> &SharedStateStore {
        &self.store
    }

    pub fn registry_resolver(&self) -> &SharedRegistryResolver {
        &self.resolver
    }

    pub fn subscriptions(&self) -> &SharedSubscriptionRegistry {
        &self.subscriptions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.run_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announcement_receiver(&self) -> MutexGuard<'_, Option<mpsc::Receiver<Announcement>>> {
        self.announcement_receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---- lifecycle ----

    /// Connect and process events until `cancel` fires, `stop` is called or
    /// the transport fails
    ///
    /// Transport failures end the run with an error; there is no reconnect.
    pub async fn run(&self, cancel: CancellationToken) -> DaemonResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DaemonError::AlreadyRunning);
        }
        let _running = FlagGuard(&self.running);
        let _connected = FlagGuard(&self.connected);

        let cancel = cancel.child_token();
        *self.run_token() = Some(cancel.clone());

        if let Err(e) = self.connect().await {
            self.run_token().take();
            return Err(e);
        }

        let announcer = self.announcement_receiver().take().map(|receiver| {
            tokio::spawn(drain_announcements(
                receiver,
                self.client.clone(),
                self.store.clone(),
                self.config.announcements.clone(),
                cancel.clone(),
            ))
        });

        let result = self.read_loop(&cancel).await;

        cancel.cancel();
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.close().await {
                debug!(error = %e, "Failed to close transport");
            }
        }
        if let Some(announcer) = announcer {
            match announcer.await {
                Ok(receiver) => *self.announcement_receiver() = Some(receiver),
                Err(e) => {
                    error!(error = %e, "Announcement loop ended abnormally, queue is gone")
                }
            }
        }
        self.dispatcher.drain().await;
        self.run_token().take();

        info!(ok = result.is_ok(), "Daemon run finished");
        result
    }

    async fn connect(&self) -> DaemonResult<()> {
        let target = self.config.connect_target()?;
        let url = target.url();
        info!(url = %url, "Connecting to remote platform");
        match self.client.connect(&target).await {
            Ok(true) => {
                info!(url = %url, "Connected to remote platform");
                Ok(())
            }
            Ok(false) => {
                error!(url = %url, "Remote platform refused the connection");
                Err(DaemonError::ConnectRefused(url))
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to connect");
                Err(e.into())
            }
        }
    }

    async fn read_loop(&self, cancel: &CancellationToken) -> DaemonResult<()> {
        self.dispatcher.resync().await.map_err(|e| {
            error!(error = %e, "Initial sync failed");
            e
        })?;
        self.client.subscribe_to_events().await.map_err(|e| {
            error!(error = %e, "Failed to subscribe to events");
            e
        })?;
        self.connected.store(true, Ordering::SeqCst);
        info!(entities = self.store.len(), "Daemon connected and synced");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = self.client.read_event() => next,
            };

            let outcome = match next {
                Ok(Some(event)) => self.dispatcher.handle(event).await,
                Ok(None) => {
                    tokio::time::sleep(IDLE_READ_DELAY).await;
                    Ok(())
                }
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                if cancel.is_cancelled() {
                    // stop() closed the transport under us
                    return Ok(());
                }
                error!(error = %e, "Transport failure, stopping daemon");
                self.connected.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
    }

    /// Stop the daemon: drop automation subscriptions and close the transport
    ///
    /// Companion service subscriptions are kept. Calling this again is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.subscriptions.clear_automation();

        if let Some(token) = self.run_token().take() {
            token.cancel();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Stopping daemon");
            if let Err(e) = self.client.close().await {
                warn!(error = %e, "Failed to close transport");
            }
        }
    }

    /// Drop automation subscriptions without touching the transport
    pub fn stop_automation_activities_only(&self) {
        debug!("Stopping automation activities");
        self.subscriptions.clear_automation();
    }

    // ---- subscriptions ----

    /// Listen for state changes of entities whose id starts with `pattern`
    pub fn listen_state<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(String, Option<Arc<EntityState>>, Option<Arc<EntityState>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions.listen_state(pattern, handler)
    }

    /// Cancel a subscription made with any `listen_*` call
    pub fn cancel_listen_state(&self, id: SubscriptionId) -> bool {
        self.subscriptions.cancel(id)
    }

    pub fn listen_event<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions.listen_event(event_type, handler)
    }

    pub fn listen_event_where<P, F, Fut>(&self, predicate: P, handler: F) -> SubscriptionId
    where
        P: Fn(&str, &Value) -> bool + Send + Sync + 'static,
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions.listen_event_where(predicate, handler)
    }

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
        self.subscriptions.listen_service_call(domain, service, handler)
    }

    pub fn listen_companion_service_call<F, Fut>(
        &self,
        service: impl AsRef<str>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions
            .listen_companion_service_call(service, handler)
    }

    /// Wait until any of `entity_ids` satisfies `condition`
    pub fn wait_for_change(
        &self,
        entity_ids: impl IntoIterator<Item = impl Into<String>>,
        condition: WaitCondition,
    ) -> WaitResult {
        WaitResult::start(self.subscriptions.clone(), entity_ids, condition)
    }

    // ---- states ----

    pub fn get_state(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.store.get(entity_id)
    }

    pub fn states(&self) -> Vec<Arc<EntityState>> {
        self.store.all()
    }

    /// Ids of the entities matching `predicate`
    pub fn select_entities(&self, predicate: impl Fn(&EntityState) -> bool) -> Vec<String> {
        self.store
            .select(predicate)
            .into_iter()
            .map(|state| state.entity_id.clone())
            .collect()
    }

    /// Set an entity's state on the remote platform and mirror the result
    #[instrument(skip(self, attributes))]
    pub async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Attributes,
    ) -> DaemonResult<Option<Arc<EntityState>>> {
        entity_id.parse::<EntityId>()?;
        let stored = self.client.set_state(entity_id, state, attributes).await?;
        Ok(stored.map(|snapshot| self.store.upsert(snapshot)))
    }

    /// Publish `<companion_domain>.status` with app counts
    pub async fn publish_status(
        &self,
        loaded_apps: usize,
        running_apps: usize,
    ) -> DaemonResult<Option<Arc<EntityState>>> {
        let mut attributes = Attributes::new();
        attributes.insert("number_of_loaded_apps".to_string(), loaded_apps.into());
        attributes.insert("number_of_running_apps".to_string(), running_apps.into());
        attributes.insert("version".to_string(), env!("CARGO_PKG_VERSION").into());

        let entity_id = format!("{}.status", self.config.companion_domain);
        self.set_state(&entity_id, STATUS_CONNECTED, attributes).await
    }

    // ---- outbound ----

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        wait_for_response: bool,
    ) -> DaemonResult<()> {
        self.client
            .call_service(domain, service, data, wait_for_response)
            .await?;
        Ok(())
    }

    pub async fn send_event(&self, event_type: &str, data: Value) -> DaemonResult<bool> {
        Ok(self.client.send_event(event_type, data).await?)
    }

    /// Queue a spoken announcement on a media player
    ///
    /// Returns whether it was queued; a full queue drops it.
    pub fn speak(&self, entity_id: &str, message: impl Into<String>) -> DaemonResult<bool> {
        entity_id.parse::<EntityId>()?;
        Ok(self.announcements.speak(entity_id, message))
    }

    // ---- apps ----

    pub fn register_app_instance<T>(&self, instance_id: impl Into<String>, app: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.apps.register(instance_id, app);
    }

    pub fn get_app<T>(&self, instance_id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.apps.get(instance_id)
    }

    pub fn clear_app_instances(&self) {
        self.apps.clear();
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    // ---- app data ----

    pub async fn save_data<T>(&self, id: &str, data: &T) -> DaemonResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.data.save(id, data).await
    }

    pub async fn get_data<T>(&self, id: &str) -> DaemonResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.data.get(id).await
    }
}

/// Thread-safe wrapper for Daemon
pub type SharedDaemon = Arc<Daemon>;
