//! Shared helpers for the daemon integration tests
//!
//! `FakeClient` stands in for the transport: tests push events into it and
//! inspect the calls the daemon made.

#![allow(dead_code)]

use async_trait::async_trait;
use ha_config::{ConnectTarget, DaemonConfig};
use ha_core::{events, Attributes, EntityState, Event};
use ha_daemon::{ClientError, HassClient};
use ha_registries::{AreaRecord, DeviceRecord, EntityRegistryRecord};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A service call the daemon made
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
    pub wait_for_response: bool,
    pub at: Instant,
}

/// In-memory transport driven by the test
pub struct FakeClient {
    sender: mpsc::UnboundedSender<Result<Event, ClientError>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Event, ClientError>>>,
    accept_connection: AtomicBool,
    pub connected_to: Mutex<Option<ConnectTarget>>,
    pub subscribed: AtomicBool,
    pub closed: AtomicBool,
    pub devices: Mutex<Vec<DeviceRecord>>,
    pub areas: Mutex<Vec<AreaRecord>>,
    pub entities: Mutex<Vec<EntityRegistryRecord>>,
    pub states: Mutex<Vec<EntityState>>,
    pub state_fetches: AtomicUsize,
    /// Service calls left to reject
    failing_calls: AtomicUsize,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub sent_events: Mutex<Vec<(String, Value)>>,
    pub set_states: Mutex<Vec<(String, String)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            accept_connection: AtomicBool::new(true),
            connected_to: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            devices: Mutex::new(Vec::new()),
            areas: Mutex::new(Vec::new()),
            entities: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            state_fetches: AtomicUsize::new(0),
            failing_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            sent_events: Mutex::new(Vec::new()),
            set_states: Mutex::new(Vec::new()),
        }
    }

    /// Device d1 sits in the kitchen and owns light.kitchen1
    pub fn with_kitchen() -> Self {
        let client = Self::new();
        *client.devices.lock().unwrap() = vec![DeviceRecord::new("d1").in_area("kitchen")];
        *client.areas.lock().unwrap() = vec![AreaRecord::new("kitchen", "Kitchen")];
        *client.entities.lock().unwrap() =
            vec![EntityRegistryRecord::new("light.kitchen1").on_device("d1")];
        *client.states.lock().unwrap() = vec![state("light.kitchen1", "off")];
        client
    }

    pub fn refuse_connection(&self) {
        self.accept_connection.store(false, Ordering::SeqCst);
    }

    /// Reject the next `count` service calls; they are still recorded
    pub fn fail_next_calls(&self, count: usize) {
        self.failing_calls.store(count, Ordering::SeqCst);
    }

    pub fn push(&self, event: Event) {
        let _ = self.sender.send(Ok(event));
    }

    pub fn fail(&self, error: ClientError) {
        let _ = self.sender.send(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HassClient for FakeClient {
    async fn connect(&self, target: &ConnectTarget) -> Result<bool, ClientError> {
        *self.connected_to.lock().unwrap() = Some(target.clone());
        Ok(self.accept_connection.load(Ordering::SeqCst))
    }

    async fn subscribe_to_events(&self) -> Result<(), ClientError> {
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_event(&self) -> Result<Option<Event>, ClientError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Err(ClientError::Closed),
        }
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        wait_for_response: bool,
    ) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(RecordedCall {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
            wait_for_response,
            at: Instant::now(),
        });
        let rejected = self
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ClientError::Request {
                request: format!("{}.{}", domain, service),
                reason: "service not found".to_string(),
            });
        }
        Ok(())
    }

    async fn get_devices(&self) -> Result<Vec<DeviceRecord>, ClientError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_areas(&self) -> Result<Vec<AreaRecord>, ClientError> {
        Ok(self.areas.lock().unwrap().clone())
    }

    async fn get_entities(&self) -> Result<Vec<EntityRegistryRecord>, ClientError> {
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn get_all_states(&self) -> Result<Vec<EntityState>, ClientError> {
        self.state_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.lock().unwrap().clone())
    }

    async fn send_event(&self, event_type: &str, data: Value) -> Result<bool, ClientError> {
        self.sent_events
            .lock()
            .unwrap()
            .push((event_type.to_string(), data));
        Ok(true)
    }

    async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Attributes,
    ) -> Result<Option<EntityState>, ClientError> {
        self.set_states
            .lock()
            .unwrap()
            .push((entity_id.to_string(), state.to_string()));
        Ok(Some(EntityState::new(entity_id, state, attributes)))
    }
}

/// Config with a token and short announcement pacing
pub fn test_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.connection.token = Some("test-token".to_string());
    config.announcements.settle_delay_ms = 20;
    config
}

pub fn state(entity_id: &str, value: &str) -> EntityState {
    EntityState::new(entity_id, value, Attributes::new())
}

pub fn state_changed(entity_id: &str, old: Option<&str>, new: Option<&str>) -> Event {
    Event::new(
        events::STATE_CHANGED,
        json!({
            "entity_id": entity_id,
            "old_state": old.map(|s| json!({"entity_id": entity_id, "state": s})),
            "new_state": new.map(|s| json!({"entity_id": entity_id, "state": s})),
        }),
    )
}

pub fn service_called(domain: &str, service: &str, data: Value) -> Event {
    Event::new(
        events::CALL_SERVICE,
        json!({"domain": domain, "service": service, "service_data": data}),
    )
}

/// Poll `condition` until it holds or a second has passed
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
