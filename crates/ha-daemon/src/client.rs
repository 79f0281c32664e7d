//! The transport collaborator
//!
//! The daemon never speaks the remote platform's wire protocol itself. A
//! [`HassClient`] implementation connects, authenticates and yields raw
//! events; the daemon drives it.

use async_trait::async_trait;
use ha_config::ConnectTarget;
use ha_core::{Attributes, EntityState, Event};
use ha_registries::{AreaRecord, DeviceRecord, EntityRegistryRecord};
use serde_json::Value;
use std::sync::Arc;

use crate::error::ClientError;

/// Connection to the remote smart-home platform
#[async_trait]
pub trait HassClient: Send + Sync {
    /// Connect and authenticate; `Ok(false)` means the platform refused
    async fn connect(&self, target: &ConnectTarget) -> Result<bool, ClientError>;

    /// Ask the platform to stream all events
    async fn subscribe_to_events(&self) -> Result<(), ClientError>;

    /// Next event from the stream
    ///
    /// `Ok(None)` means nothing was available; callers retry.
    async fn read_event(&self) -> Result<Option<Event>, ClientError>;

    async fn close(&self) -> Result<(), ClientError>;

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        wait_for_response: bool,
    ) -> Result<(), ClientError>;

    async fn get_devices(&self) -> Result<Vec<DeviceRecord>, ClientError>;

    async fn get_areas(&self) -> Result<Vec<AreaRecord>, ClientError>;

    async fn get_entities(&self) -> Result<Vec<EntityRegistryRecord>, ClientError>;

    async fn get_all_states(&self) -> Result<Vec<EntityState>, ClientError>;

    async fn send_event(&self, event_type: &str, data: Value) -> Result<bool, ClientError>;

    /// Set an entity's state, returning the snapshot the platform stored
    async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Attributes,
    ) -> Result<Option<EntityState>, ClientError>;
}

/// Shared handle to the transport collaborator
pub type SharedClient = Arc<dyn HassClient>;
