//! Event records read from the remote platform and their classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{
    StateChangedData, AREA_REGISTRY_UPDATED, CALL_SERVICE, DEVICE_REGISTRY_UPDATED, STATE_CHANGED,
};
use crate::ServiceCall;

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    /// Get the event type as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw event record from the remote platform's live stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The type of event
    pub event_type: EventType,

    /// The event payload, shape depends on `event_type`
    #[serde(default)]
    pub data: serde_json::Value,

    /// Origin of the event (local, remote)
    #[serde(default)]
    pub origin: EventOrigin,

    /// When the event was fired
    #[serde(default = "Utc::now")]
    pub time_fired: DateTime<Utc>,
}

impl Event {
    /// Create a new event with current timestamp
    pub fn new(event_type: impl Into<EventType>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
        }
    }
}

/// Origin of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOrigin {
    /// Event originated on the remote platform itself
    #[default]
    Local,
    /// Event was relayed to the platform from elsewhere
    Remote,
}

/// Which registry mirror changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Device,
    Area,
}

/// Payload of a known event type did not have the expected shape
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl NotificationError {
    fn malformed(event_type: &str, source: serde_json::Error) -> Self {
        Self::Malformed {
            event_type: event_type.to_string(),
            source,
        }
    }
}

/// An event record classified by its discriminator
#[derive(Debug, Clone)]
pub enum Notification {
    /// An entity got a new snapshot
    StateChanged(StateChangedData),
    /// A state_changed without a new snapshot
    EntityRemoved { entity_id: String },
    /// A service was invoked on the remote platform
    ServiceCall(ServiceCall),
    /// The device or area registry changed
    RegistryUpdated(RegistryKind),
    /// Any other event type
    Custom {
        event_type: EventType,
        data: serde_json::Value,
    },
}

impl Notification {
    /// Classify a raw event by its type
    pub fn classify(event: Event) -> Result<Self, NotificationError> {
        let Event {
            event_type, data, ..
        } = event;

        match event_type.as_str() {
            STATE_CHANGED => {
                let data: StateChangedData = serde_json::from_value(data)
                    .map_err(|source| NotificationError::malformed(STATE_CHANGED, source))?;
                if data.new_state.is_none() {
                    Ok(Self::EntityRemoved {
                        entity_id: data.entity_id,
                    })
                } else {
                    Ok(Self::StateChanged(data))
                }
            }
            CALL_SERVICE => serde_json::from_value(data)
                .map(Self::ServiceCall)
                .map_err(|source| NotificationError::malformed(CALL_SERVICE, source)),
            DEVICE_REGISTRY_UPDATED => Ok(Self::RegistryUpdated(RegistryKind::Device)),
            AREA_REGISTRY_UPDATED => Ok(Self::RegistryUpdated(RegistryKind::Area)),
            _ => Ok(Self::Custom { event_type, data }),
        }
    }

    /// Short label identifying what the notification is about, for logs
    pub fn label(&self) -> String {
        match self {
            Self::StateChanged(data) => data.entity_id.clone(),
            Self::EntityRemoved { entity_id } => entity_id.clone(),
            Self::ServiceCall(call) => call.service_id(),
            Self::RegistryUpdated(RegistryKind::Device) => DEVICE_REGISTRY_UPDATED.to_string(),
            Self::RegistryUpdated(RegistryKind::Area) => AREA_REGISTRY_UPDATED.to_string(),
            Self::Custom { event_type, .. } => event_type.to_string(),
        }
    }
}
