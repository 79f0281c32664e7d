//! Core types for the automation daemon
//!
//! This crate provides the fundamental types shared by the daemon crates:
//! EntityId, EntityState, the raw event record read from the remote platform,
//! its classified Notification form, and ServiceCall.

mod entity_id;
mod event;
mod service_call;
mod state;

pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventOrigin, EventType, Notification, NotificationError, RegistryKind};
pub use service_call::ServiceCall;
pub use state::{Attributes, EntityState};

/// Dynamically typed payload value (null, bool, number, string, sequence, mapping)
pub use serde_json::Value;

/// State value used when the remote platform has no value for an entity
pub const STATE_UNKNOWN: &str = "unknown";

/// State value used when an entity is unreachable
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Event types the dispatcher classifies specially
pub mod events {
    use serde::{Deserialize, Serialize};

    use crate::EntityState;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for service calls
    pub const CALL_SERVICE: &str = "call_service";

    /// Event type for device registry changes
    pub const DEVICE_REGISTRY_UPDATED: &str = "device_registry_updated";

    /// Event type for area registry changes
    pub const AREA_REGISTRY_UPDATED: &str = "area_registry_updated";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: String,
        #[serde(default)]
        pub old_state: Option<EntityState>,
        #[serde(default)]
        pub new_state: Option<EntityState>,
    }
}
