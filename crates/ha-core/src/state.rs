//! EntityState: the last known snapshot of a remote entity

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{STATE_UNAVAILABLE, STATE_UNKNOWN};

/// Attribute mapping of an entity, in the order the remote platform sent it
pub type Attributes = IndexMap<String, serde_json::Value>;

/// Snapshot of an entity's state as mirrored from the remote platform
///
/// Snapshots are never patched in place. Every update from the remote side
/// produces a new value that replaces the previous one wholesale, and the
/// `area` is filled in locally from the registry mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    /// The entity this state belongs to (`domain.object_id`)
    pub entity_id: String,

    /// The state value (e.g., "on", "off", "23.5", "unavailable")
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: Attributes,

    /// When the state value last changed
    #[serde(default = "Utc::now")]
    pub last_changed: DateTime<Utc>,

    /// When the state or its attributes were last updated
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,

    /// Name of the area the entity's device is placed in, if resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl EntityState {
    /// Create a new snapshot stamped with the current time
    pub fn new(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            area: None,
        }
    }

    /// Replace the resolved area
    pub fn with_area(mut self, area: Option<String>) -> Self {
        self.area = area;
        self
    }

    /// Domain part of the entity id, if it has one
    pub fn domain(&self) -> Option<&str> {
        self.entity_id.split_once('.').map(|(domain, _)| domain)
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Get an attribute value by key, converted to `T`
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for EntityState {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
            && self.area == other.area
    }
}
