//! Area records (rooms, zones) as listed by the remote platform

use serde::{Deserialize, Serialize};

/// A registered area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    /// Area id, sent as `area_id` by the remote platform
    #[serde(alias = "area_id")]
    pub id: String,

    /// Area name (e.g., "Living Room")
    pub name: String,

    /// Area picture URL/path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl AreaRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            picture: None,
        }
    }
}
