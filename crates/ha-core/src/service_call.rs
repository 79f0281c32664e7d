//! Service invocation observed on the remote platform's event stream

use serde::{Deserialize, Serialize};

/// A service invocation seen on the remote platform (a `call_service` event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// The domain the service belongs to (e.g., "light", "netdaemon")
    pub domain: String,

    /// The service name (e.g., "turn_on")
    pub service: String,

    /// Data passed to the service, `Null` when the caller sent none
    #[serde(default)]
    pub service_data: serde_json::Value,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
        }
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Case-insensitive match against a domain/service pair
    pub fn is(&self, domain: &str, service: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain) && self.service.eq_ignore_ascii_case(service)
    }

    /// Get entity_id(s) from service data
    ///
    /// Handles both the single string and the array form.
    pub fn entity_ids(&self) -> Vec<String> {
        match self.service_data.get("entity_id") {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        }
    }
}
