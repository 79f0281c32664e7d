//! Registry of running automation app instances

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

type AppHandle = Arc<dyn Any + Send + Sync>;

/// Maps app instance ids to their handles
///
/// Handles are stored type-erased; [`AppRegistry::get`] hands them back as
/// the concrete type they were registered with.
#[derive(Default)]
pub struct AppRegistry {
    apps: DashMap<String, AppHandle>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an app instance, replacing any previous one with the same id
    pub fn register<T>(&self, instance_id: impl Into<String>, app: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let instance_id = instance_id.into();
        debug!(instance_id = %instance_id, "Registering app instance");
        self.apps.insert(instance_id, app);
    }

    /// Look up an app instance as `T`; `None` when missing or of another type
    pub fn get<T>(&self, instance_id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let handle = self.apps.get(instance_id)?.value().clone();
        handle.downcast::<T>().ok()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.apps.contains_key(instance_id)
    }

    pub fn remove(&self, instance_id: &str) -> bool {
        self.apps.remove(instance_id).is_some()
    }

    /// Drop every registered instance
    pub fn clear(&self) {
        self.apps.clear();
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.apps.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
