//! Write-through cache over the app data repository

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use crate::error::{DaemonError, DaemonResult};

/// Persistence for app data, keyed by id
#[async_trait]
pub trait DataRepository: Send + Sync {
    async fn save(&self, id: &str, data: Value) -> anyhow::Result<()>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<Value>>;
}

/// Shared handle to a data repository
pub type SharedDataRepository = Arc<dyn DataRepository>;

/// Cache in front of an optional repository
///
/// Every operation fails with [`DaemonError::MissingCollaborator`] when no
/// repository was configured.
#[derive(Default)]
pub struct DataCache {
    repository: Option<SharedDataRepository>,
    cache: DashMap<String, Value>,
}

impl DataCache {
    pub fn new(repository: Option<SharedDataRepository>) -> Self {
        Self {
            repository,
            cache: DashMap::new(),
        }
    }

    fn repository(&self) -> DaemonResult<&SharedDataRepository> {
        self.repository
            .as_ref()
            .ok_or(DaemonError::MissingCollaborator("data repository"))
    }

    /// Store `data` in the cache, then in the repository
    pub async fn save<T>(&self, id: &str, data: &T) -> DaemonResult<()>
    where
        T: Serialize + ?Sized,
    {
        let repository = self.repository()?;
        let value = serde_json::to_value(data)?;
        self.cache.insert(id.to_string(), value.clone());
        trace!(id, "Saving app data");
        repository.save(id, value).await.map_err(DaemonError::Repository)
    }

    /// Read from the cache, falling back to the repository
    pub async fn get<T>(&self, id: &str) -> DaemonResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let repository = self.repository()?;
        let cached = self.cache.get(id).map(|entry| entry.value().clone());
        let value = match cached {
            Some(value) => value,
            None => match repository.get(id).await.map_err(DaemonError::Repository)? {
                Some(value) => {
                    self.cache.insert(id.to_string(), value.clone());
                    value
                }
                None => return Ok(None),
            },
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
