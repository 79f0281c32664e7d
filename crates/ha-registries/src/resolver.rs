//! Registry Resolver
//!
//! Joins the entity -> device and device -> area mirrors to find the area
//! name of an entity.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::{AreaRecord, DeviceRecord, EntityRegistryRecord};

/// One consistent copy of all three registry mirrors
///
/// Records are stored as `Arc` so lookups hand out cheap clones.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// device_id -> DeviceRecord
    devices: HashMap<String, Arc<DeviceRecord>>,
    /// area_id -> AreaRecord
    areas: HashMap<String, Arc<AreaRecord>>,
    /// entity_id -> EntityRegistryRecord
    entities: HashMap<String, Arc<EntityRegistryRecord>>,
}

impl RegistrySnapshot {
    /// Build a snapshot from the lists returned by the remote platform
    ///
    /// Records with an empty id cannot be referenced and are skipped.
    pub fn new(
        devices: impl IntoIterator<Item = DeviceRecord>,
        areas: impl IntoIterator<Item = AreaRecord>,
        entities: impl IntoIterator<Item = EntityRegistryRecord>,
    ) -> Self {
        Self {
            devices: devices
                .into_iter()
                .filter(|d| !d.id.is_empty())
                .map(|d| (d.id.clone(), Arc::new(d)))
                .collect(),
            areas: areas
                .into_iter()
                .filter(|a| !a.id.is_empty())
                .map(|a| (a.id.clone(), Arc::new(a)))
                .collect(),
            entities: entities
                .into_iter()
                .filter(|e| !e.entity_id.is_empty())
                .map(|e| (e.entity_id.clone(), Arc::new(e)))
                .collect(),
        }
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceRecord>> {
        self.devices.get(device_id).cloned()
    }

    pub fn area(&self, area_id: &str) -> Option<Arc<AreaRecord>> {
        self.areas.get(area_id).cloned()
    }

    pub fn entity(&self, entity_id: &str) -> Option<Arc<EntityRegistryRecord>> {
        self.entities.get(entity_id).cloned()
    }

    /// Walk entity -> device -> area. Any missing hop yields `None`.
    pub fn area_name_for(&self, entity_id: &str) -> Option<String> {
        let entity = self.entities.get(entity_id)?;
        let device = self.devices.get(entity.device_id.as_deref()?)?;
        let area = self.areas.get(device.area_id.as_deref()?)?;
        Some(area.name.clone())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

/// Resolves entity areas against the current registry snapshot
///
/// The snapshot is swapped as a whole under a short write lock. Readers clone
/// the `Arc` and work on a consistent copy even while a refresh happens.
#[derive(Debug, Default)]
pub struct RegistryResolver {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all mirrors at once
    pub fn replace(
        &self,
        devices: impl IntoIterator<Item = DeviceRecord>,
        areas: impl IntoIterator<Item = AreaRecord>,
        entities: impl IntoIterator<Item = EntityRegistryRecord>,
    ) {
        let snapshot = Arc::new(RegistrySnapshot::new(devices, areas, entities));
        debug!(
            devices = snapshot.device_count(),
            areas = snapshot.area_count(),
            entities = snapshot.entity_count(),
            "Replacing registry snapshot"
        );
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Area name for an entity, `None` when any hop is missing
    pub fn area_for(&self, entity_id: &str) -> Option<String> {
        self.snapshot().area_name_for(entity_id)
    }
}

/// Thread-safe wrapper for RegistryResolver
pub type SharedRegistryResolver = Arc<RegistryResolver>;
