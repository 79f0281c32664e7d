//! Registry mirrors
//!
//! Read-only copies of the remote platform's registries:
//! - Devices (DeviceRecord)
//! - Areas (AreaRecord)
//! - Entities (EntityRegistryRecord)
//!
//! The mirrors are never patched. When the remote side reports a registry
//! change, all three lists are fetched again and swapped in as one snapshot.
//! The [`RegistryResolver`] walks entity -> device -> area over the current
//! snapshot to find the area name of an entity.

pub mod area_registry;
pub mod device_registry;
pub mod entity_registry;
pub mod resolver;

pub use area_registry::AreaRecord;
pub use device_registry::DeviceRecord;
pub use entity_registry::EntityRegistryRecord;
pub use resolver::{RegistryResolver, RegistrySnapshot, SharedRegistryResolver};
