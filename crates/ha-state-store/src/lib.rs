//! Entity state mirror for the automation daemon
//!
//! This crate provides the StateStore, which keeps the last known snapshot
//! of every entity on the remote platform. Every write resolves the entity's
//! area against the registry mirrors before the snapshot is stored.

use dashmap::DashMap;
use ha_core::EntityState;
use ha_registries::RegistryResolver;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// The state store tracks the last known state of all entities
///
/// The StateStore is responsible for:
/// - Storing the latest snapshot per entity id (last write wins)
/// - Attaching the resolved area to every snapshot it stores
/// - Replacing the whole mirror on a full resync without transient gaps
/// - Providing thread-safe concurrent access to states
pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, Slot>,
    /// Bumped when a resync begins
    generation: AtomicU64,
    /// Registry mirrors used to resolve areas
    resolver: Arc<RegistryResolver>,
}

/// A stored snapshot and the resync generation it was written in
struct Slot {
    state: Arc<EntityState>,
    generation: u64,
}

/// Marks the start of a full resync; see [`StateStore::begin_resync`]
#[derive(Debug)]
#[must_use = "finish the resync with StateStore::finish_resync"]
pub struct ResyncTicket {
    generation: u64,
}

impl StateStore {
    /// Create an empty store resolving areas through `resolver`
    pub fn new(resolver: Arc<RegistryResolver>) -> Self {
        Self {
            states: DashMap::new(),
            generation: AtomicU64::new(0),
            resolver,
        }
    }

    /// Store a single snapshot, replacing any previous one
    ///
    /// Returns the stored snapshot with its area resolved.
    #[instrument(skip(self, state), fields(entity_id = %state.entity_id))]
    pub fn upsert(&self, state: EntityState) -> Arc<EntityState> {
        let area = self.resolver.area_for(&state.entity_id);
        let state = Arc::new(state.with_area(area));

        trace!(state = %state.state, area = ?state.area, "Storing entity state");
        let slot = Slot {
            state: Arc::clone(&state),
            generation: self.generation.load(Ordering::SeqCst),
        };
        self.states.insert(state.entity_id.clone(), slot);
        state
    }

    /// Replace the whole mirror with `states`
    ///
    /// Same as [`begin_resync`](Self::begin_resync) immediately followed by
    /// [`finish_resync`](Self::finish_resync).
    pub fn replace_all(&self, states: impl IntoIterator<Item = EntityState>) {
        let ticket = self.begin_resync();
        self.finish_resync(ticket, states);
    }

    /// Start a full resync, before the snapshot list is fetched
    ///
    /// Ids upserted after this call survive the matching
    /// [`finish_resync`](Self::finish_resync) even when the fetched list
    /// does not contain them.
    pub fn begin_resync(&self) -> ResyncTicket {
        ResyncTicket {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Write the fetched `states` and drop ids that are gone
    ///
    /// New snapshots are written first and stale ids are removed afterwards,
    /// so an id present before and after the resync is never missing. An id
    /// is stale when it is missing from `states` and was last written before
    /// `ticket` was taken.
    #[instrument(skip_all, fields(generation = ticket.generation))]
    pub fn finish_resync(
        &self,
        ticket: ResyncTicket,
        states: impl IntoIterator<Item = EntityState>,
    ) {
        let mut fresh = HashSet::new();
        for state in states {
            fresh.insert(state.entity_id.clone());
            let area = self.resolver.area_for(&state.entity_id);
            let slot = Slot {
                state: Arc::new(state.with_area(area)),
                generation: ticket.generation,
            };
            self.states.insert(slot.state.entity_id.clone(), slot);
        }
        self.states.retain(|entity_id, slot| {
            fresh.contains(entity_id) || slot.generation >= ticket.generation
        });

        debug!(count = self.states.len(), "Replaced all entity states");
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.states.get(entity_id).map(|s| Arc::clone(&s.state))
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.state.clone())
    }

    /// Check if an entity is in a specific state
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Get all states for a domain
    pub fn domain_states(&self, domain: &str) -> Vec<Arc<EntityState>> {
        self.select(|state| state.domain() == Some(domain))
    }

    /// Get all states matching a predicate
    pub fn select(&self, predicate: impl Fn(&EntityState) -> bool) -> Vec<Arc<EntityState>> {
        self.states
            .iter()
            .filter(|r| predicate(&r.state))
            .map(|r| Arc::clone(&r.state))
            .collect()
    }

    /// Get all states
    pub fn all(&self) -> Vec<Arc<EntityState>> {
        self.states.iter().map(|r| Arc::clone(&r.state)).collect()
    }

    /// Get all entity IDs
    pub fn all_entity_ids(&self) -> Vec<String> {
        self.states.iter().map(|r| r.key().clone()).collect()
    }

    /// Get the total number of entities
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Thread-safe wrapper for StateStore
pub type SharedStateStore = Arc<StateStore>;
