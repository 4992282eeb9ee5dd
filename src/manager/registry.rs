//! Instance registry.
//!
//! # Responsibilities
//! - Map instance names to their live slot
//! - Reject a start for a name that is still present
//! - Remove a slot only if it is the exact one the caller tore down

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::instance::Status;
use crate::manager::instance::Running;
use crate::manager::ManagerError;

/// Observable state of one run. Guarded by a short, never-awaited lock.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub status: Option<Status>,
    pub last_error: Option<String>,
    pub port: Option<u16>,
}

/// Everything the registry holds for one instance run.
pub struct InstanceSlot {
    name: String,
    run_id: Uuid,
    state: Mutex<SlotState>,
    /// Cancelled when a stop begins; aborts an in-flight start.
    pub(crate) cancel: CancellationToken,
    /// Owned resources. Held by start until launch completes, taken by stop.
    pub(crate) resources: tokio::sync::Mutex<Option<Running>>,
}

impl InstanceSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            run_id: Uuid::new_v4(),
            state: Mutex::new(SlotState::default()),
            cancel: CancellationToken::new(),
            resources: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique per start; distinguishes a restarted name from its previous run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Option<Status> {
        self.state().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn port(&self) -> Option<u16> {
        self.state().port
    }

    pub(crate) fn set_port(&self, port: u16) {
        self.state().port = Some(port);
    }
}

impl std::fmt::Debug for InstanceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSlot")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

/// Name → slot map. Every operation is a single atomic map access.
#[derive(Debug, Default)]
pub struct Registry {
    slots: DashMap<String, Arc<InstanceSlot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh slot, or fail if the name is still registered.
    pub fn insert_new(&self, name: &str) -> Result<Arc<InstanceSlot>, ManagerError> {
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ManagerError::AlreadyRunning(name.to_string())),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(InstanceSlot::new(name));
                vacant.insert(Arc::clone(&slot));
                Ok(slot)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<InstanceSlot>> {
        self.slots.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `slot` is still the registered slot for its name.
    pub fn contains(&self, slot: &Arc<InstanceSlot>) -> bool {
        self.slots
            .get(slot.name())
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    /// Remove `slot`, leaving any newer slot under the same name alone.
    pub fn remove(&self, slot: &Arc<InstanceSlot>) -> bool {
        self.slots
            .remove_if(slot.name(), |_, current| Arc::ptr_eq(current, slot))
            .is_some()
    }

    /// Snapshot of the registered names.
    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
