//! In-process memory store
//!
//! Authoritative cache of [`Memory`] records keyed by id. Each record lives in a
//! slot holding an immutable snapshot (`Arc<Memory>`) plus a per-id writer lock:
//! readers clone the current snapshot without waiting, writers for the same id
//! are serialized (the lock may be held across a model round trip) and publish a
//! new snapshot on commit.

use crate::error::{Result, UnimemError};
use crate::types::{Memory, MemoryId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

struct Slot {
    current: RwLock<Arc<Memory>>,
    writer: Arc<Mutex<()>>,
}

impl Slot {
    fn new(memory: Memory) -> Self {
        Self {
            current: RwLock::new(Arc::new(memory)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> Arc<Memory> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn publish(&self, memory: Memory) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(memory);
    }
}

/// Shared memory store
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<MemoryId, Arc<Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<MemoryId, Arc<Slot>>> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<MemoryId, Arc<Slot>>> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new memory
    ///
    /// Self-links and links to ids not currently in the store are dropped.
    /// Inserting an id that already exists is a validation error.
    pub fn insert(&self, mut memory: Memory) -> Result<()> {
        let mut slots = self.write_slots();
        if slots.contains_key(&memory.id) {
            return Err(UnimemError::Validation(format!(
                "memory {} already exists",
                memory.id
            )));
        }

        let id = memory.id.clone();
        memory
            .links
            .retain(|target| *target != id && slots.contains_key(target));

        debug!("Inserting memory {} into store", id);
        slots.insert(id, Arc::new(Slot::new(memory)));
        Ok(())
    }

    /// Snapshot of a memory, if present
    pub fn get(&self, id: &MemoryId) -> Option<Memory> {
        let slot = self.read_slots().get(id).cloned()?;
        Some(slot.snapshot().as_ref().clone())
    }

    /// Snapshots of the given ids in order, silently skipping unknown ids
    pub fn get_many(&self, ids: &[MemoryId]) -> Vec<Memory> {
        let slots = self.read_slots();
        ids.iter()
            .filter_map(|id| slots.get(id))
            .map(|slot| slot.snapshot().as_ref().clone())
            .collect()
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.read_slots().contains_key(id)
    }

    /// Keep only the ids that currently exist in the store and are not `exclude`
    pub fn retain_known<I>(&self, ids: I, exclude: &MemoryId) -> BTreeSet<MemoryId>
    where
        I: IntoIterator<Item = MemoryId>,
    {
        let slots = self.read_slots();
        ids.into_iter()
            .filter(|id| id != exclude && slots.contains_key(id))
            .collect()
    }

    /// Remove a memory, returning its last snapshot
    pub fn remove(&self, id: &MemoryId) -> Option<Memory> {
        let slot = self.write_slots().remove(id)?;
        debug!("Removed memory {} from store", id);
        Some(slot.snapshot().as_ref().clone())
    }

    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_slots().is_empty()
    }

    /// Snapshots of every memory (unordered)
    pub fn all(&self) -> Vec<Memory> {
        self.read_slots()
            .values()
            .map(|slot| slot.snapshot().as_ref().clone())
            .collect()
    }

    /// Acquire exclusive write access to one memory
    ///
    /// Returns `None` if the id is unknown. Other writers for the same id wait
    /// until the guard is dropped; readers keep seeing the last committed snapshot.
    pub async fn write(&self, id: &MemoryId) -> Option<MemoryWriteGuard> {
        let slot = self.read_slots().get(id).cloned()?;
        let lock = slot.writer.clone().lock_owned().await;
        Some(MemoryWriteGuard {
            slot,
            _lock: lock,
        })
    }

    /// Apply `f` to a memory under its writer lock and commit the result
    pub async fn update<F, R>(&self, id: &MemoryId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Memory) -> R,
    {
        let guard = self
            .write(id)
            .await
            .ok_or_else(|| UnimemError::MemoryNotFound(id.to_string()))?;
        let mut memory = guard.current();
        let result = f(&mut memory);
        guard.commit(memory);
        Ok(result)
    }

    /// Union `targets` into the memory's links
    ///
    /// Unknown ids and self-links are dropped. Returns the ids actually added.
    pub async fn add_links<I>(&self, id: &MemoryId, targets: I) -> Result<BTreeSet<MemoryId>>
    where
        I: IntoIterator<Item = MemoryId>,
    {
        let known = self.retain_known(targets, id);
        self.update(id, move |memory| {
            known
                .into_iter()
                .filter(|target| memory.add_link(target.clone()))
                .collect()
        })
        .await
    }
}

/// Exclusive writer access to one memory
pub struct MemoryWriteGuard {
    slot: Arc<Slot>,
    _lock: OwnedMutexGuard<()>,
}

impl MemoryWriteGuard {
    /// Copy of the last committed version
    pub fn current(&self) -> Memory {
        self.slot.snapshot().as_ref().clone()
    }

    /// Publish a new version. Identity fields are not allowed to change and any
    /// self-link is dropped.
    pub fn commit(&self, mut memory: Memory) {
        let previous = self.slot.snapshot();
        memory.id = previous.id.clone();
        memory.content = previous.content.clone();
        memory.timestamp = previous.timestamp;
        let own_id = memory.id.clone();
        memory.links.remove(&own_id);
        self.slot.publish(memory);
    }
}
