//! Slot management for the handle pool
//!
//! A slot binds one open engine handle to an identity. The handle, mode and
//! generation live behind the slot's own guard; the identity and reference
//! count are owned by the manager table (see `manager.rs`).

use crate::error::{Error, Result};
use crate::storage::{OpenMode, RawHandle};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable reference to a slot: arena index plus the generation it was bound in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    index: usize,
    generation: u64,
}

impl SlotId {
    pub(crate) fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(index={}, generation={})", self.index, self.generation)
    }
}

/// Snapshot of a bound slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: SlotId,
    pub partition: String,
    pub namespace: String,
    pub mode: OpenMode,
    pub refcount: usize,
    pub handle: RawHandle,
}

/// State guarded by the slot lock
#[derive(Debug)]
pub(crate) struct SlotCore {
    handle: Option<RawHandle>,
    mode: OpenMode,
    generation: u64,
    partition: String,
    namespace: String,
}

impl SlotCore {
    pub(crate) fn handle(&self) -> Option<RawHandle> {
        self.handle
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bind(&mut self, handle: RawHandle, mode: OpenMode, partition: &str, namespace: &str) {
        self.handle = Some(handle);
        self.mode = mode;
        self.partition = partition.to_string();
        self.namespace = namespace.to_string();
    }

    /// Unbind and advance the generation, returning the handle that was bound
    pub(crate) fn reset(&mut self) -> Option<RawHandle> {
        let handle = self.handle.take();
        self.mode = OpenMode::ReadOnly;
        self.partition.clear();
        self.namespace.clear();
        self.generation += 1;
        handle
    }
}

/// A pooled engine handle with its exclusive guard
#[derive(Debug)]
pub struct Slot {
    index: usize,
    /// Copy of `core.generation`, readable without the guard
    generation: AtomicU64,
    core: Mutex<SlotCore>,
}

impl Slot {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            generation: AtomicU64::new(0),
            core: Mutex::new(SlotCore {
                handle: None,
                mode: OpenMode::ReadOnly,
                generation: 0,
                partition: String::new(),
                namespace: String::new(),
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether an operation currently holds the slot guard
    pub fn is_busy(&self) -> bool {
        self.core.is_locked()
    }

    /// Blocking acquisition, for manager-driven close and teardown
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotCore> {
        self.core.lock()
    }

    /// Unbind through a held guard and publish the new generation
    pub(crate) fn reset(&self, core: &mut SlotCore) -> Option<RawHandle> {
        let handle = core.reset();
        self.generation.store(core.generation, Ordering::Release);
        handle
    }

    /// Non-blocking acquisition for data operations.
    ///
    /// Fails with [`Error::InstanceInvalid`] when `id` belongs to an earlier
    /// binding, even while the slot's current owner holds the guard, and
    /// with [`Error::Busy`] when another operation holds it.
    pub fn try_access(&self, id: SlotId) -> Result<SlotAccess<'_>> {
        if self.generation.load(Ordering::Acquire) != id.generation {
            return Err(stale(id));
        }

        let core = self
            .core
            .try_lock()
            .ok_or_else(|| Error::Busy(format!("slot {} is in use", self.index)))?;

        let (bound, generation) = (core.handle, core.generation);
        match bound {
            Some(handle) if generation == id.generation => Ok(SlotAccess { core, handle }),
            _ => Err(stale(id)),
        }
    }
}

fn stale(id: SlotId) -> Error {
    Error::InstanceInvalid(format!("{} is no longer bound to an open handle", id))
}

/// Exclusive access to a bound slot; the guard is released on drop
pub struct SlotAccess<'a> {
    core: MutexGuard<'a, SlotCore>,
    handle: RawHandle,
}

impl SlotAccess<'_> {
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn mode(&self) -> OpenMode {
        self.core.mode
    }

    pub fn partition(&self) -> &str {
        &self.core.partition
    }

    pub fn namespace(&self) -> &str {
        &self.core.namespace
    }
}

impl fmt::Debug for SlotAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotAccess")
            .field("handle", &self.handle)
            .field("mode", &self.core.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_display() {
        let id = SlotId::new(3, 7);
        assert_eq!(id.index(), 3);
        assert_eq!(id.generation(), 7);
        assert_eq!(id.to_string(), "Slot(index=3, generation=7)");
    }

    #[test]
    fn test_slot_lifecycle() {
        let slot = Slot::new(0);
        let id = SlotId::new(0, 0);
        assert!(matches!(slot.try_access(id), Err(Error::InstanceInvalid(_))));

        slot.lock().bind(42, OpenMode::ReadWrite, "nvs", "app");
        {
            let access = slot.try_access(id).unwrap();
            assert_eq!(access.handle(), 42);
            assert_eq!(access.mode(), OpenMode::ReadWrite);
            assert_eq!(access.namespace(), "app");
            assert!(slot.is_busy());
        }
        assert!(!slot.is_busy());

        assert_eq!(slot.reset(&mut slot.lock()), Some(42));
        assert_eq!(slot.lock().generation(), 1);
        // The old id is stale even after the slot is bound again
        slot.lock().bind(43, OpenMode::ReadOnly, "nvs", "app");
        assert!(matches!(slot.try_access(id), Err(Error::InstanceInvalid(_))));
        assert!(slot.try_access(SlotId::new(0, 1)).is_ok());
    }

    #[test]
    fn test_contention_is_busy() {
        let slot = Slot::new(1);
        slot.lock().bind(1, OpenMode::ReadOnly, "nvs", "app");
        let id = SlotId::new(1, 0);

        let held = slot.try_access(id).unwrap();
        assert!(matches!(slot.try_access(id), Err(Error::Busy(_))));
        drop(held);
        assert!(slot.try_access(id).is_ok());
    }

    #[test]
    fn test_stale_id_is_invalid_while_new_owner_busy() {
        let slot = Slot::new(0);
        let old = SlotId::new(0, 0);
        slot.lock().bind(1, OpenMode::ReadWrite, "nvs", "a");
        slot.reset(&mut slot.lock());
        slot.lock().bind(2, OpenMode::ReadWrite, "nvs", "b");

        let current = SlotId::new(0, 1);
        let held = slot.try_access(current).unwrap();
        assert!(matches!(slot.try_access(old), Err(Error::InstanceInvalid(_))));
        assert!(matches!(slot.try_access(current), Err(Error::Busy(_))));
        drop(held);
    }
}
