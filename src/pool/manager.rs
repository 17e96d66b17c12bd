//! Pool manager
//!
//! # Architecture
//!
//! ```text
//! NvsManager
//!   ├─→ table (manager guard)        ├─→ slots (one guard each)
//!   │     [0] nvs:wifi  RW  ref=2    │     [0] handle=7  gen=0
//!   │     [1] (free)                 │     [1] (unbound) gen=3
//!   │     [2] nvs:app   RO  ref=1    │     [2] handle=9  gen=1
//!   └─→ engine (Arc<dyn NvsEngine>)
//! ```
//!
//! Identity (partition, namespace) and reference counts live in the table;
//! handle, mode and generation live behind each slot's guard. Locks are only
//! ever taken manager → slot. Data operations take the slot guard without
//! blocking; close and teardown take it blocking so commit and release
//! always happen.

use super::slot::{Slot, SlotId, SlotInfo};
use crate::config::NvsConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::storage::{NvsEngine, OpenMode, RawHandle};
use crate::validate::{self, IdentifierKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Identity {
    partition: String,
    namespace: String,
    mode: OpenMode,
}

/// Table row for one slot; `identity == None` means the slot is free
#[derive(Debug, Default)]
struct SlotEntry {
    identity: Option<Identity>,
    refcount: usize,
    generation: u64,
    handle: RawHandle,
}

impl SlotEntry {
    fn matches(&self, partition: &str, namespace: &str) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|id| id.partition == partition && id.namespace == namespace)
    }

    fn info(&self, index: usize) -> Option<SlotInfo> {
        let identity = self.identity.as_ref()?;
        Some(SlotInfo {
            id: SlotId::new(index, self.generation),
            partition: identity.partition.clone(),
            namespace: identity.namespace.clone(),
            mode: identity.mode,
            refcount: self.refcount,
            handle: self.handle,
        })
    }

    fn clear(&mut self, generation: u64) {
        self.identity = None;
        self.refcount = 0;
        self.generation = generation;
        self.handle = 0;
    }
}

/// Run engine init, erasing and retrying exactly once on a recoverable failure
pub(crate) fn initialize_engine(engine: &dyn NvsEngine, config: &NvsConfig) -> Result<()> {
    match engine.init() {
        Ok(()) => {}
        Err(err) if config.erase_on(&err) => {
            warn!(error = %err, "Engine init failed, erasing partitions and retrying once");
            engine.erase().map_err(|e| {
                error!(error = %e, "Erase after failed init did not complete");
                Error::from(e)
            })?;
            engine.init().map_err(|e| {
                error!(error = %e, "Engine init failed again after erase");
                Error::from(e)
            })?;
            warn!(reason = %err, "Partitions erased and engine reinitialized");
        }
        Err(err) => {
            error!(error = %err, "Engine initialization failed");
            return Err(err.into());
        }
    }
    info!("NVS engine initialized");
    Ok(())
}

/// Fixed-capacity pool of shared engine handles
pub struct NvsManager {
    engine: Arc<dyn NvsEngine>,
    config: NvsConfig,
    table: Mutex<Vec<SlotEntry>>,
    slots: Box<[Slot]>,
}

impl NvsManager {
    /// Validate `config`, initialize the engine and build an empty pool.
    ///
    /// When init reports a condition enabled in
    /// [`NvsConfig::erase_on`], the engine is erased and initialized once
    /// more; any other failure means no manager is produced.
    pub fn new(engine: Arc<dyn NvsEngine>, config: NvsConfig) -> Result<Self> {
        config.validate()?;
        initialize_engine(engine.as_ref(), &config)?;
        Ok(Self::with_initialized_engine(engine, config))
    }

    /// Build a pool over an engine whose init already succeeded
    pub(crate) fn with_initialized_engine(engine: Arc<dyn NvsEngine>, config: NvsConfig) -> Self {
        let capacity = config.slot_capacity;
        let table = (0..capacity).map(|_| SlotEntry::default()).collect();
        let slots = (0..capacity).map(Slot::new).collect();

        info!(capacity, partition = %config.default_partition, "NVS pool ready");
        metrics::set_open_slots(0);
        Self {
            engine,
            config,
            table: Mutex::new(table),
            slots,
        }
    }

    /// Resolve a slot for `(partition, namespace)`, opening a handle if needed.
    ///
    /// An existing read-write slot also satisfies read-only requests. A
    /// read-write request against a read-only slot fails with
    /// [`Error::ModeConflict`] rather than reopening.
    pub fn open(&self, partition: &str, namespace: &str, mode: OpenMode) -> Result<SlotLease<'_>> {
        let partition =
            validate::identifier(IdentifierKind::Partition, partition, self.config.max_partition_len)?;
        let namespace =
            validate::identifier(IdentifierKind::Namespace, namespace, self.config.max_namespace_len)?;

        let mut table = self.table.lock();

        if let Some(index) = table.iter().position(|e| e.matches(&partition, &namespace)) {
            let entry = &mut table[index];
            let existing = entry.identity.as_ref().map(|id| id.mode);
            if existing == Some(OpenMode::ReadWrite) || mode == OpenMode::ReadOnly {
                entry.refcount += 1;
                debug!(
                    index,
                    partition = %partition,
                    namespace = %namespace,
                    refcount = entry.refcount,
                    "Reusing open slot"
                );
                metrics::record_open("reused");
                return Ok(SlotLease::new(self, SlotId::new(index, entry.generation)));
            }

            error!(
                partition = %partition,
                namespace = %namespace,
                requested = %mode,
                "Slot is open read-only; mode escalation is not supported"
            );
            metrics::record_open("mode_conflict");
            return Err(Error::ModeConflict {
                partition: partition.into_owned(),
                namespace: namespace.into_owned(),
            });
        }

        let Some(index) = table.iter().position(|e| e.identity.is_none()) else {
            error!(
                capacity = self.capacity(),
                "All slots in use; raise slot_capacity"
            );
            metrics::record_open("exhausted");
            return Err(Error::PoolExhausted(self.capacity()));
        };

        let handle = match self.engine.open(&partition, &namespace, mode) {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    partition = %partition,
                    namespace = %namespace,
                    error = %err,
                    "Engine failed to open namespace"
                );
                metrics::record_open("engine_error");
                return Err(err.into());
            }
        };

        let generation = {
            let mut core = self.slots[index].lock();
            core.bind(handle, mode, &partition, &namespace);
            core.generation()
        };
        table[index] = SlotEntry {
            identity: Some(Identity {
                partition: partition.to_string(),
                namespace: namespace.to_string(),
                mode,
            }),
            refcount: 1,
            generation,
            handle,
        };

        metrics::record_open("opened");
        metrics::set_open_slots(table.iter().filter(|e| e.identity.is_some()).count());
        info!(
            index,
            handle,
            partition = %partition,
            namespace = %namespace,
            %mode,
            "Opened slot"
        );
        Ok(SlotLease::new(self, SlotId::new(index, generation)))
    }

    /// [`NvsManager::open`] in the configured default partition
    pub fn open_default(&self, namespace: &str, mode: OpenMode) -> Result<SlotLease<'_>> {
        self.open(&self.config.default_partition, namespace, mode)
    }

    /// Drop one reference; the last one commits, closes and frees the slot.
    ///
    /// Stale ids (from before a teardown or reuse) are ignored.
    pub(crate) fn release(&self, id: SlotId) {
        let Some(slot) = self.slots.get(id.index()) else {
            error!(%id, "Release of out-of-range slot ignored");
            return;
        };

        let mut table = self.table.lock();
        let entry = &mut table[id.index()];
        if entry.identity.is_none() || entry.generation != id.generation() {
            debug!(%id, "Release of stale slot ignored");
            return;
        }
        if entry.refcount == 0 {
            return;
        }

        entry.refcount -= 1;
        if entry.refcount > 0 {
            debug!(%id, refcount = entry.refcount, "Released slot reference");
            return;
        }

        let identity = entry.identity.take();
        let mut core = slot.lock();
        if let Some(handle) = slot.reset(&mut core) {
            self.commit_and_close(handle, identity.as_ref());
        }
        entry.clear(core.generation());
        drop(core);

        metrics::set_open_slots(table.iter().filter(|e| e.identity.is_some()).count());
    }

    fn commit_and_close(&self, handle: RawHandle, identity: Option<&Identity>) {
        let (partition, namespace) = identity
            .map(|id| (id.partition.as_str(), id.namespace.as_str()))
            .unwrap_or_default();

        if let Err(err) = self.engine.commit(handle) {
            error!(handle, partition, namespace, error = %err, "Commit before close failed");
            metrics::record_engine_error("commit");
        }
        self.engine.close(handle);
        info!(handle, partition, namespace, "Closed slot");
    }

    /// Bounds-checked slot lookup
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Snapshot of the slot at `index`, `None` if out of range or free
    pub fn slot_info(&self, index: usize) -> Option<SlotInfo> {
        self.table.lock().get(index)?.info(index)
    }

    /// Find the slot bound to `(partition, namespace)`, compared as stored
    pub fn lookup(&self, partition: &str, namespace: &str) -> Option<SlotInfo> {
        let table = self.table.lock();
        let index = table.iter().position(|e| e.matches(partition, namespace))?;
        table[index].info(index)
    }

    /// Number of slots bound to an open handle
    pub fn open_slots(&self) -> usize {
        self.table
            .lock()
            .iter()
            .filter(|e| e.identity.is_some())
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &NvsConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn NvsEngine {
        self.engine.as_ref()
    }

    /// Commit and close every open handle regardless of reference counts.
    ///
    /// Leases and accessors bound before the call become permanently
    /// invalid. Returns the number of handles closed.
    pub fn shutdown(&self) -> usize {
        let mut table = self.table.lock();
        let mut closed = 0;

        for (entry, slot) in table.iter_mut().zip(self.slots.iter()) {
            let mut core = slot.lock();
            if core.handle().is_none() {
                continue;
            }
            if let Some(handle) = slot.reset(&mut core) {
                self.commit_and_close(handle, entry.identity.as_ref());
                closed += 1;
            }
            entry.clear(core.generation());
        }

        if closed > 0 {
            info!(closed, "NVS pool shut down");
        }
        metrics::set_open_slots(0);
        closed
    }
}

impl Drop for NvsManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for NvsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvsManager")
            .field("config", &self.config)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A counted reference to a pool slot.
///
/// Dropping the lease releases the reference; the last lease on a slot
/// commits and closes its engine handle.
pub struct SlotLease<'m> {
    manager: &'m NvsManager,
    id: SlotId,
}

impl<'m> SlotLease<'m> {
    fn new(manager: &'m NvsManager, id: SlotId) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn manager(&self) -> &'m NvsManager {
        self.manager
    }

    pub fn slot(&self) -> Option<&'m Slot> {
        self.manager.slot(self.id.index())
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}

impl fmt::Debug for SlotLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EngineError, MemoryEngine};

    fn manager_with(engine: &Arc<MemoryEngine>, capacity: usize) -> NvsManager {
        let config = NvsConfig::default().with_slot_capacity(capacity);
        NvsManager::new(engine.clone(), config).unwrap()
    }

    #[test]
    fn test_open_and_release() {
        let engine = Arc::new(MemoryEngine::new());
        let manager = manager_with(&engine, 2);

        let lease = manager.open("nvs", "app", OpenMode::ReadWrite).unwrap();
        let info = manager.slot_info(lease.id().index()).unwrap();
        assert_eq!(info.refcount, 1);
        assert_eq!(info.mode, OpenMode::ReadWrite);
        assert_eq!(engine.open_handles(), 1);

        drop(lease);
        assert_eq!(manager.open_slots(), 0);
        assert_eq!(engine.open_handles(), 0);
        assert_eq!(engine.stats().commits, 1);
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let engine = Arc::new(MemoryEngine::new());
        let manager = manager_with(&engine, 1);

        let first = manager.open("nvs", "a", OpenMode::ReadWrite).unwrap();
        let stale = first.id();
        drop(first);

        let second = manager.open("nvs", "b", OpenMode::ReadWrite).unwrap();
        assert_eq!(second.id().index(), stale.index());
        assert_ne!(second.id().generation(), stale.generation());

        manager.release(stale);
        assert_eq!(manager.slot_info(0).unwrap().refcount, 1);
        drop(second);
    }

    #[test]
    fn test_out_of_range_lookup() {
        let engine = Arc::new(MemoryEngine::new());
        let manager = manager_with(&engine, 2);
        assert!(manager.slot(2).is_none());
        assert!(manager.slot_info(5).is_none());
        assert!(manager.slot(1).is_some());
        manager.release(SlotId::new(9, 0));
    }

    #[test]
    fn test_engine_open_failure_leaves_slot_free() {
        let engine = Arc::new(MemoryEngine::new());
        let manager = manager_with(&engine, 1);

        engine.fail_next_open(EngineError::NotEnoughSpace);
        let err = manager.open("nvs", "app", OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::NotEnoughSpace)));
        assert_eq!(manager.open_slots(), 0);
        assert!(manager.open("nvs", "app", OpenMode::ReadWrite).is_ok());
    }

    #[test]
    fn test_init_erases_once_on_no_free_pages() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_init_with(EngineError::NoFreePages);
        let _manager = manager_with(&engine, 1);

        let stats = engine.stats();
        assert_eq!(stats.inits, 2);
        assert_eq!(stats.erases, 1);
    }

    #[test]
    fn test_init_failure_after_erase_is_fatal() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_init_with(EngineError::NewVersionFound);
        engine.fail_init_with(EngineError::NoFreePages);

        let err = NvsManager::new(engine.clone(), NvsConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::NoFreePages)));
        assert_eq!(engine.stats().erases, 1);
    }

    #[test]
    fn test_unrecoverable_init_failure() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_init_with(EngineError::Io("flash offline".to_string()));

        let err = NvsManager::new(engine.clone(), NvsConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::Io(_))));
        assert_eq!(engine.stats().erases, 0);
    }

    #[test]
    fn test_disabled_erase_policy() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_init_with(EngineError::NoFreePages);
        let config = NvsConfig {
            erase_on_no_free_pages: false,
            ..NvsConfig::default()
        };

        assert!(NvsManager::new(engine.clone(), config).is_err());
        assert_eq!(engine.stats().erases, 0);
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        let engine = Arc::new(MemoryEngine::new());
        let manager = manager_with(&engine, 1);
        assert!(matches!(
            manager.open("", "app", OpenMode::ReadOnly),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.open_default("", OpenMode::ReadOnly),
            Err(Error::InvalidArgument(_))
        ));
    }
}
