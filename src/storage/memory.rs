//! In-memory engine
//!
//! Volatile [`NvsEngine`] used by tests and by hosts without flash. Writes
//! are visible immediately, as with NVS where `set` already reaches flash;
//! `commit` is counted but has nothing to flush.
//!
//! Failures can be scripted with [`MemoryEngine::fail_init_with`] and
//! [`MemoryEngine::fail_next_open`] to drive the pool's error paths.

use super::engine::{EngineError, EngineResult, NvsEngine, OpenMode, RawHandle, Scalar, ValueType};
use super::table::{EngineLimits, EntryTable, StoredValue};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Call counters of a [`MemoryEngine`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub inits: usize,
    pub erases: usize,
    pub opens: usize,
    pub closes: usize,
    pub commits: usize,
}

#[derive(Debug, Default)]
struct Faults {
    init: VecDeque<EngineError>,
    open: VecDeque<EngineError>,
}

/// In-memory NVS engine
#[derive(Debug)]
pub struct MemoryEngine {
    table: Mutex<EntryTable>,
    faults: Mutex<Faults>,
    stats: Mutex<EngineStats>,
}

impl MemoryEngine {
    /// Create an engine with the single default partition `"nvs"`
    pub fn new() -> Self {
        Self::with_partitions(&["nvs"])
    }

    /// Create an engine declaring the given partitions
    pub fn with_partitions<S: AsRef<str>>(partitions: &[S]) -> Self {
        Self::with_limits(partitions, EngineLimits::default())
    }

    pub fn with_limits<S: AsRef<str>>(partitions: &[S], limits: EngineLimits) -> Self {
        Self {
            table: Mutex::new(EntryTable::new(partitions, limits)),
            faults: Mutex::new(Faults::default()),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    /// Make the next `init` call fail with `err`. Calls queue up.
    pub fn fail_init_with(&self, err: EngineError) {
        self.faults.lock().init.push_back(err);
    }

    /// Make the next `open` call fail with `err`. Calls queue up.
    pub fn fail_next_open(&self, err: EngineError) {
        self.faults.lock().open.push_back(err);
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.lock()
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.table.lock().open_handles()
    }

    /// Read a stored value without going through a handle
    pub fn peek(&self, partition: &str, namespace: &str, key: &str) -> Option<StoredValue> {
        self.table.lock().peek(partition, namespace, key).cloned()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NvsEngine for MemoryEngine {
    fn init(&self) -> EngineResult<()> {
        self.stats.lock().inits += 1;
        if let Some(err) = self.faults.lock().init.pop_front() {
            return Err(err);
        }
        self.table.lock().set_initialized(true);
        Ok(())
    }

    fn erase(&self) -> EngineResult<()> {
        self.stats.lock().erases += 1;
        self.table.lock().clear();
        Ok(())
    }

    fn open(&self, partition: &str, namespace: &str, mode: OpenMode) -> EngineResult<RawHandle> {
        self.stats.lock().opens += 1;
        if let Some(err) = self.faults.lock().open.pop_front() {
            return Err(err);
        }
        let handle = self.table.lock().open(partition, namespace, mode)?;
        debug!(handle, partition, namespace, %mode, "Opened memory handle");
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) {
        if self.table.lock().close(handle) {
            self.stats.lock().closes += 1;
        }
    }

    fn commit(&self, handle: RawHandle) -> EngineResult<()> {
        self.table.lock().check_handle(handle)?;
        self.stats.lock().commits += 1;
        Ok(())
    }

    fn get_scalar(&self, handle: RawHandle, key: &str, kind: ValueType) -> EngineResult<Scalar> {
        self.table.lock().get_scalar(handle, key, kind)
    }

    fn set_scalar(&self, handle: RawHandle, key: &str, value: Scalar) -> EngineResult<()> {
        self.table
            .lock()
            .set(handle, key, StoredValue::Scalar(value))
            .map(drop)
    }

    fn get_str(&self, handle: RawHandle, key: &str, out: Option<&mut [u8]>) -> EngineResult<usize> {
        self.table.lock().get_str(handle, key, out)
    }

    fn set_str(&self, handle: RawHandle, key: &str, value: &str) -> EngineResult<()> {
        self.table
            .lock()
            .set(handle, key, StoredValue::Str(value.to_string()))
            .map(drop)
    }

    fn get_blob(
        &self,
        handle: RawHandle,
        key: &str,
        out: Option<&mut [u8]>,
    ) -> EngineResult<usize> {
        self.table.lock().get_blob(handle, key, out)
    }

    fn set_blob(&self, handle: RawHandle, key: &str, value: &[u8]) -> EngineResult<()> {
        self.table
            .lock()
            .set(handle, key, StoredValue::Blob(value.to_vec()))
            .map(drop)
    }

    fn find_key(&self, handle: RawHandle, key: &str) -> EngineResult<ValueType> {
        self.table.lock().find_key(handle, key)
    }

    fn erase_key(&self, handle: RawHandle, key: &str) -> EngineResult<()> {
        self.table.lock().erase_key(handle, key).map(drop)
    }

    fn erase_all(&self, handle: RawHandle) -> EngineResult<()> {
        self.table.lock().erase_all(handle).map(drop)
    }
}
