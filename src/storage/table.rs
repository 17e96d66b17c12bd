//! In-memory entry table shared by the bundled engines
//!
//! # Architecture
//!
//! ```text
//! EntryTable
//!   ├─→ partitions: "nvs"     → namespaces: "wifi" → { ssid: Str, retries: U8 }
//!   │                                       "app"  → { boot_count: U32 }
//!   ├─→ partitions: "factory" → namespaces: ...
//!   └─→ handles: 1 → (nvs, wifi, ReadWrite), 2 → (nvs, app, ReadOnly)
//! ```
//!
//! The table only knows key-level semantics (limits, types, modes). Whether
//! the data survives a restart is the owning engine's business.

use super::engine::{EngineError, EngineResult, OpenMode, RawHandle, Scalar, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A value as kept by the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Scalar(Scalar),
    Str(String),
    Blob(Vec<u8>),
}

impl StoredValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            StoredValue::Scalar(scalar) => scalar.value_type(),
            StoredValue::Str(_) => ValueType::Str,
            StoredValue::Blob(_) => ValueType::Blob,
        }
    }
}

/// Keys of one namespace
pub type Namespace = BTreeMap<String, StoredValue>;

/// Limits enforced by the engine itself, independent of the pool's truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Longest accepted key, in bytes
    pub max_key_len: usize,
    /// Longest accepted namespace name, in bytes
    pub max_namespace_len: usize,
    /// Longest string, in bytes including the NUL terminator
    pub max_str_len: usize,
    /// Longest blob, in bytes
    pub max_blob_len: usize,
    /// Entries a single partition can hold across all namespaces
    pub max_entries: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_key_len: 15,
            max_namespace_len: 15,
            max_str_len: 4000,
            max_blob_len: 508_000,
            max_entries: 4096,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenEntry {
    partition: String,
    namespace: String,
    mode: OpenMode,
}

/// Partition/namespace/key map plus the table of open handles
#[derive(Debug)]
pub(crate) struct EntryTable {
    limits: EngineLimits,
    initialized: bool,
    partitions: BTreeMap<String, BTreeMap<String, Namespace>>,
    handles: HashMap<RawHandle, OpenEntry>,
    next_handle: RawHandle,
}

impl EntryTable {
    pub(crate) fn new<S: AsRef<str>>(partitions: &[S], limits: EngineLimits) -> Self {
        Self {
            limits,
            initialized: false,
            partitions: partitions
                .iter()
                .map(|name| (name.as_ref().to_string(), BTreeMap::new()))
                .collect(),
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    pub(crate) fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    pub(crate) fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    /// Drop all data; declared partitions and open handles stay.
    pub(crate) fn clear(&mut self) {
        for namespaces in self.partitions.values_mut() {
            namespaces.clear();
        }
    }

    pub(crate) fn load_partition(&mut self, name: &str, namespaces: BTreeMap<String, Namespace>) {
        self.partitions.insert(name.to_string(), namespaces);
    }

    pub(crate) fn partition(&self, name: &str) -> Option<&BTreeMap<String, Namespace>> {
        self.partitions.get(name)
    }

    pub(crate) fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Partition an open handle belongs to
    pub(crate) fn handle_partition(&self, handle: RawHandle) -> EngineResult<&str> {
        self.handles
            .get(&handle)
            .map(|entry| entry.partition.as_str())
            .ok_or(EngineError::InvalidHandle)
    }

    pub(crate) fn peek(&self, partition: &str, namespace: &str, key: &str) -> Option<&StoredValue> {
        self.partitions.get(partition)?.get(namespace)?.get(key)
    }

    pub(crate) fn open(
        &mut self,
        partition: &str,
        namespace: &str,
        mode: OpenMode,
    ) -> EngineResult<RawHandle> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        if namespace.is_empty() || namespace.len() > self.limits.max_namespace_len {
            return Err(EngineError::InvalidName);
        }
        let namespaces = self
            .partitions
            .get_mut(partition)
            .ok_or(EngineError::PartitionNotFound)?;

        if !namespaces.contains_key(namespace) {
            match mode {
                OpenMode::ReadOnly => return Err(EngineError::NotFound),
                OpenMode::ReadWrite => {
                    namespaces.insert(namespace.to_string(), Namespace::new());
                }
            }
        }

        let handle = self.next_handle;
        self.next_handle = self.next_handle.checked_add(1).unwrap_or(1);
        self.handles.insert(
            handle,
            OpenEntry {
                partition: partition.to_string(),
                namespace: namespace.to_string(),
                mode,
            },
        );
        Ok(handle)
    }

    pub(crate) fn close(&mut self, handle: RawHandle) -> bool {
        self.handles.remove(&handle).is_some()
    }

    pub(crate) fn check_handle(&self, handle: RawHandle) -> EngineResult<()> {
        self.entry(handle).map(|_| ())
    }

    pub(crate) fn get(&self, handle: RawHandle, key: &str) -> EngineResult<&StoredValue> {
        self.check_key(key)?;
        let entry = self.entry(handle)?;
        self.partitions
            .get(&entry.partition)
            .and_then(|namespaces| namespaces.get(&entry.namespace))
            .and_then(|namespace| namespace.get(key))
            .ok_or(EngineError::NotFound)
    }

    pub(crate) fn get_scalar(
        &self,
        handle: RawHandle,
        key: &str,
        kind: ValueType,
    ) -> EngineResult<Scalar> {
        match self.get(handle, key)? {
            StoredValue::Scalar(scalar) if scalar.value_type() == kind => Ok(*scalar),
            _ => Err(EngineError::TypeMismatch),
        }
    }

    pub(crate) fn get_str(
        &self,
        handle: RawHandle,
        key: &str,
        out: Option<&mut [u8]>,
    ) -> EngineResult<usize> {
        let value = match self.get(handle, key)? {
            StoredValue::Str(value) => value,
            _ => return Err(EngineError::TypeMismatch),
        };
        let required = value.len() + 1;
        if let Some(buf) = out {
            if buf.len() < required {
                return Err(EngineError::InvalidLength);
            }
            buf[..value.len()].copy_from_slice(value.as_bytes());
            buf[value.len()] = 0;
        }
        Ok(required)
    }

    pub(crate) fn get_blob(
        &self,
        handle: RawHandle,
        key: &str,
        out: Option<&mut [u8]>,
    ) -> EngineResult<usize> {
        let value = match self.get(handle, key)? {
            StoredValue::Blob(value) => value,
            _ => return Err(EngineError::TypeMismatch),
        };
        if let Some(buf) = out {
            if buf.len() < value.len() {
                return Err(EngineError::InvalidLength);
            }
            buf[..value.len()].copy_from_slice(value);
        }
        Ok(value.len())
    }

    /// Insert or replace `key`, returning the partition that changed
    pub(crate) fn set(
        &mut self,
        handle: RawHandle,
        key: &str,
        value: StoredValue,
    ) -> EngineResult<String> {
        self.check_key(key)?;
        match &value {
            StoredValue::Str(s) if s.len() + 1 > self.limits.max_str_len => {
                return Err(EngineError::ValueTooLong)
            }
            StoredValue::Blob(b) if b.len() > self.limits.max_blob_len => {
                return Err(EngineError::ValueTooLong)
            }
            _ => {}
        }
        let entry = self.writable_entry(handle)?.clone();
        let used = self.entry_count(&entry.partition);
        let max_entries = self.limits.max_entries;
        let namespace = self.namespace_mut(&entry)?;

        if !namespace.contains_key(key) && used >= max_entries {
            return Err(EngineError::NotEnoughSpace);
        }
        namespace.insert(key.to_string(), value);
        Ok(entry.partition)
    }

    pub(crate) fn erase_key(&mut self, handle: RawHandle, key: &str) -> EngineResult<String> {
        self.check_key(key)?;
        let entry = self.writable_entry(handle)?.clone();
        let namespace = self.namespace_mut(&entry)?;
        namespace.remove(key).ok_or(EngineError::NotFound)?;
        Ok(entry.partition)
    }

    pub(crate) fn erase_all(&mut self, handle: RawHandle) -> EngineResult<String> {
        let entry = self.writable_entry(handle)?.clone();
        self.namespace_mut(&entry)?.clear();
        Ok(entry.partition)
    }

    pub(crate) fn find_key(&self, handle: RawHandle, key: &str) -> EngineResult<ValueType> {
        self.get(handle, key).map(StoredValue::value_type)
    }

    fn entry(&self, handle: RawHandle) -> EngineResult<&OpenEntry> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.handles.get(&handle).ok_or(EngineError::InvalidHandle)
    }

    fn writable_entry(&self, handle: RawHandle) -> EngineResult<&OpenEntry> {
        let entry = self.entry(handle)?;
        if !entry.mode.is_writable() {
            return Err(EngineError::ReadOnly);
        }
        Ok(entry)
    }

    fn namespace_mut(&mut self, entry: &OpenEntry) -> EngineResult<&mut Namespace> {
        // A namespace can vanish under an open handle when the partition is erased.
        Ok(self
            .partitions
            .get_mut(&entry.partition)
            .ok_or(EngineError::PartitionNotFound)?
            .entry(entry.namespace.clone())
            .or_default())
    }

    fn entry_count(&self, partition: &str) -> usize {
        self.partitions
            .get(partition)
            .map(|namespaces| namespaces.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    fn check_key(&self, key: &str) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidName);
        }
        if key.len() > self.limits.max_key_len {
            return Err(EngineError::KeyTooLong);
        }
        Ok(())
    }
}
