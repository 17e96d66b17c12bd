//! Typed accessor over a pooled slot
//!
//! An [`Nvs`] resolves its slot once, at construction, and holds a
//! [`SlotLease`] for as long as it lives. Every operation then takes the
//! slot guard without blocking: a concurrent operation on the same slot
//! makes the call fail with [`Error::Busy`] instead of waiting.
//!
//! ```
//! use std::sync::Arc;
//! use nvs_pool::{MemoryEngine, Nvs, NvsConfig, NvsManager, OpenMode};
//!
//! let manager = NvsManager::new(Arc::new(MemoryEngine::new()), NvsConfig::default())?;
//! let nvs = Nvs::open(&manager, "wifi", OpenMode::ReadWrite);
//! nvs.write("retries", 3u8)?;
//! nvs.write_str("ssid", "lab")?;
//! assert_eq!(nvs.read::<u8>("retries")?, 3);
//! # Ok::<(), nvs_pool::Error>(())
//! ```

use crate::codec::NvsValue;
use crate::error::{Error, Result};
use crate::metrics;
use crate::pool::{NvsManager, SlotAccess, SlotId, SlotInfo, SlotLease};
use crate::storage::{EngineError, EngineResult, NvsEngine, OpenMode, ValueType};
use crate::validate;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, error, warn};

/// Accessor for one (partition, namespace) in a pool
pub struct Nvs<'m> {
    manager: &'m NvsManager,
    lease: Option<SlotLease<'m>>,
    open_error: Option<Error>,
}

impl<'m> Nvs<'m> {
    /// Open `namespace` in the manager's default partition.
    ///
    /// Never fails; check [`Nvs::is_valid`] or [`Nvs::open_error`].
    pub fn open(manager: &'m NvsManager, namespace: &str, mode: impl Into<OpenMode>) -> Self {
        Self::resolve(manager, manager.open_default(namespace, mode.into()))
    }

    /// Open `namespace` in an explicit `partition`
    pub fn open_in(
        manager: &'m NvsManager,
        partition: &str,
        namespace: &str,
        mode: impl Into<OpenMode>,
    ) -> Self {
        Self::resolve(manager, manager.open(partition, namespace, mode.into()))
    }

    fn resolve(manager: &'m NvsManager, lease: Result<SlotLease<'m>>) -> Self {
        match lease {
            Ok(lease) => Self {
                manager,
                lease: Some(lease),
                open_error: None,
            },
            Err(err) => {
                warn!(error = %err, "Accessor could not resolve a slot");
                Self {
                    manager,
                    lease: None,
                    open_error: Some(err),
                }
            }
        }
    }

    /// Whether the accessor is bound to a live slot.
    ///
    /// Turns false for good once the manager shuts its slot down.
    pub fn is_valid(&self) -> bool {
        self.info().is_some()
    }

    /// Why construction failed, if it did
    pub fn open_error(&self) -> Option<&Error> {
        self.open_error.as_ref()
    }

    pub fn slot_id(&self) -> Option<SlotId> {
        self.lease.as_ref().map(SlotLease::id)
    }

    /// Mode of the bound slot; may be read-write for a read-only request
    pub fn mode(&self) -> Option<OpenMode> {
        self.info().map(|info| info.mode)
    }

    pub fn info(&self) -> Option<SlotInfo> {
        let id = self.slot_id()?;
        self.manager
            .slot_info(id.index())
            .filter(|info| info.id == id)
    }

    pub fn manager(&self) -> &'m NvsManager {
        self.manager
    }

    /// Read a typed value stored under `key`
    pub fn read<T: NvsValue>(&self, key: &str) -> Result<T> {
        let key = self.key(key)?;
        let slot = self.access("read", false)?;
        let raw = self.check(
            "read",
            &key,
            self.engine().get_scalar(slot.handle(), &key, T::STORAGE),
        )?;
        drop(slot);
        T::decode(raw)
    }

    /// Store a typed value under `key`
    pub fn write<T: NvsValue>(&self, key: &str, value: T) -> Result<()> {
        let key = self.key(key)?;
        let raw = value.encode()?;
        let slot = self.access("write", true)?;
        self.check("write", &key, self.engine().set_scalar(slot.handle(), &key, raw))
    }

    /// Read a string into `buf`, returning its length without the terminator.
    ///
    /// `buf` needs room for the string plus one byte; a smaller buffer fails
    /// with [`EngineError::InvalidLength`] and is left untouched.
    pub fn read_str(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        let key = self.key(key)?;
        let slot = self.access("read_str", false)?;
        let required = self.check("read_str", &key, self.engine().get_str(slot.handle(), &key, None))?;
        if required == 0 {
            return Ok(0);
        }
        self.check(
            "read_str",
            &key,
            self.engine().get_str(slot.handle(), &key, Some(buf)),
        )?;
        Ok(required - 1)
    }

    /// Read a string into `out`, sizing it to fit.
    ///
    /// A reported length of zero is a stored empty string, not an error.
    pub fn read_string(&self, key: &str, out: &mut String) -> Result<()> {
        let key = self.key(key)?;
        let slot = self.access("read_string", false)?;
        let required = self.check(
            "read_string",
            &key,
            self.engine().get_str(slot.handle(), &key, None),
        )?;

        out.clear();
        if required == 0 {
            return Ok(());
        }

        let mut bytes = vec![0u8; required];
        self.check(
            "read_string",
            &key,
            self.engine().get_str(slot.handle(), &key, Some(&mut bytes)),
        )?;
        drop(slot);

        bytes.truncate(required - 1);
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::InvalidValue(format!("string under '{}' is not UTF-8: {}", key, e)))?;
        out.push_str(&text);
        Ok(())
    }

    /// Store a string; the engine keeps it NUL-terminated, so interior NULs are refused
    pub fn write_str(&self, key: &str, value: &str) -> Result<()> {
        let key = self.key(key)?;
        if value.contains('\0') {
            return Err(Error::InvalidArgument(format!(
                "string for '{}' contains a NUL byte",
                key
            )));
        }
        let slot = self.access("write_str", true)?;
        self.check("write_str", &key, self.engine().set_str(slot.handle(), &key, value))
    }

    /// Read a blob; with `None` only its length is reported
    pub fn read_blob(&self, key: &str, out: Option<&mut [u8]>) -> Result<usize> {
        let key = self.key(key)?;
        let slot = self.access("read_blob", false)?;
        self.check("read_blob", &key, self.engine().get_blob(slot.handle(), &key, out))
    }

    pub fn write_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = self.key(key)?;
        let slot = self.access("write_blob", true)?;
        self.check("write_blob", &key, self.engine().set_blob(slot.handle(), &key, value))
    }

    /// Type of the value stored under `key`
    pub fn find(&self, key: &str) -> Result<ValueType> {
        let key = self.key(key)?;
        let slot = self.access("find", false)?;
        self.check("find", &key, self.engine().find_key(slot.handle(), &key))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        match self.find(key) {
            Ok(_) => Ok(true),
            Err(Error::Engine(EngineError::NotFound)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn erase_key(&self, key: &str) -> Result<()> {
        let key = self.key(key)?;
        let slot = self.access("erase_key", true)?;
        self.check("erase_key", &key, self.engine().erase_key(slot.handle(), &key))
    }

    /// Remove every key in the namespace
    pub fn erase_all(&self) -> Result<()> {
        let slot = self.access("erase_all", true)?;
        self.check("erase_all", "", self.engine().erase_all(slot.handle()))
    }

    /// Flush pending writes; allowed in either mode
    pub fn commit(&self) -> Result<()> {
        let slot = self.access("commit", false)?;
        self.check("commit", "", self.engine().commit(slot.handle()))
    }

    fn engine(&self) -> &'m dyn NvsEngine {
        self.manager.engine()
    }

    fn key<'k>(&self, key: &'k str) -> Result<Cow<'k, str>> {
        validate::key(key, self.manager.config().max_key_len)
    }

    fn access(&self, op: &'static str, mutating: bool) -> Result<SlotAccess<'m>> {
        let lease = self.lease.as_ref().ok_or_else(|| {
            Error::InstanceInvalid("accessor did not resolve a slot".to_string())
        })?;
        let slot = lease.slot().ok_or_else(|| {
            Error::InstanceInvalid(format!("{} is out of range", lease.id()))
        })?;

        let access = slot.try_access(lease.id()).map_err(|err| {
            if matches!(err, Error::Busy(_)) {
                debug!(op, slot = slot.index(), "Slot busy");
                metrics::record_busy(op);
            }
            err
        })?;

        if mutating && !access.mode().is_writable() {
            warn!(
                op,
                partition = access.partition(),
                namespace = access.namespace(),
                "Write refused on read-only slot"
            );
            return Err(Error::AccessDenied(format!(
                "{} needs a read-write slot, {}:{} is read-only",
                op,
                access.partition(),
                access.namespace()
            )));
        }
        Ok(access)
    }

    fn check<T>(&self, op: &'static str, key: &str, result: EngineResult<T>) -> Result<T> {
        result.map_err(|err| {
            if err == EngineError::NotFound {
                debug!(op, key, "Key not found");
            } else {
                error!(op, key, error = %err, "Engine operation failed");
                metrics::record_engine_error(op);
            }
            Error::Engine(err)
        })
    }
}

impl fmt::Debug for Nvs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nvs")
            .field("slot", &self.slot_id())
            .field("open_error", &self.open_error)
            .finish()
    }
}
