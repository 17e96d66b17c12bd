//! Storage engine trait
//!
//! The engine is the byte-oriented non-volatile store underneath the pool.
//! Everything here is a boundary type: the pool and the accessor only ever
//! talk to an engine through [`NvsEngine`], and every engine failure is
//! surfaced to callers verbatim as an [`EngineError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque handle returned by [`NvsEngine::open`]. Zero is never a valid handle.
pub type RawHandle = u32;

/// Result type for engine primitives
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Status codes reported by an engine primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Key or namespace not found")]
    NotFound,

    #[error("Stored value has a different type")]
    TypeMismatch,

    #[error("Handle was opened read-only")]
    ReadOnly,

    #[error("Not enough space in partition")]
    NotEnoughSpace,

    #[error("Invalid namespace name")]
    InvalidName,

    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Output buffer too small")]
    InvalidLength,

    #[error("Key name too long")]
    KeyTooLong,

    #[error("Value too long")]
    ValueTooLong,

    #[error("Partition has no free pages")]
    NoFreePages,

    #[error("Partition holds data in a newer format")]
    NewVersionFound,

    #[error("Partition not found")]
    PartitionNotFound,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Access mode of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        self == OpenMode::ReadWrite
    }
}

impl From<bool> for OpenMode {
    /// `true` opens read-write, `false` read-only.
    fn from(read_write: bool) -> Self {
        if read_write {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::ReadOnly => write!(f, "read-only"),
            OpenMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Type tag of a stored entry, as reported by [`NvsEngine::find_key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Str,
    Blob,
}

impl ValueType {
    /// Width in bytes of a fixed-width primitive, `None` for strings and blobs
    pub fn width(self) -> Option<usize> {
        match self {
            ValueType::U8 | ValueType::I8 => Some(1),
            ValueType::U16 | ValueType::I16 => Some(2),
            ValueType::U32 | ValueType::I32 => Some(4),
            ValueType::U64 | ValueType::I64 => Some(8),
            ValueType::Str | ValueType::Blob => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ValueType::I8 | ValueType::I16 | ValueType::I32 | ValueType::I64
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::U8 => "u8",
            ValueType::I8 => "i8",
            ValueType::U16 => "u16",
            ValueType::I16 => "i16",
            ValueType::U32 => "u32",
            ValueType::I32 => "i32",
            ValueType::U64 => "u64",
            ValueType::I64 => "i64",
            ValueType::Str => "str",
            ValueType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A value for one of the engine's fixed-width primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scalar {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
}

impl Scalar {
    pub fn value_type(&self) -> ValueType {
        match self {
            Scalar::U8(_) => ValueType::U8,
            Scalar::I8(_) => ValueType::I8,
            Scalar::U16(_) => ValueType::U16,
            Scalar::I16(_) => ValueType::I16,
            Scalar::U32(_) => ValueType::U32,
            Scalar::I32(_) => ValueType::I32,
            Scalar::U64(_) => ValueType::U64,
            Scalar::I64(_) => ValueType::I64,
        }
    }
}

/// Non-volatile key-value engine
///
/// Mirrors the primitive set of an NVS-style flash store. Implementations
/// must be safe to call from several threads; the pool serializes calls per
/// handle but different handles may be used concurrently.
pub trait NvsEngine: Send + Sync {
    /// Bring the engine up. May report [`EngineError::NoFreePages`] or
    /// [`EngineError::NewVersionFound`], after which the caller may erase
    /// and initialize again.
    fn init(&self) -> EngineResult<()>;

    /// Erase all partitions
    fn erase(&self) -> EngineResult<()>;

    /// Open `namespace` inside `partition`
    fn open(&self, partition: &str, namespace: &str, mode: OpenMode) -> EngineResult<RawHandle>;

    /// Release a handle. Unknown handles are ignored.
    fn close(&self, handle: RawHandle);

    /// Flush pending writes of a handle
    fn commit(&self, handle: RawHandle) -> EngineResult<()>;

    /// Read a fixed-width primitive of the requested type
    fn get_scalar(&self, handle: RawHandle, key: &str, kind: ValueType) -> EngineResult<Scalar>;

    /// Write a fixed-width primitive
    fn set_scalar(&self, handle: RawHandle, key: &str, value: Scalar) -> EngineResult<()>;

    /// Two-call string read.
    ///
    /// With `None` returns the required length including the trailing NUL.
    /// With a buffer, copies the string plus NUL and returns the same length.
    fn get_str(&self, handle: RawHandle, key: &str, out: Option<&mut [u8]>) -> EngineResult<usize>;

    fn set_str(&self, handle: RawHandle, key: &str, value: &str) -> EngineResult<()>;

    /// Two-call blob read; same protocol as [`NvsEngine::get_str`] without a terminator
    fn get_blob(&self, handle: RawHandle, key: &str, out: Option<&mut [u8]>)
        -> EngineResult<usize>;

    fn set_blob(&self, handle: RawHandle, key: &str, value: &[u8]) -> EngineResult<()>;

    /// Report the stored type of `key`
    fn find_key(&self, handle: RawHandle, key: &str) -> EngineResult<ValueType>;

    fn erase_key(&self, handle: RawHandle, key: &str) -> EngineResult<()>;

    /// Erase every key in the handle's namespace
    fn erase_all(&self, handle: RawHandle) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_from_bool() {
        assert_eq!(OpenMode::from(true), OpenMode::ReadWrite);
        assert_eq!(OpenMode::from(false), OpenMode::ReadOnly);
        assert!(OpenMode::ReadWrite.is_writable());
        assert!(!OpenMode::ReadOnly.is_writable());
    }

    #[test]
    fn test_value_type_facts() {
        assert_eq!(ValueType::U8.width(), Some(1));
        assert_eq!(ValueType::I16.width(), Some(2));
        assert_eq!(ValueType::U32.width(), Some(4));
        assert_eq!(ValueType::I64.width(), Some(8));
        assert_eq!(ValueType::Str.width(), None);
        assert!(ValueType::I32.is_signed());
        assert!(!ValueType::U64.is_signed());
    }

    #[test]
    fn test_scalar_value_type() {
        assert_eq!(Scalar::I8(-1).value_type(), ValueType::I8);
        assert_eq!(Scalar::U64(u64::MAX).value_type(), ValueType::U64);
        assert_eq!(ValueType::U16.to_string(), "u16");
    }
}
