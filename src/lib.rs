// nvs-pool - Typed NVS access over a shared handle pool

#![warn(rust_2018_idioms)]

//! # Architecture
//!
//! ```text
//! Nvs<'m> (typed read/write, strings, blobs)
//!   └─→ SlotLease ─→ NvsManager (slot table, refcounts, generations)
//!                      └─→ Arc<dyn NvsEngine> (MemoryEngine | FileEngine | host)
//! ```
//!
//! Accessors naming the same partition and namespace share one engine
//! handle. The last accessor to go away commits and closes it.

pub mod accessor;
pub mod codec;
pub mod config;
pub mod logging;
mod metrics;
pub mod pool;
pub mod storage;
pub mod validate;

// Re-exports for convenience
pub use accessor::Nvs;
pub use codec::NvsValue;
pub use config::{LogFormat, NvsConfig};
pub use error::{Error, Result};
pub use pool::{ManagerCell, NvsManager, SlotId, SlotInfo, SlotLease};
pub use storage::{
    EngineError, FileEngine, MemoryEngine, NvsEngine, OpenMode, RawHandle, Scalar, ValueType,
};

/// Pool error types
pub mod error {
    use crate::storage::EngineError;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Instance invalid: {0}")]
        InstanceInvalid(String),

        #[error("Busy: {0}")]
        Busy(String),

        #[error("Access denied: {0}")]
        AccessDenied(String),

        #[error("Mode conflict: {partition}:{namespace} is open read-only")]
        ModeConflict { partition: String, namespace: String },

        #[error("Pool exhausted: all {0} slots in use")]
        PoolExhausted(usize),

        #[error("Engine error: {0}")]
        Engine(#[from] EngineError),

        #[error("Invalid value: {0}")]
        InvalidValue(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_engine_errors_convert() {
        let err: Error = EngineError::NotFound.into();
        assert_eq!(err, Error::Engine(EngineError::NotFound));
        assert!(err.to_string().starts_with("Engine error"));
    }
}
