//! Storage layer
//!
//! # Architecture
//!
//! NVS stores typed entries in a two-level structure:
//!
//! ```text
//! Partitions (declared up front, e.g. "nvs")
//!   └─→ Namespaces (created on first read-write open)
//!        └─→ Keys → u8..i64 | string | blob
//! ```
//!
//! ## Engine boundary
//!
//! The `NvsEngine` trait is the handle-based surface the pool is built on:
//! - init / erase of the whole store
//! - open, close and commit of namespace handles
//! - typed get/set, two-call string and blob reads, find, erase
//!
//! ## Implementations
//!
//! - **MemoryEngine** volatile, with scripted failures for tests
//! - **FileEngine** one checksummed image file per partition

pub mod engine;
pub mod file;
pub mod memory;
mod table;

pub use engine::{EngineError, EngineResult, NvsEngine, OpenMode, RawHandle, Scalar, ValueType};
pub use file::{FileEngine, PartitionImage, IMAGE_FORMAT_VERSION};
pub use memory::{EngineStats, MemoryEngine};
pub use table::{EngineLimits, Namespace, StoredValue};
