//! Handle pool
//!
//! Shares one engine handle between every accessor that names the same
//! partition and namespace. Slots are reference counted; the last release
//! commits and closes the handle.

mod cell;
mod manager;
mod slot;

pub use cell::ManagerCell;
pub use manager::{NvsManager, SlotLease};
pub use slot::{Slot, SlotAccess, SlotId, SlotInfo};
