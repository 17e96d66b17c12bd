//! Lazily built, shareable manager
//!
//! A `ManagerCell` stands where a process-wide singleton would: the first
//! [`ManagerCell::get`] initializes the engine and builds the manager, later
//! calls hand out the same instance until [`ManagerCell::release`] tears it
//! down. Engine init runs at most once per cell, including the erase retry.

use super::manager::{initialize_engine, NvsManager};
use crate::config::NvsConfig;
use crate::error::Result;
use crate::storage::NvsEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct CellState {
    manager: Option<Arc<NvsManager>>,
    engine_initialized: bool,
}

pub struct ManagerCell {
    engine: Arc<dyn NvsEngine>,
    config: NvsConfig,
    state: Mutex<CellState>,
}

impl ManagerCell {
    pub fn new(engine: Arc<dyn NvsEngine>, config: NvsConfig) -> Self {
        Self {
            engine,
            config,
            state: Mutex::new(CellState::default()),
        }
    }

    /// Return the live manager, building it on first use
    pub fn get(&self) -> Result<Arc<NvsManager>> {
        let mut state = self.state.lock();
        if let Some(manager) = &state.manager {
            return Ok(Arc::clone(manager));
        }

        self.config.validate()?;
        if !state.engine_initialized {
            initialize_engine(self.engine.as_ref(), &self.config)?;
            state.engine_initialized = true;
        } else {
            debug!("Engine already initialized; rebuilding pool only");
        }

        let manager = Arc::new(NvsManager::with_initialized_engine(
            Arc::clone(&self.engine),
            self.config.clone(),
        ));
        state.manager = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// Shut the live manager down and forget it.
    ///
    /// Clones still held elsewhere stay usable as objects but every handle
    /// they had is closed. Returns false if nothing was live.
    pub fn release(&self) -> bool {
        let Some(manager) = self.state.lock().manager.take() else {
            return false;
        };
        let closed = manager.shutdown();
        info!(closed, "Released pool manager");
        true
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().manager.is_some()
    }
}

impl std::fmt::Debug for ManagerCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerCell")
            .field("config", &self.config)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EngineError, MemoryEngine, OpenMode};

    #[test]
    fn test_get_returns_same_manager() -> Result<()> {
        let engine = Arc::new(MemoryEngine::new());
        let cell = ManagerCell::new(engine.clone(), NvsConfig::default());
        assert!(!cell.is_live());

        let a = cell.get()?;
        let b = cell.get()?;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cell.is_live());
        assert_eq!(engine.stats().inits, 1);
        Ok(())
    }

    #[test]
    fn test_release_then_rebuild() -> Result<()> {
        let engine = Arc::new(MemoryEngine::new());
        let cell = ManagerCell::new(engine.clone(), NvsConfig::default());

        let first = cell.get()?;
        let lease = first.open_default("app", OpenMode::ReadWrite)?;
        let stale = lease.id();

        assert!(cell.release());
        assert!(!cell.release());
        assert_eq!(engine.open_handles(), 0);
        assert!(first
            .slot(stale.index())
            .is_some_and(|slot| slot.try_access(stale).is_err()));
        drop(lease);

        let second = cell.get()?;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.stats().inits, 1);
        Ok(())
    }

    #[test]
    fn test_failed_init_can_retry() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_init_with(EngineError::Io("bus error".to_string()));
        let cell = ManagerCell::new(engine.clone(), NvsConfig::default());

        assert!(cell.get().is_err());
        assert!(!cell.is_live());
        assert!(cell.get().is_ok());
        assert_eq!(engine.stats().inits, 2);
    }
}
