//! Pool configuration
//!
//! Values are read once when a manager is built and stay fixed for its
//! lifetime: the slot table never grows and identifier limits never change
//! under live accessors.
//!
//! # Sources
//!
//! ```text
//! defaults  →  optional TOML file  →  NVS_POOL_* environment
//! ```

use crate::error::{Error, Result};
use crate::storage::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment prefix for overrides, e.g. `NVS_POOL_SLOT_CAPACITY=16`
pub const ENV_PREFIX: &str = "NVS_POOL";

/// Configuration of a pool manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NvsConfig {
    /// Partition used when an accessor names only a namespace
    pub default_partition: String,
    /// Longest partition name before truncation
    pub max_partition_len: usize,
    /// Longest namespace before truncation
    pub max_namespace_len: usize,
    /// Longest key before truncation
    pub max_key_len: usize,
    /// Number of engine handles the pool can hold open at once
    pub slot_capacity: usize,
    /// Erase and reinitialize once when init reports no free pages
    pub erase_on_no_free_pages: bool,
    /// Erase and reinitialize once when init finds a newer data format
    pub erase_on_new_version: bool,
    /// Default tracing filter directive
    pub log_filter: String,
    /// Console output format used by `logging::init_from_config`
    pub log_format: LogFormat,
}

/// Console log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for NvsConfig {
    fn default() -> Self {
        Self {
            default_partition: "nvs".to_string(),
            max_partition_len: 15,
            max_namespace_len: 15,
            max_key_len: 15,
            slot_capacity: 8,
            erase_on_no_free_pages: true,
            erase_on_new_version: true,
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl NvsConfig {
    /// Load defaults, then `path` (if given), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));

        let config: NvsConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: NvsConfig = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Invalid TOML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_capacity == 0 {
            return Err(Error::Config("slot_capacity must be at least 1".to_string()));
        }
        if self.max_partition_len == 0 || self.max_namespace_len == 0 || self.max_key_len == 0 {
            return Err(Error::Config(
                "identifier length limits must be at least 1".to_string(),
            ));
        }
        if self.default_partition.is_empty() {
            return Err(Error::Config("default_partition cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Whether an init failure should be answered with one erase-and-retry
    pub fn erase_on(&self, err: &EngineError) -> bool {
        match err {
            EngineError::NoFreePages => self.erase_on_no_free_pages,
            EngineError::NewVersionFound => self.erase_on_new_version,
            _ => false,
        }
    }

    pub fn with_slot_capacity(mut self, slot_capacity: usize) -> Self {
        self.slot_capacity = slot_capacity;
        self
    }

    pub fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NvsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_partition, "nvs");
        assert_eq!(config.max_key_len, 15);
    }

    #[test]
    fn test_from_toml_keeps_defaults() -> Result<()> {
        let config = NvsConfig::from_toml_str(
            "slot_capacity = 3\nerase_on_new_version = false\nlog_format = \"json\"\n",
        )?;
        assert_eq!(config.slot_capacity, 3);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.erase_on_new_version);
        assert_eq!(config.max_namespace_len, 15);
        Ok(())
    }

    #[test]
    fn test_toml_roundtrip() -> Result<()> {
        let config = NvsConfig::default().with_slot_capacity(4);
        let text = config.to_toml_string()?;
        assert_eq!(NvsConfig::from_toml_str(&text)?, config);
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            NvsConfig::from_toml_str("slot_capacity = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NvsConfig::from_toml_str("max_key_len = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NvsConfig::from_toml_str("slot_capacity = \"many\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("nvs_pool_config_{}.toml", std::process::id()));
        std::fs::write(&path, "default_partition = \"factory\"\nmax_key_len = 8\n")
            .map_err(|e| Error::Config(e.to_string()))?;

        let config = NvsConfig::load(Some(&path))?;
        assert_eq!(config.default_partition, "factory");
        assert_eq!(config.max_key_len, 8);
        assert_eq!(config.slot_capacity, 8);

        std::fs::remove_file(path).ok();
        Ok(())
    }

    #[test]
    fn test_erase_policy() {
        let mut config = NvsConfig::default();
        assert!(config.erase_on(&EngineError::NoFreePages));
        assert!(config.erase_on(&EngineError::NewVersionFound));
        assert!(!config.erase_on(&EngineError::NotFound));

        config.erase_on_no_free_pages = false;
        assert!(!config.erase_on(&EngineError::NoFreePages));
    }
}
