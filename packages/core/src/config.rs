//! Store configuration
//!
//! Plain serde structs with defaults. `from_env` overlays the `ARBOR_*`
//! environment variables on the defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_DATABASE_PATH: &str = "ARBOR_DATABASE_PATH";
pub const ENV_WORKSPACE: &str = "ARBOR_WORKSPACE";
pub const ENV_USER: &str = "ARBOR_USER";

/// Entry limits of the cache overlay regions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Node entries, counted per path and per identifier key
    pub node_capacity: u64,
    /// Cached query result sets
    pub query_capacity: u64,
    /// Namespace table, node types and workspace list entries
    pub metadata_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_capacity: 10_000,
            query_capacity: 500,
            metadata_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; the parent directory is created on open
    pub database_path: PathBuf,
    /// Workspace created on open and bound by the initial login
    pub default_workspace: String,
    pub cache: CacheConfig,
    /// User id stamped into `jcr:createdBy`
    pub user_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("arbor.db"),
            default_workspace: crate::db::DEFAULT_WORKSPACE.to_string(),
            cache: CacheConfig::default(),
            user_id: "anonymous".to_string(),
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `ARBOR_DATABASE_PATH`, `ARBOR_WORKSPACE` and `ARBOR_USER`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(workspace) = std::env::var(ENV_WORKSPACE) {
            config.default_workspace = workspace;
        }
        if let Ok(user) = std::env::var(ENV_USER) {
            config.user_id = user;
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database_path.as_os_str().is_empty() {
            return Err("database_path must not be empty".to_string());
        }
        if !crate::models::path::is_valid_name(&self.default_workspace) {
            return Err(format!(
                "default_workspace '{}' is not a valid name",
                self.default_workspace
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        if self.cache.node_capacity == 0
            || self.cache.query_capacity == 0
            || self.cache.metadata_capacity == 0
        {
            return Err("cache capacities must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_workspace, "default");
        assert_eq!(config.cache.node_capacity, 10_000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = StoreConfig {
            database_path: PathBuf::new(),
            ..StoreConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("database_path"));

        config.database_path = PathBuf::from("test.db");
        config.default_workspace = "bad/name".to_string();
        assert!(config.validate().unwrap_err().contains("default_workspace"));

        config.default_workspace = "default".to_string();
        config.cache.query_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = StoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
