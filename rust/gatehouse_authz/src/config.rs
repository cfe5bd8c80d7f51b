//! Runtime configuration.

use std::env;
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "GATEHOUSE_DATA_DIR";
pub const DENY_INACTIVE_ENV: &str = "GATEHOUSE_DENY_INACTIVE";

/// Name of the database file inside `data_dir`.
pub const DB_FILE: &str = "gatehouse.redb";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deny every decision for principals with `is_active == false`.
    pub deny_inactive_principals: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatehouseConfig {
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./gatehouse_data"),
            engine: EngineConfig::default(),
        }
    }
}

impl GatehouseConfig {
    /// Defaults overridden by `GATEHOUSE_DATA_DIR` and `GATEHOUSE_DENY_INACTIVE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(DENY_INACTIVE_ENV) {
            config.engine.deny_inactive_principals = parse_flag(&flag);
        }
        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
