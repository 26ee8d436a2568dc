//! Settings shared by every command

use serde::{Deserialize, Serialize};
use std::env;

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Scheduler owner whose jobs are queried
    pub user: String,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Output format (table or json)
    pub format: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            user: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_default(),
            log_level: "info".to_string(),
            format: "table".to_string(),
        }
    }
}

/// Durable output store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Suffix removed from a listed output file to recover its job identity
    pub output_suffix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_suffix: ".root".to_string(),
        }
    }
}

/// One collector and the schedds reachable through it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Collector host; empty means the local pool
    pub address: String,

    /// Schedd names to query
    pub schedds: Vec<String>,
}
