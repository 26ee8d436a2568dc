//! Layered configuration for prodjobs.
//!
//! Configuration is read from up to three TOML files, each overriding the previous one
//! key by key:
//!
//! 1. system: `/etc/prodjobs/config.toml`
//! 2. user: `<config dir>/prodjobs/config.toml`
//! 3. local: `.prodconfig.toml` in the working directory
//!
//! The merged [`ProdConfig`] is built once at start-up and handed to each component.

mod common;
mod manage;
mod submit;

pub use common::{CollectorConfig, CommonConfig, StoreConfig};
pub use manage::ManageConfig;
pub use submit::{ChainConfig, SubmitConfig};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const VALID_FORMATS: &[&str] = &["table", "json"];
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Locations searched for configuration files, lowest priority first.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self {
            system: PathBuf::from("/etc/prodjobs/config.toml"),
            user: dirs::config_dir().map(|dir| dir.join("prodjobs").join("config.toml")),
            local: PathBuf::from(".prodconfig.toml"),
        }
    }

    /// Paths that exist on disk, in priority order.
    pub fn existing_paths(&self) -> Vec<&PathBuf> {
        let mut paths = vec![&self.system];
        if let Some(user) = &self.user {
            paths.push(user);
        }
        paths.push(&self.local);
        paths.into_iter().filter(|p| p.exists()).collect()
    }

    pub fn user_config_dir(&self) -> Option<&Path> {
        self.user.as_ref().and_then(|p| p.parent())
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProdConfig {
    pub common: CommonConfig,
    pub submit: SubmitConfig,
    pub chain: ChainConfig,
    pub manage: ManageConfig,
    pub store: StoreConfig,
    /// Named collectors and the schedds to query through each of them
    pub collectors: BTreeMap<String, CollectorConfig>,
}

impl ProdConfig {
    /// Load from the standard locations.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(&ConfigPaths::new())
    }

    pub fn load_with_paths(paths: &ConfigPaths) -> Result<Self> {
        let existing: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
        Self::load_from_files(&existing)
    }

    /// Merge the given files in order. Files that do not exist are skipped.
    pub fn load_from_files(files: &[PathBuf]) -> Result<Self> {
        let mut merged = Value::Object(Default::default());
        for path in files {
            if !path.exists() {
                debug!("Config file not found, skipping path={}", path.display());
                continue;
            }
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let layer: toml::Value = toml::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            let layer = serde_json::to_value(layer)
                .with_context(|| format!("Failed to convert config file {}", path.display()))?;
            merge_values(&mut merged, layer);
            debug!("Loaded config layer path={}", path.display());
        }
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !VALID_FORMATS.contains(&self.common.format.as_str()) {
            errors.push(format!(
                "common.format must be one of {:?}, got '{}'",
                VALID_FORMATS, self.common.format
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.common.log_level.as_str()) {
            errors.push(format!(
                "common.log_level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.common.log_level
            ));
        }
        if self.submit.memory == 0 {
            errors.push("submit.memory must be greater than 0".to_string());
        }
        if self.submit.cpus == 0 {
            errors.push("submit.cpus must be greater than 0".to_string());
        }
        if self.chain.executor_script.trim().is_empty() {
            errors.push("chain.executor_script must not be empty".to_string());
        }
        if self.chain.checkpoint && self.chain.checkpoint_file.trim().is_empty() {
            errors.push("chain.checkpoint_file must be set when checkpointing".to_string());
        }
        if self.manage.stuck_threshold_hours <= 0.0 {
            errors.push("manage.stuck_threshold_hours must be positive".to_string());
        }
        if !self.manage.default_redirector.starts_with("root://") {
            errors.push(format!(
                "manage.default_redirector must start with root://, got '{}'",
                self.manage.default_redirector
            ));
        }
        for (name, collector) in &self.collectors {
            if collector.schedds.is_empty() {
                errors.push(format!("collectors.{}.schedds must not be empty", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Commented default configuration for `prodjobs config init`.
    pub fn generate_default_config() -> String {
        let body = Self::default()
            .to_toml()
            .unwrap_or_else(|e| format!("# failed to render defaults: {}\n", e));
        format!(
            "# prodjobs configuration\n\
             # Place this file at /etc/prodjobs/config.toml, <config dir>/prodjobs/config.toml\n\
             # or .prodconfig.toml; later files override earlier ones.\n\
             #\n\
             # Collectors are declared as tables, for example:\n\
             # [collectors.fnal]\n\
             # address = \"cmsgwms-collector-global.fnal.gov\"\n\
             # schedds = [\"lpcschedd1.fnal.gov\", \"lpcschedd2.fnal.gov\"]\n\n{}",
            body
        )
    }
}

/// Recursively overlay `layer` onto `base`. Tables merge, everything else replaces.
fn merge_values(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
