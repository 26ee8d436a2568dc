//! Replica catalog lookups.

use anyhow::{Context, Result};
use log::{debug, trace};
use std::env;
use std::process::Command;

/// Answers which sites hold a copy of a file.
pub trait Catalog {
    fn sites_for(&self, file: &str) -> Result<Vec<String>>;
}

/// The data aggregation service, queried with `dasgoclient`.
#[derive(Debug, Clone, Default)]
pub struct DasCatalog;

impl DasCatalog {
    pub fn new() -> Self {
        Self
    }

    fn get_dasgoclient_exec() -> String {
        env::var("PRODJOBS_FAKE_DASGOCLIENT").unwrap_or_else(|_| "dasgoclient".to_string())
    }
}

/// Site labels from `dasgoclient` output; a warning anywhere means the lookup failed.
pub fn parse_sites(stdout: &str) -> Option<Vec<String>> {
    if stdout.contains("WARNING:") {
        return None;
    }
    Some(stdout.split_whitespace().map(str::to_string).collect())
}

impl Catalog for DasCatalog {
    fn sites_for(&self, file: &str) -> Result<Vec<String>> {
        let exec = Self::get_dasgoclient_exec();
        let query = format!("-query=site file={}", file);
        trace!("Running command: {} {}", exec, query);
        let output = Command::new(&exec)
            .arg(&query)
            .output()
            .with_context(|| format!("Failed to run {}", exec))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "dasgoclient failed for {}: {}",
                file,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let sites = parse_sites(&stdout)
            .ok_or_else(|| anyhow::anyhow!("dasgoclient warned for {}: {}", file, stdout.trim()))?;
        debug!("{} replicas found for {}", sites.len(), file);
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sites() {
        assert_eq!(
            parse_sites("T1_US_FNAL_Disk\nT2_DE_DESY\n"),
            Some(vec!["T1_US_FNAL_Disk".to_string(), "T2_DE_DESY".to_string()])
        );
        assert_eq!(parse_sites("WARNING: no such file"), None);
        assert_eq!(parse_sites(""), Some(vec![]));
    }
}
