//! Settings for managing and resubmitting jobs already in the queue

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManageConfig {
    /// Directory holding job stdout files; enables log backups on resubmission
    pub dir: String,

    /// Sites never selected for input reads
    pub blacklisted_sites: Vec<String>,

    /// Sites promoted ahead of others, most preferred first
    pub preferred_sites: Vec<String>,

    /// Redirector used to build site-specific input paths
    pub default_redirector: String,

    /// Hours without a progress update before a running job counts as stuck
    pub stuck_threshold_hours: f64,
}

impl Default for ManageConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            blacklisted_sites: Vec::new(),
            preferred_sites: Vec::new(),
            default_redirector: "root://cmsxrootd.fnal.gov/".to_string(),
            stuck_threshold_hours: 12.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manage_config_defaults() {
        let config = ManageConfig::default();
        assert!(config.dir.is_empty());
        assert!(config.blacklisted_sites.is_empty());
        assert_eq!(config.stuck_threshold_hours, 12.0);
        assert!(config.default_redirector.starts_with("root://"));
    }
}
