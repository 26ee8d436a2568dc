//! Settings used when preparing, submitting and chaining jobs

use serde::{Deserialize, Serialize};

/// Defaults applied to every prepared job description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Template job description
    pub jdl: String,

    /// Disk request per job in kB
    pub disk: u64,

    /// Memory request per job in MB
    pub memory: u64,

    /// CPU threads per job
    pub cpus: u32,

    /// Comma-separated list of global pool sites
    pub sites: String,

    /// Scripts shipped with every job
    pub scripts: Vec<String>,

    /// Write the dispatch statement into the job description instead of passing `-queue`
    pub no_queue_arg: bool,

    /// Arguments for running the job inside a container environment
    pub env: Option<String>,

    /// Intermediate job in a chain; disables staging out
    pub intermediate: bool,

    /// Singularity image
    pub singularity: String,

    /// Extra `Requirements` expression appended to every job
    pub requirements: Option<String>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            jdl: "jobExecCondor.jdl".to_string(),
            disk: 1_000_000,
            memory: 2000,
            cpus: 1,
            sites: String::new(),
            scripts: vec!["step1.sh".to_string(), "step2.sh".to_string()],
            no_queue_arg: false,
            env: None,
            intermediate: false,
            singularity: String::new(),
            requirements: None,
        }
    }
}

/// Settings for merging several job descriptions into one chain job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Script that runs the subjobs of a chain in sequence on the worker
    pub executor_script: String,

    /// Ship a checkpoint directory and remap per-process checkpoint files into it
    pub checkpoint: bool,

    /// Name of the checkpoint file written by each subjob
    pub checkpoint_file: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            executor_script: "jobExecCondorChain.sh".to_string(),
            checkpoint: false,
            checkpoint_file: "checkpoint.tar.gz".to_string(),
        }
    }
}
