//! Submission manifests: the declared proto-jobs of a production.
//!
//! ```toml
//! jdl_template = "jobExecCondor.jdl"
//! output = "root://cmseos.fnal.gov//store/user/me/prod"
//!
//! [[jobs]]
//! name = "signal_M500"
//! count = 10
//! patterns = [["JOBNAME", "signal_M500_$(Process)_$(Cluster)"], ["EXTRAARGS", "-m 500"]]
//! appends = ["+MaxWallTimeMins = 1440"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::errors::{ProdError, Result};
use crate::client::queue_clause::QueueClause;
use crate::models::JobIdentity;

/// One declared job family as written in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtoJob {
    pub name: String,
    /// Ordinals `0..count`
    pub count: Option<u32>,
    /// Explicit ordinals, instead of `count`
    pub ordinals: Option<Vec<u32>>,
    /// Name the job's outputs ran under when it was part of a chain
    pub chain_name: String,
    /// Literal find/replace pairs applied to the template, in order
    pub patterns: Vec<(String, String)>,
    /// Lines appended to the prepared description
    pub appends: Vec<String>,
    /// Representative input file, for locality reports
    pub input_file: Option<String>,
}

impl ProtoJob {
    pub fn ordinals(&self) -> Vec<u32> {
        let mut ordinals = match (&self.ordinals, self.count) {
            (Some(list), _) => list.clone(),
            (None, Some(count)) => (0..count).collect(),
            (None, None) => Vec::new(),
        };
        ordinals.sort_unstable();
        ordinals.dedup();
        ordinals
    }

    pub fn njobs(&self) -> usize {
        self.ordinals().len()
    }

    pub fn expected(&self) -> BTreeSet<JobIdentity> {
        self.ordinals()
            .into_iter()
            .map(|n| JobIdentity::new(self.name.clone(), n))
            .collect()
    }

    /// Dispatch clause: a plain count for `0..n`, an index list otherwise.
    pub fn queue(&self) -> QueueClause {
        let ordinals = self.ordinals();
        let contiguous = ordinals
            .iter()
            .enumerate()
            .all(|(i, n)| *n as usize == i);
        if contiguous {
            QueueClause::Count(ordinals.len() as u32)
        } else {
            QueueClause::process_in(ordinals)
        }
    }

    /// Prepared description path: the template name with `_<name>` before `.jdl`.
    pub fn jdl_path(&self, template: &Path) -> PathBuf {
        let file = template
            .file_name()
            .map(|f| f.to_string_lossy().replace(".jdl", &format!("_{}.jdl", self.name)))
            .unwrap_or_else(|| format!("{}.jdl", self.name));
        template.with_file_name(file)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmissionManifest {
    /// Template description; falls back to the configured `submit.jdl`
    pub jdl_template: Option<PathBuf>,
    /// Durable store path holding completed outputs
    pub output: Option<String>,
    pub jobs: Vec<ProtoJob>,
}

impl SubmissionManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ProdError::MissingInput(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| ProdError::io(format!("Failed to read {}", path.display()), e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(text)
            .map_err(|e| ProdError::config(format!("invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for job in &self.jobs {
            if job.name.is_empty() {
                return Err(ProdError::config("manifest job without a name"));
            }
            if !names.insert(job.name.as_str()) {
                return Err(ProdError::config(format!(
                    "job '{}' declared twice",
                    job.name
                )));
            }
            if job.count.is_some() && job.ordinals.is_some() {
                return Err(ProdError::config(format!(
                    "job '{}' sets both count and ordinals",
                    job.name
                )));
            }
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.jobs.iter().map(ProtoJob::njobs).sum()
    }
}
