//! Recovering the input file a job reads, for locality-aware resubmission.

use log::{debug, warn};
use std::fs;
use std::path::PathBuf;

use crate::client::errors::{ProdError, Result};
use crate::client::job_query::ManagedJob;

const STORE_MARKER: &str = "/store/";
const REDIRECT_MARKER: &str = "/store/test/xrootd/";
const ROOT_SUFFIX: &str = ".root";

/// Where to look for a job's input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A scheduler attribute listing the job's inputs, comma separated
    Attribute(String),
    /// Lines of `<dir>/<stdout>.stdout` containing `key`
    Log { dir: PathBuf, key: String },
}

impl InputSource {
    /// Exactly one of attribute or (log dir + key) must be given.
    pub fn from_options(
        attribute: Option<String>,
        log_dir: Option<PathBuf>,
        log_key: Option<String>,
    ) -> Result<Self> {
        match (attribute, log_dir, log_key) {
            (Some(_), _, Some(_)) => Err(ProdError::config(
                "use either an input-file attribute or a log key, not both",
            )),
            (Some(attribute), _, None) => Ok(InputSource::Attribute(attribute)),
            (None, Some(dir), Some(key)) => Ok(InputSource::Log { dir, key }),
            (None, None, Some(_)) => Err(ProdError::config(
                "a log key also needs the path to the logs",
            )),
            (None, _, None) => Err(ProdError::config(
                "an input-file attribute or a log path and key is required to find inputs",
            )),
        }
    }

    /// The attribute that must be fetched with each job, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            InputSource::Attribute(name) => Some(name),
            InputSource::Log { .. } => None,
        }
    }

    pub fn input_for(&self, job: &ManagedJob) -> Option<String> {
        match self {
            InputSource::Attribute(name) => {
                let value = job.record.attribute(name)?;
                logical_file_name(&value)
            }
            InputSource::Log { dir, key } => {
                let path = dir.join(format!("{}.stdout", job.stdout));
                let text = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Cannot read log {}: {}", path.display(), e);
                        return None;
                    }
                };
                let found = text
                    .lines()
                    .filter(|line| line.contains(key.as_str()))
                    .filter_map(logical_file_name)
                    .last();
                debug!("Input from log job={} file={:?}", job.stdout, found);
                found
            }
        }
    }
}

/// Logical file name from a raw input reference.
///
/// Takes the first comma-separated entry, keeps the part from `/store/` through the
/// `.root` extension and drops a `/store/test/xrootd/<site>` redirect prefix.
pub fn logical_file_name(raw: &str) -> Option<String> {
    let first = raw.split(',').next()?;
    let start = first.find(STORE_MARKER)?;
    let mut lfn = &first[start..];
    if let Some(end) = lfn.rfind(ROOT_SUFFIX) {
        lfn = &lfn[..end + ROOT_SUFFIX.len()];
    }
    if lfn.starts_with(REDIRECT_MARKER)
        && let Some(second) = lfn[STORE_MARKER.len()..].find(STORE_MARKER)
    {
        lfn = &lfn[STORE_MARKER.len() + second..];
    }
    Some(lfn.trim().to_string())
}
