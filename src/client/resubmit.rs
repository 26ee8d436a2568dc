//! Resubmission of queued jobs: in-place argument rewrite, counter reset, release.
//!
//! Per job the sequence is `Running -> Held` (a live process is never edited),
//! optional log backup, redirector rewrite, counter reset, site and attribute edits,
//! then `Held -> Released`. Idle jobs are only edited. A failing job is recorded and
//! the batch moves on to the next one; a job that was held here is released again
//! even when its edits failed.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::errors::{ProdError, Result};
use crate::client::hpc::{JobAction, SchedulerInterface};
use crate::client::input_files::InputSource;
use crate::client::job_query::ManagedJob;
use crate::client::site_resolver::{SiteResolution, SiteResolver};
use crate::models::JobStatus;

/// Flag carrying the input redirector in job arguments.
pub const REDIRECTOR_FLAG: &str = "-x";
/// Scheduler counters reset so the anti-flapping policy does not remove the job.
pub const RESET_COUNTERS: &[&str] = &["NumShadowStarts", "NumJobStarts", "JobRunCount"];
const SITES_ATTRIBUTE: &str = "DESIRED_Sites";
const SITE_REDIRECT_PATH: &str = "store/test/xrootd/";
const TAIL_BYTES: u64 = 10_000_000;

/// Expand a `-x` value into a redirector URL with a trailing `/`.
///
/// `root://...` is used as is; a site label (`T...`) reads through
/// `<default>/store/test/xrootd/<site>`.
pub fn parse_redirector(value: &str, default_redirector: &str) -> Result<String> {
    let mut redirector = if value.starts_with("root://") {
        value.to_string()
    } else if value.starts_with('T') {
        let mut base = default_redirector.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        format!("{}/{}{}", base, SITE_REDIRECT_PATH, value)
    } else {
        return Err(ProdError::config(format!(
            "Improper xrootd address: {}",
            value
        )));
    };
    if !redirector.ends_with('/') {
        redirector.push('/');
    }
    Ok(redirector)
}

/// Changes to a job's `DESIRED_Sites` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteEdit {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl SiteEdit {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// New comma-separated site list.
    pub fn apply(&self, current: &str) -> String {
        let mut sites: Vec<String> = current
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for site in &self.add {
            if !sites.contains(site) {
                sites.push(site.clone());
            }
        }
        sites.retain(|s| !self.remove.contains(s));
        sites.join(",")
    }
}

/// Parse `{"Attr": value, ...}` into scheduler edits. String values are passed
/// through unquoted, anything else as its JSON text.
pub fn parse_edits(json: &str) -> Result<Vec<(String, String)>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ProdError::config(format!("edit is not a JSON object: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ProdError::config("edit is not a JSON object"))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}

/// How a batch of jobs is resubmitted.
#[derive(Debug, Clone, Default)]
pub struct ResubmitOptions {
    /// Resolve and report only; no scheduler mutation
    pub dry_run: bool,
    /// Directory of job stdout files; enables log backups
    pub log_dir: Option<PathBuf>,
    /// Redirector written into the job arguments
    pub redirector: Option<String>,
    pub sites: SiteEdit,
    pub edits: Vec<(String, String)>,
}

/// State a running job is left in after a failed resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Released again without the edits
    Released,
    /// The release failed too
    StillHeld,
}

/// A failed resubmission of one job.
#[derive(Debug)]
pub struct JobFailure {
    pub error: anyhow::Error,
    /// Set when the job was held for this resubmission
    pub recovery: Option<Recovery>,
}

impl JobFailure {
    fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            recovery: None,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)?;
        match self.recovery {
            Some(Recovery::Released) => write!(f, " (released without its edits)"),
            Some(Recovery::StillHeld) => write!(f, " (left held)"),
            None => Ok(()),
        }
    }
}

/// One job's resubmission result.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: String,
    pub id: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Recovery>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResubmitReport {
    pub resubmitted: Vec<JobOutcome>,
    pub failed: Vec<JobOutcome>,
}

impl ResubmitReport {
    pub fn total(&self) -> usize {
        self.resubmitted.len() + self.failed.len()
    }

    /// `PartialFailure` when any job failed.
    pub fn check(&self) -> Result<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(ProdError::PartialFailure {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

/// Drives the per-job resubmission sequence against one schedd.
pub struct Resubmitter<'a> {
    scheduler: &'a dyn SchedulerInterface,
    options: &'a ResubmitOptions,
}

impl<'a> Resubmitter<'a> {
    pub fn new(scheduler: &'a dyn SchedulerInterface, options: &'a ResubmitOptions) -> Self {
        Self { scheduler, options }
    }

    /// Resubmit every job; the site list edit starts from the first job's sites.
    pub fn resubmit(&self, jobs: &[ManagedJob], use_stdout: bool) -> ResubmitReport {
        let sites = (!self.options.sites.is_empty())
            .then(|| jobs.first().map(|j| self.options.sites.apply(&j.desired_sites)))
            .flatten();
        let mut report = ResubmitReport::default();
        for job in jobs {
            let outcome = self.resubmit_job(job, self.options.redirector.as_deref(), sites.as_deref());
            let mut entry = JobOutcome {
                job: job.label(use_stdout).to_string(),
                id: job.id.to_string(),
                error: None,
                recovery: None,
            };
            match outcome {
                Ok(()) => report.resubmitted.push(entry),
                Err(failure) => {
                    warn!("Resubmission failed for job {}: {}", job.id, failure);
                    entry.error = Some(failure.to_string());
                    entry.recovery = failure.recovery;
                    report.failed.push(entry);
                }
            }
        }
        info!(
            "Resubmitted {} of {} jobs on {}",
            report.resubmitted.len(),
            report.total(),
            self.scheduler.name()
        );
        report
    }

    /// The state machine for one job.
    ///
    /// If a step after the hold fails, a job that was running is released again
    /// unedited and the failure says so.
    pub fn resubmit_job(
        &self,
        job: &ManagedJob,
        redirector: Option<&str>,
        sites: Option<&str>,
    ) -> std::result::Result<(), JobFailure> {
        if self.options.dry_run {
            info!(
                "Dry run: would resubmit job={} id={} redirector={:?}",
                job.stdout, job.id, redirector
            );
            return Ok(());
        }
        let ids = [job.id];
        let was_running = job.status == JobStatus::Running;
        let was_idle = job.status == JobStatus::Idle;
        let log_dirs = self
            .options
            .log_dir
            .as_deref()
            .map(LogDirs::create)
            .transpose()
            .map_err(JobFailure::new)?;

        let mut log_file = log_dirs
            .as_ref()
            .map(|dirs| dirs.root.join(format!("{}.stdout", job.stdout)));
        if was_running {
            if let Some(dirs) = &log_dirs {
                let snapshot = dirs.tmp.join(format!("{}.stdout", job.stdout));
                match self.scheduler.tail(&job.id, TAIL_BYTES) {
                    Ok(text) => fs::write(&snapshot, text).map_err(JobFailure::new)?,
                    Err(e) => warn!("Could not tail job {}: {:#}", job.id, e),
                }
                log_file = Some(snapshot);
            }
            self.scheduler
                .act(&ids, JobAction::Hold)
                .map_err(JobFailure::new)?;
        }

        let edit = || -> anyhow::Result<()> {
            if !was_idle
                && let (Some(dirs), Some(log)) = (&log_dirs, &log_file)
            {
                dirs.backup(log, &job.stdout)?;
            }

            if let Some(redirector) = redirector {
                let field = job.argument_attribute.as_deref().unwrap_or("Arguments");
                let mut arguments = job.arguments.clone();
                arguments.set(REDIRECTOR_FLAG, redirector);
                self.scheduler
                    .edit(&ids, field, &arguments.to_scheduler_value())?;
            }

            for counter in RESET_COUNTERS {
                self.scheduler.edit(&ids, counter, "0")?;
            }

            if let Some(sites) = sites {
                self.scheduler
                    .edit(&ids, SITES_ATTRIBUTE, &format!("\"{}\"", sites))?;
            }

            for (field, value) in &self.options.edits {
                self.scheduler.edit(&ids, field, value)?;
            }
            Ok(())
        };
        if let Err(error) = edit() {
            return Err(JobFailure {
                error,
                recovery: was_running.then(|| self.release_unedited(job)),
            });
        }

        if !was_idle {
            self.scheduler
                .act(&ids, JobAction::Release)
                .map_err(|error| JobFailure {
                    error,
                    recovery: was_running.then_some(Recovery::StillHeld),
                })?;
        }
        debug!("Resubmitted job={} id={}", job.stdout, job.id);
        Ok(())
    }

    fn release_unedited(&self, job: &ManagedJob) -> Recovery {
        match self.scheduler.act(&[job.id], JobAction::Release) {
            Ok(()) => {
                warn!("Released job {} without its edits", job.id);
                Recovery::Released
            }
            Err(e) => {
                error!("Job {} left held, release failed: {:#}", job.id, e);
                Recovery::StillHeld
            }
        }
    }
}

/// Log directory with its `backup` and `tmp` subdirectories.
struct LogDirs {
    root: PathBuf,
    backup: PathBuf,
    tmp: PathBuf,
}

impl LogDirs {
    fn create(root: &Path) -> anyhow::Result<Self> {
        let dirs = Self {
            root: root.to_path_buf(),
            backup: root.join("backup"),
            tmp: root.join("tmp"),
        };
        fs::create_dir_all(&dirs.backup)?;
        fs::create_dir_all(&dirs.tmp)?;
        Ok(dirs)
    }

    /// Copy `log` to `backup/<stdout>_<n>.stdout`, one past the highest existing `n`.
    fn backup(&self, log: &Path, stdout: &str) -> anyhow::Result<()> {
        if !log.is_file() {
            return Ok(());
        }
        let prefix = format!("{}_", stdout);
        let next = fs::read_dir(&self.backup)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_prefix(&prefix)?
                    .strip_suffix(".stdout")?
                    .parse::<u32>()
                    .ok()
            })
            .max()
            .map_or(0, |n| n + 1);
        let target = self.backup.join(format!("{}{}.stdout", prefix, next));
        fs::copy(log, &target)?;
        debug!("Backed up {} to {}", log.display(), target.display());
        Ok(())
    }
}

/// Result of a locality-aware resubmission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteResubmitReport {
    pub resubmitted: Vec<SiteResolution>,
    /// No acceptable site and no fallback redirector
    pub not_resubmitted: Vec<SiteResolution>,
    pub failed: Vec<(SiteResolution, String)>,
}

/// Resolve each job's input site and resubmit it reading from there.
///
/// Jobs without a resolved site use `options.redirector` as a fallback, or are left
/// untouched when there is none. A dry run produces the same partition without
/// touching the scheduler.
pub fn site_resubmit(
    scheduler: &dyn SchedulerInterface,
    jobs: &[ManagedJob],
    source: &InputSource,
    resolver: &SiteResolver,
    options: &ResubmitOptions,
    default_redirector: &str,
    use_stdout: bool,
) -> SiteResubmitReport {
    let inputs: Vec<(String, Option<String>)> = jobs
        .iter()
        .map(|job| (job.label(use_stdout).to_string(), source.input_for(job)))
        .collect();
    let resolutions = resolver.resolve_many(&inputs);
    let resubmitter = Resubmitter::new(scheduler, options);

    let mut report = SiteResubmitReport::default();
    for (job, resolution) in jobs.iter().zip(resolutions) {
        let redirector = match resolution.best.as_deref() {
            Some(site) => match parse_redirector(site, default_redirector) {
                Ok(redirector) => Some(redirector),
                Err(e) => {
                    report.failed.push((resolution, e.to_string()));
                    continue;
                }
            },
            None => options.redirector.clone(),
        };
        let Some(redirector) = redirector else {
            report.not_resubmitted.push(resolution);
            continue;
        };
        match resubmitter.resubmit_job(job, Some(&redirector), None) {
            Ok(()) => report.resubmitted.push(resolution),
            Err(failure) => {
                warn!("Resubmission failed for job {}: {}", job.id, failure);
                report.failed.push((resolution, failure.to_string()));
            }
        }
    }
    report
}
