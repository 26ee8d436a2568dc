//! State reconciliation: which expected jobs are neither finished nor in flight.
//!
//! Three sets of [`JobIdentity`] are compared. `expected` comes from the declared
//! ordinals of a job, `completed` from a listing of the durable output store and
//! `active` from the scheduler queue. Every invocation recomputes all three from
//! fresh external state; nothing is persisted between runs.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::client::errors::{ProdError, Result};
use crate::client::hpc::{SchedulerInterface, SchedulerRecord};
use crate::client::storage::StoreLister;
use crate::models::{JobIdentity, JobStatus};
use crate::time_utils::TimeWindow;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Printed when reconciliation finds nothing to resubmit.
pub const NOTHING_MISSING: &str = "No missing jobs!";

/// `missing = expected - completed - active`.
pub fn reconcile(
    expected: &BTreeSet<JobIdentity>,
    completed: &BTreeSet<JobIdentity>,
    active: &BTreeSet<JobIdentity>,
) -> BTreeSet<JobIdentity> {
    expected
        .iter()
        .filter(|id| !completed.contains(id) && !active.contains(id))
        .cloned()
        .collect()
}

/// Identities of stored outputs: last path segment minus `suffix`.
pub fn completed_from_listing(names: &[String], suffix: &str) -> BTreeSet<JobIdentity> {
    names
        .iter()
        .filter_map(|name| {
            let file = name.rsplit('/').next().unwrap_or(name);
            let stem = file.strip_suffix(suffix).unwrap_or(file);
            JobIdentity::parse(stem)
        })
        .collect()
}

/// Identities of queued jobs that have not reached a terminal state.
pub fn active_from_records(records: &[SchedulerRecord]) -> BTreeSet<JobIdentity> {
    records
        .iter()
        .filter(|r| !r.status.is_some_and(|s| s.is_terminal()))
        .filter_map(SchedulerRecord::identity)
        .collect()
}

/// Map identities produced under a chain name back to the job's own name.
///
/// Best effort: the substitution is textual, so a chain name that also occurs
/// inside unrelated job names will rename those too.
pub fn apply_alias(
    active: &BTreeSet<JobIdentity>,
    chain_name: &str,
    name: &str,
) -> BTreeSet<JobIdentity> {
    if chain_name.is_empty() {
        return active.clone();
    }
    active
        .iter()
        .map(|id| {
            let renamed = id.to_string().replace(chain_name, name);
            JobIdentity::parse(&renamed).unwrap_or_else(|| id.clone())
        })
        .collect()
}

/// Scheduler constraint selecting a user's non-terminal jobs.
pub fn active_constraint(user: &str) -> String {
    let mut constraint = format!(
        "JobStatus!={} && JobStatus!={}",
        JobStatus::Removed.code(),
        JobStatus::Completed.code()
    );
    if !user.is_empty() {
        constraint.push_str(&format!(" && Owner==\"{}\"", user));
    }
    constraint
}

/// Active identities gathered across schedds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActiveJobs {
    pub identities: BTreeSet<JobIdentity>,
    /// Schedds that could not be queried
    pub unreachable: Vec<String>,
    /// True when no schedd answered, so running jobs are not excluded
    pub degraded: bool,
}

/// Query every schedd for the user's active jobs.
///
/// A schedd that fails is skipped with a warning. When none answers, the result is
/// empty and marked degraded rather than failing the reconciliation.
pub fn query_active(schedulers: &[Box<dyn SchedulerInterface>], user: &str) -> ActiveJobs {
    let constraint = active_constraint(user);
    let mut active = ActiveJobs::default();
    let mut answered = 0;
    for scheduler in schedulers {
        match scheduler.query(&constraint, &["Out", "JobStatus"]) {
            Ok(records) => {
                answered += 1;
                active.identities.extend(active_from_records(&records));
            }
            Err(e) => {
                warn!("Could not query schedd {}: {:#}", scheduler.name(), e);
                active.unreachable.push(scheduler.name().to_string());
            }
        }
    }
    if answered == 0 {
        warn!("No scheduler reachable; missing-jobs check will not consider running jobs");
        active.degraded = true;
    }
    debug!(
        "Active jobs identities={} unreachable={}",
        active.identities.len(),
        active.unreachable.len()
    );
    active
}

/// List the durable store and recover completed identities.
pub fn query_completed(
    store: &dyn StoreLister,
    output: &str,
    window: &TimeWindow,
    suffix: &str,
) -> Result<BTreeSet<JobIdentity>> {
    let names = store
        .list(output, window)
        .map_err(|e| ProdError::external(format!("listing {} failed: {:#}", output, e)))?;
    Ok(completed_from_listing(&names, suffix))
}

/// The three identity sets of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationSnapshot {
    pub expected: BTreeSet<JobIdentity>,
    pub completed: BTreeSet<JobIdentity>,
    pub active: BTreeSet<JobIdentity>,
}

impl ReconciliationSnapshot {
    pub fn new(
        expected: BTreeSet<JobIdentity>,
        completed: BTreeSet<JobIdentity>,
        active: BTreeSet<JobIdentity>,
    ) -> Self {
        Self {
            expected,
            completed,
            active,
        }
    }

    pub fn missing(&self) -> BTreeSet<JobIdentity> {
        reconcile(&self.expected, &self.completed, &self.active)
    }
}

/// Output of a missing-jobs check: submission commands or bare identities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResubmitPlan {
    pub lines: Vec<String>,
}

impl ResubmitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn extend_identities(&mut self, missing: &BTreeSet<JobIdentity>) {
        self.lines.extend(missing.iter().map(JobIdentity::to_string));
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Write the plan as an executable shell script.
    pub fn write_script(&self, path: &Path) -> Result<()> {
        let context = || format!("Failed to write {}", path.display());
        let mut file = fs::File::create(path).map_err(|e| ProdError::io(context(), e))?;
        let mut body = String::from("#!/bin/bash\n\n");
        for line in &self.lines {
            body.push_str(line);
            body.push('\n');
        }
        file.write_all(body.as_bytes())
            .map_err(|e| ProdError::io(context(), e))?;

        #[cfg(unix)]
        {
            let mut perms = fs::metadata(path)
                .map_err(|e| ProdError::io(context(), e))?
                .permissions();
            perms.set_mode(perms.mode() | 0o111);
            fs::set_permissions(path, perms).map_err(|e| ProdError::io(context(), e))?;
        }
        info!("Wrote {} resubmission lines to {}", self.lines.len(), path.display());
        Ok(())
    }

    /// Write the script when requested, otherwise return the lines to print.
    pub fn finish(&self, resub: Option<&Path>) -> Result<Vec<String>> {
        if self.is_empty() {
            return Ok(vec![NOTHING_MISSING.to_string()]);
        }
        match resub {
            Some(path) => {
                self.write_script(path)?;
                Ok(Vec::new())
            }
            None => Ok(self.lines.clone()),
        }
    }
}
