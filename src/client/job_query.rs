//! Selecting a user's jobs from the scheduler for listing and management.

use anyhow::Result;
use log::{debug, warn};
use serde::Serialize;

use crate::client::arguments::ArgumentList;
use crate::client::hpc::common::QUERY_ATTRIBUTES;
use crate::client::hpc::{SchedulerInterface, SchedulerRecord};
use crate::client::errors::ProdError;
use crate::models::{JobId, JobStatus};

/// Which part of the queue (or history) to look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StateFilter {
    #[default]
    All,
    Held,
    Running,
    Idle,
    /// The last N finished jobs, from history
    Finished(usize),
}

impl StateFilter {
    /// Pick the single requested state; the flags are mutually exclusive.
    pub fn from_flags(
        held: bool,
        running: bool,
        idle: bool,
        finished: usize,
    ) -> Result<Self, ProdError> {
        let selected = [held, running, idle, finished > 0]
            .iter()
            .filter(|f| **f)
            .count();
        if selected > 1 {
            return Err(ProdError::config(
                "--held, --running, --idle and --finished are exclusive, pick one",
            ));
        }
        Ok(if held {
            StateFilter::Held
        } else if running {
            StateFilter::Running
        } else if idle {
            StateFilter::Idle
        } else if finished > 0 {
            StateFilter::Finished(finished)
        } else {
            StateFilter::All
        })
    }
}

/// Selection criteria for the job manager.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: StateFilter,
    /// Keep only running jobs without a progress update within the threshold
    pub stuck: bool,
    pub stuck_threshold_hours: f64,
    /// Keep jobs whose output name or hold reason contains any of these
    pub grep: Vec<String>,
    /// Drop jobs whose output name or hold reason contains any of these
    pub vgrep: Vec<String>,
    /// Attributes to fetch in addition to the standard set
    pub extra_attributes: Vec<String>,
}

impl JobFilter {
    pub fn constraint(&self, user: &str) -> String {
        let mut constraint = format!("Owner==\"{}\"", user);
        let state = if self.stuck {
            StateFilter::Running
        } else {
            self.state
        };
        let code = match state {
            StateFilter::Held => Some(JobStatus::Held),
            StateFilter::Running => Some(JobStatus::Running),
            StateFilter::Idle => Some(JobStatus::Idle),
            StateFilter::All | StateFilter::Finished(_) => None,
        };
        if let Some(status) = code {
            constraint.push_str(&format!(" && JobStatus=={}", status.code()));
        }
        constraint
    }

    pub fn attributes(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = QUERY_ATTRIBUTES.to_vec();
        fields.extend(self.extra_attributes.iter().map(String::as_str));
        fields
    }

    /// Apply grep/vgrep and the stuck check. A stuck job gets its hold reason
    /// replaced with how long it has been silent.
    pub fn accept(&self, mut record: SchedulerRecord) -> Option<SchedulerRecord> {
        let mut haystack = record.out.clone().unwrap_or_default();
        if let Some(reason) = &record.hold_reason {
            haystack.push(' ');
            haystack.push_str(reason);
        }
        if !self.grep.is_empty() && !self.grep.iter().any(|g| haystack.contains(g.as_str())) {
            return None;
        }
        if self.vgrep.iter().any(|v| haystack.contains(v.as_str())) {
            return None;
        }
        if self.stuck {
            let now = record.server_time.unwrap_or(0);
            let update = record.last_update.unwrap_or(0);
            let silent = now - update;
            let threshold = (self.stuck_threshold_hours * 3600.0) as i64;
            if now > 0 && update > 0 && silent > threshold {
                record.hold_reason = Some(format!("Job stuck for {} hours", silent / 3600));
            } else {
                return None;
            }
        }
        Some(record)
    }
}

/// A job as presented and manipulated by the job manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedJob {
    pub id: JobId,
    pub schedd: String,
    /// Output file name without extension
    pub stdout: String,
    /// Logical job name (output name minus the submission counter)
    pub name: String,
    pub status: JobStatus,
    pub hold_reason: String,
    /// Which attribute carries the arguments (`Args` or `Arguments`)
    pub argument_attribute: Option<String>,
    #[serde(skip)]
    pub arguments: ArgumentList,
    pub desired_sites: String,
    pub matched_site: String,
    pub machine: String,
    pub hours: f64,
    pub events: i64,
    pub rate: f64,
    #[serde(skip)]
    pub record: SchedulerRecord,
}

impl ManagedJob {
    /// Build the view; records without an id or output file are skipped.
    pub fn from_record(record: SchedulerRecord, schedd: &str) -> Option<Self> {
        let id = record.job_id()?;
        let stdout = record.stdout_name()?;
        let name = record.job_name().unwrap_or_else(|| stdout.clone());
        let hours = record.elapsed_secs.unwrap_or(0.0) / 3600.0;
        let events = record.events.unwrap_or(0);
        let rate = if hours > 0.0 {
            events as f64 / (hours * 3600.0)
        } else {
            0.0
        };
        let (argument_attribute, arguments) = match record.argument_field() {
            Some((field, value)) => (Some(field.to_string()), ArgumentList::parse(value)),
            None => (None, ArgumentList::default()),
        };
        Some(Self {
            id,
            schedd: schedd.to_string(),
            name,
            stdout,
            status: record.status.unwrap_or(JobStatus::Unknown(0)),
            hold_reason: record.hold_reason.clone().unwrap_or_default(),
            argument_attribute,
            arguments,
            desired_sites: record.desired_sites.clone().unwrap_or_default(),
            matched_site: record.matched_site.clone().unwrap_or_default(),
            machine: record.machine().unwrap_or_default(),
            hours,
            events,
            rate,
            record,
        })
    }

    /// Name or output-file label used in listings and reports.
    pub fn label(&self, use_stdout: bool) -> &str {
        if use_stdout { &self.stdout } else { &self.name }
    }
}

/// Fetch and filter a user's jobs from one schedd.
pub fn select_jobs(
    scheduler: &dyn SchedulerInterface,
    user: &str,
    filter: &JobFilter,
) -> Result<Vec<ManagedJob>> {
    let constraint = filter.constraint(user);
    let fields = filter.attributes();
    let records = match filter.state {
        StateFilter::Finished(limit) => scheduler.history(&constraint, &fields, limit)?,
        _ => scheduler.query(&constraint, &fields)?,
    };
    let total = records.len();
    let jobs: Vec<ManagedJob> = records
        .into_iter()
        .filter_map(|r| filter.accept(r))
        .filter_map(|r| ManagedJob::from_record(r, scheduler.name()))
        .collect();
    debug!(
        "Selected jobs schedd={} matched={} kept={}",
        scheduler.name(),
        total,
        jobs.len()
    );
    Ok(jobs)
}

/// A schedd that could not be queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreachableSchedd {
    pub schedd: String,
    pub error: String,
}

/// Totals of a mutating command run across schedds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub selected: usize,
    pub failed: usize,
    pub unreachable: Vec<UnreachableSchedd>,
}

impl BatchSummary {
    /// No job selected and every schedd answered.
    pub fn is_empty(&self) -> bool {
        self.selected == 0 && self.unreachable.is_empty()
    }

    /// `PartialFailure` when a job failed or a schedd was unreachable; each
    /// unreachable schedd counts as one failed unit.
    pub fn check(&self) -> Result<(), ProdError> {
        let failed = self.failed + self.unreachable.len();
        if failed == 0 {
            Ok(())
        } else {
            Err(ProdError::PartialFailure {
                failed,
                total: self.selected + self.unreachable.len(),
            })
        }
    }
}

/// Select jobs on every schedd and hand each non-empty selection to `act`,
/// which returns how many of those jobs failed. An unreachable schedd is recorded
/// and the remaining schedds are still processed.
pub fn for_each_selection<F>(
    schedulers: &[Box<dyn SchedulerInterface>],
    user: &str,
    filter: &JobFilter,
    mut act: F,
) -> BatchSummary
where
    F: FnMut(&dyn SchedulerInterface, &[ManagedJob]) -> usize,
{
    let mut summary = BatchSummary::default();
    for scheduler in schedulers {
        let jobs = match select_jobs(scheduler.as_ref(), user, filter) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Could not query schedd {}: {:#}", scheduler.name(), e);
                summary.unreachable.push(UnreachableSchedd {
                    schedd: scheduler.name().to_string(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        };
        if jobs.is_empty() {
            continue;
        }
        summary.selected += jobs.len();
        summary.failed += act(scheduler.as_ref(), &jobs);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(json: &str) -> SchedulerRecord {
        serde_json::from_str(json).unwrap()
    }

    #[rstest]
    #[case(StateFilter::All, false, "Owner==\"alice\"")]
    #[case(StateFilter::Held, false, "Owner==\"alice\" && JobStatus==5")]
    #[case(StateFilter::Idle, false, "Owner==\"alice\" && JobStatus==1")]
    #[case(StateFilter::All, true, "Owner==\"alice\" && JobStatus==2")]
    #[case(StateFilter::Finished(10), false, "Owner==\"alice\"")]
    fn test_constraint(#[case] state: StateFilter, #[case] stuck: bool, #[case] expected: &str) {
        let filter = JobFilter {
            state,
            stuck,
            ..Default::default()
        };
        assert_eq!(filter.constraint("alice"), expected);
    }

    #[test]
    fn test_exclusive_state_flags() {
        assert!(StateFilter::from_flags(true, true, false, 0).is_err());
        assert_eq!(
            StateFilter::from_flags(false, false, false, 5).unwrap(),
            StateFilter::Finished(5)
        );
        assert_eq!(
            StateFilter::from_flags(false, false, false, 0).unwrap(),
            StateFilter::All
        );
    }

    #[test]
    fn test_grep_and_vgrep() {
        let filter = JobFilter {
            grep: vec!["signal".to_string(), "memory".to_string()],
            vgrep: vec!["M1000".to_string()],
            ..Default::default()
        };
        assert!(filter.accept(record(r#"{"Out": "signal_M500_1_9.stdout"}"#)).is_some());
        assert!(
            filter
                .accept(record(r#"{"Out": "bkg_1_9.stdout", "HoldReason": "memory exceeded"}"#))
                .is_some()
        );
        assert!(filter.accept(record(r#"{"Out": "bkg_1_9.stdout"}"#)).is_none());
        assert!(filter.accept(record(r#"{"Out": "signal_M1000_1_9.stdout"}"#)).is_none());
    }

    #[test]
    fn test_stuck_detection() {
        let filter = JobFilter {
            stuck: true,
            stuck_threshold_hours: 12.0,
            ..Default::default()
        };
        let stuck = filter
            .accept(record(
                r#"{"Out": "a_1_9.stdout", "ServerTime": 100000, "ChirpCMSSWLastUpdate": 10000}"#,
            ))
            .unwrap();
        assert_eq!(stuck.hold_reason.as_deref(), Some("Job stuck for 25 hours"));
        assert!(
            filter
                .accept(record(
                    r#"{"Out": "a_1_9.stdout", "ServerTime": 100000, "ChirpCMSSWLastUpdate": 90000}"#,
                ))
                .is_none()
        );
        assert!(filter.accept(record(r#"{"Out": "a_1_9.stdout"}"#)).is_none());
    }

    #[test]
    fn test_managed_job_view() {
        let job = ManagedJob::from_record(
            record(
                r#"{"ClusterId": 7, "ProcId": 2, "Out": "sig_3_77.stdout", "JobStatus": 2,
                    "Arguments": "-x root://a/ -N 2", "ChirpCMSSWElapsed": 7200,
                    "ChirpCMSSWEvents": 3600, "MATCH_EXP_JOB_GLIDEIN_CMSSite": "T2_US_MIT",
                    "LastRemoteHost": "slot1@node7"}"#,
            ),
            "schedd1",
        )
        .unwrap();
        assert_eq!(job.id, JobId::new(7, 2));
        assert_eq!(job.name, "sig_3");
        assert_eq!(job.label(true), "sig_3_77");
        assert_eq!(job.argument_attribute.as_deref(), Some("Arguments"));
        assert_eq!(job.arguments.value_of("-x"), Some("root://a/"));
        assert_eq!(job.hours, 2.0);
        assert_eq!(job.rate, 0.5);
        assert_eq!(job.machine, "node7");
    }
}
