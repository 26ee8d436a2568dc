//! Shared fakes for the integration tests: a recording scheduler, an in-memory
//! replica catalog and an in-memory output store.

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use prodjobs::client::ProdError;
use prodjobs::client::catalog::Catalog;
use prodjobs::client::hpc::{JobAction, SchedulerInterface, SchedulerRecord};
use prodjobs::client::job_query::ManagedJob;
use prodjobs::client::queue_clause::QueueClause;
use prodjobs::client::storage::StoreLister;
use prodjobs::models::{JobId, JobStatus};
use prodjobs::time_utils::TimeWindow;

/// One mutating or reading call observed by [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(String),
    History(String, usize),
    Edit {
        id: JobId,
        field: String,
        value: String,
    },
    Act {
        id: JobId,
        action: JobAction,
    },
    Submit {
        jdl: PathBuf,
        queue: Option<String>,
    },
    Tail(JobId),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Edit { .. } | Call::Act { .. } | Call::Submit { .. })
    }
}

/// In-memory scheduler that records every call.
///
/// The call log is shared so a boxed instance can still be inspected.
#[derive(Clone, Default)]
pub struct RecordingScheduler {
    pub name: String,
    pub records: Vec<SchedulerRecord>,
    pub history: Vec<SchedulerRecord>,
    /// Every query fails
    pub unreachable: bool,
    /// Edits on these jobs fail
    pub failing_jobs: BTreeSet<JobId>,
    /// These actions on these jobs fail
    pub failing_actions: Vec<(JobId, JobAction)>,
    /// Submissions of description files with these names fail
    pub failing_submits: BTreeSet<String>,
    pub tail_text: String,
    pub calls: Rc<RefCell<Vec<Call>>>,
}

impl RecordingScheduler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tail_text: "last lines of output\n".to_string(),
            ..Default::default()
        }
    }

    pub fn with_records(mut self, records: Vec<SchedulerRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn failing_on(mut self, id: JobId) -> Self {
        self.failing_jobs.insert(id);
        self
    }

    pub fn failing_action(mut self, id: JobId, action: JobAction) -> Self {
        self.failing_actions.push((id, action));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    /// Calls made on one job, in order.
    pub fn calls_for(&self, id: JobId) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::Edit { id: i, .. } | Call::Act { id: i, .. } | Call::Tail(i) => *i == id,
                _ => false,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl SchedulerInterface for RecordingScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, constraint: &str, _fields: &[&str]) -> Result<Vec<SchedulerRecord>> {
        self.record(Call::Query(constraint.to_string()));
        if self.unreachable {
            return Err(anyhow!("schedd {} unreachable", self.name));
        }
        Ok(self.records.clone())
    }

    fn history(
        &self,
        constraint: &str,
        _fields: &[&str],
        limit: usize,
    ) -> Result<Vec<SchedulerRecord>> {
        self.record(Call::History(constraint.to_string(), limit));
        if self.unreachable {
            return Err(anyhow!("schedd {} unreachable", self.name));
        }
        Ok(self.history.iter().take(limit).cloned().collect())
    }

    fn edit(&self, ids: &[JobId], field: &str, value: &str) -> Result<()> {
        for id in ids {
            self.record(Call::Edit {
                id: *id,
                field: field.to_string(),
                value: value.to_string(),
            });
            if self.failing_jobs.contains(id) {
                return Err(anyhow!("condor_qedit {} {} failed", id, field));
            }
        }
        Ok(())
    }

    fn act(&self, ids: &[JobId], action: JobAction) -> Result<()> {
        for id in ids {
            self.record(Call::Act {
                id: *id,
                action,
            });
            if self.failing_actions.contains(&(*id, action)) {
                return Err(anyhow!("condor {:?} {} failed", action, id));
            }
        }
        Ok(())
    }

    fn submit(&self, jdl: &Path, queue: Option<&QueueClause>) -> Result<String> {
        self.record(Call::Submit {
            jdl: jdl.to_path_buf(),
            queue: queue.map(QueueClause::submit_value),
        });
        let file_name = jdl
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing_submits.contains(&file_name) {
            return Err(anyhow!("condor_submit {} failed", file_name));
        }
        Ok(format!("1 job(s) submitted to cluster 1000 ({})", file_name))
    }

    fn tail(&self, id: &JobId, _max_bytes: u64) -> Result<String> {
        self.record(Call::Tail(*id));
        Ok(self.tail_text.clone())
    }
}

/// Catalog answering from a fixed map; unknown files fail the lookup.
#[derive(Default)]
pub struct MapCatalog {
    pub sites: BTreeMap<String, Vec<String>>,
}

impl MapCatalog {
    pub fn with(mut self, file: &str, sites: &[&str]) -> Self {
        self.sites.insert(
            file.to_string(),
            sites.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

impl Catalog for MapCatalog {
    fn sites_for(&self, file: &str) -> Result<Vec<String>> {
        self.sites
            .get(file)
            .cloned()
            .ok_or_else(|| anyhow!("WARNING: no replicas known for {}", file))
    }
}

/// Output store returning a fixed listing.
#[derive(Default)]
pub struct FixedStore {
    pub names: Vec<String>,
    pub fail: bool,
}

impl FixedStore {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            names: Vec::new(),
            fail: true,
        }
    }
}

impl StoreLister for FixedStore {
    fn list(&self, path: &str, _window: &TimeWindow) -> Result<Vec<String>> {
        if self.fail {
            return Err(ProdError::external(format!("xrdfs ls {} failed", path)).into());
        }
        Ok(self
            .names
            .iter()
            .map(|n| format!("{}/{}", path.trim_end_matches('/'), n))
            .collect())
    }
}

/// Scheduler record for `<name>_<counter>.stdout` in the given state.
pub fn record(cluster: i64, process: i64, stdout: &str, status: JobStatus) -> SchedulerRecord {
    SchedulerRecord {
        cluster_id: Some(cluster),
        proc_id: Some(process),
        out: Some(format!("logs/{}.stdout", stdout)),
        status: Some(status),
        args: Some(format!("-S step1.sh -x root://cmseos.fnal.gov/ -N {}", process)),
        desired_sites: Some("T1_US_FNAL,T2_US_MIT".to_string()),
        ..Default::default()
    }
}

pub fn managed_job(cluster: i64, process: i64, stdout: &str, status: JobStatus) -> ManagedJob {
    ManagedJob::from_record(record(cluster, process, stdout, status), "schedd1")
        .expect("record has id and output")
}
