//! Core data model shared by every component: job identities, scheduler job ids,
//! scheduler status codes and replica candidates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical identity of one logical job: `base_name + "_" + ordinal`.
///
/// This is the unit of comparison between the expected, completed and active sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub base_name: String,
    pub ordinal: u32,
}

impl JobIdentity {
    pub fn new(base_name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            base_name: base_name.into(),
            ordinal,
        }
    }

    /// Recover an identity from its rendered form. The ordinal is everything after the
    /// last underscore, so base names may themselves contain underscores.
    pub fn parse(rendered: &str) -> Option<Self> {
        let (base, ordinal) = rendered.rsplit_once('_')?;
        if base.is_empty() {
            return None;
        }
        let ordinal = ordinal.parse::<u32>().ok()?;
        Some(Self::new(base, ordinal))
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base_name, self.ordinal)
    }
}

/// Scheduler-side id of a submitted process (`ClusterId.ProcId`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: i64,
    pub process: i64,
}

impl JobId {
    pub fn new(cluster: i64, process: i64) -> Self {
        Self { cluster, process }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.process)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cluster, process) = s
            .split_once('.')
            .ok_or_else(|| format!("Invalid job id: {}", s))?;
        let cluster = cluster
            .parse()
            .map_err(|_| format!("Invalid cluster id in {}", s))?;
        let process = process
            .parse()
            .map_err(|_| format!("Invalid process id in {}", s))?;
        Ok(Self { cluster, process })
    }
}

/// HTCondor `JobStatus` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum JobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    Unknown(i64),
}

impl JobStatus {
    /// Removed and completed jobs are no longer in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Removed | JobStatus::Completed)
    }

    pub fn code(&self) -> i64 {
        i64::from(*self)
    }
}

impl From<i64> for JobStatus {
    fn from(code: i64) -> Self {
        match code {
            1 => JobStatus::Idle,
            2 => JobStatus::Running,
            3 => JobStatus::Removed,
            4 => JobStatus::Completed,
            5 => JobStatus::Held,
            6 => JobStatus::TransferringOutput,
            7 => JobStatus::Suspended,
            other => JobStatus::Unknown(other),
        }
    }
}

impl From<JobStatus> for i64 {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Idle => 1,
            JobStatus::Running => 2,
            JobStatus::Removed => 3,
            JobStatus::Completed => 4,
            JobStatus::Held => 5,
            JobStatus::TransferringOutput => 6,
            JobStatus::Suspended => 7,
            JobStatus::Unknown(code) => code,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Removed => write!(f, "removed"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Held => write!(f, "held"),
            JobStatus::TransferringOutput => write!(f, "transferring_output"),
            JobStatus::Suspended => write!(f, "suspended"),
            JobStatus::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// One location holding a copy of an input file, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateReplica {
    pub site_label: String,
    pub is_tape_only: bool,
}

impl CandidateReplica {
    /// Build a candidate from a raw catalog label such as `T1_US_FNAL_Disk`.
    pub fn from_label(label: &str) -> Self {
        Self {
            site_label: label.to_string(),
            is_tape_only: label.contains("Tape"),
        }
    }

    /// Label with the `_Disk` storage qualifier removed.
    pub fn normalized_label(&self) -> String {
        self.site_label.replace("_Disk", "")
    }
}
