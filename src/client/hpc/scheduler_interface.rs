//! Scheduler abstraction

use anyhow::Result;

use std::path::Path;

use super::common::{JobAction, SchedulerRecord};
use crate::client::queue_clause::QueueClause;
use crate::models::JobId;

/// Operations the core needs from a batch scheduler.
///
/// Implementations make exactly one attempt per call; callers decide whether a
/// failure is fatal, degraded or scoped to one job.
pub trait SchedulerInterface {
    /// Label used in logs and reports (the schedd name).
    fn name(&self) -> &str;

    /// Jobs currently in the queue matching `constraint`.
    fn query(&self, constraint: &str, fields: &[&str]) -> Result<Vec<SchedulerRecord>>;

    /// Up to `limit` finished jobs matching `constraint`, most recent first.
    fn history(
        &self,
        constraint: &str,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<SchedulerRecord>>;

    /// Set `field` to the (already quoted) `value` on every listed job.
    fn edit(&self, ids: &[JobId], field: &str, value: &str) -> Result<()>;

    /// Apply an action to every listed job.
    fn act(&self, ids: &[JobId], action: JobAction) -> Result<()>;

    /// Submit a job description, optionally overriding its dispatch statement.
    /// Returns the scheduler's report.
    fn submit(&self, jdl: &Path, queue: Option<&QueueClause>) -> Result<String>;

    /// Last `max_bytes` of a running job's stdout.
    fn tail(&self, id: &JobId, max_bytes: u64) -> Result<String>;
}
