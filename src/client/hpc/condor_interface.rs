//! HTCondor scheduler interface implementation

use anyhow::{Context, Result};
use log::{debug, error, info, trace};
use std::env;
use std::path::Path;
use std::process::Command;

use super::common::{JobAction, SchedulerRecord};
use super::scheduler_interface::SchedulerInterface;
use crate::client::queue_clause::QueueClause;
use crate::models::JobId;

/// Name reported for the local schedd.
pub const LOCAL_SCHEDD: &str = "local";

/// HTCondor access through its command-line tools.
///
/// Each tool can be replaced by setting `PRODJOBS_FAKE_<TOOL>` (e.g.
/// `PRODJOBS_FAKE_CONDOR_Q`) to an executable path.
#[derive(Debug, Clone)]
pub struct CondorInterface {
    schedd: Option<String>,
    pool: Option<String>,
}

impl CondorInterface {
    pub fn new(schedd: Option<String>, pool: Option<String>) -> Self {
        Self { schedd, pool }
    }

    /// The schedd on this machine.
    pub fn local() -> Self {
        Self::new(None, None)
    }

    fn get_exec(tool: &str) -> String {
        env::var(format!("PRODJOBS_FAKE_{}", tool.to_uppercase()))
            .unwrap_or_else(|_| tool.to_string())
    }

    /// `-name`/`-pool` arguments addressing this schedd.
    fn location_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(schedd) = &self.schedd {
            args.push("-name".to_string());
            args.push(schedd.clone());
        }
        if let Some(pool) = &self.pool {
            args.push("-pool".to_string());
            args.push(pool.clone());
        }
        args
    }

    fn run_command(&self, tool: &str, args: &[String]) -> Result<String> {
        let cmd = Self::get_exec(tool);
        trace!("Running command: {} {:?}", cmd, args);
        let output = Command::new(&cmd)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {}", cmd))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            error!(
                "{} failed on {}: {}",
                tool,
                self.name(),
                stderr.trim()
            );
            return Err(anyhow::anyhow!(
                "{} command failed: {} - {}",
                tool,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }
        Ok(stdout)
    }

    fn parse_records(tool: &str, stdout: &str) -> Result<Vec<SchedulerRecord>> {
        trace!("{} output: [{}]", tool, stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(stdout).with_context(|| format!("Unexpected {} output", tool))
    }

    fn query_args(&self, constraint: &str, fields: &[&str]) -> Vec<String> {
        let mut args = self.location_args();
        args.push("-json".to_string());
        if !fields.is_empty() {
            args.push("-attributes".to_string());
            args.push(fields.join(","));
        }
        if !constraint.is_empty() {
            args.push("-constraint".to_string());
            args.push(constraint.to_string());
        }
        args
    }
}

impl SchedulerInterface for CondorInterface {
    fn name(&self) -> &str {
        self.schedd.as_deref().unwrap_or(LOCAL_SCHEDD)
    }

    fn query(&self, constraint: &str, fields: &[&str]) -> Result<Vec<SchedulerRecord>> {
        let args = self.query_args(constraint, fields);
        let stdout = self.run_command("condor_q", &args)?;
        let records = Self::parse_records("condor_q", &stdout)?;
        debug!("{} jobs matched on {}", records.len(), self.name());
        Ok(records)
    }

    fn history(
        &self,
        constraint: &str,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<SchedulerRecord>> {
        let mut args = self.query_args(constraint, fields);
        args.push("-limit".to_string());
        args.push(limit.to_string());
        let stdout = self.run_command("condor_history", &args)?;
        Self::parse_records("condor_history", &stdout)
    }

    fn edit(&self, ids: &[JobId], field: &str, value: &str) -> Result<()> {
        for id in ids {
            let mut args = self.location_args();
            args.push(id.to_string());
            args.push(field.to_string());
            args.push(value.to_string());
            self.run_command("condor_qedit", &args)
                .with_context(|| format!("Failed to set {} on job {}", field, id))?;
        }
        Ok(())
    }

    fn act(&self, ids: &[JobId], action: JobAction) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tool = match action {
            JobAction::Hold => "condor_hold",
            JobAction::Release => "condor_release",
            JobAction::Remove => "condor_rm",
        };
        let mut args = self.location_args();
        args.extend(ids.iter().map(JobId::to_string));
        self.run_command(tool, &args)
            .with_context(|| format!("Failed to {} {} job(s)", action, ids.len()))?;
        Ok(())
    }

    fn submit(&self, jdl: &Path, queue: Option<&QueueClause>) -> Result<String> {
        let mut args = self.location_args();
        args.push(jdl.display().to_string());
        if let Some(queue) = queue {
            args.push("-queue".to_string());
            args.push(queue.submit_value());
        }
        let stdout = self.run_command("condor_submit", &args)?;
        info!("Submitted {}", jdl.display());
        Ok(stdout)
    }

    fn tail(&self, id: &JobId, max_bytes: u64) -> Result<String> {
        let mut args = self.location_args();
        args.push("-maxbytes".to_string());
        args.push(max_bytes.to_string());
        args.push(id.to_string());
        self.run_command("condor_tail", &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_args() {
        let remote = CondorInterface::new(
            Some("schedd1.example.org".to_string()),
            Some("collector.example.org".to_string()),
        );
        assert_eq!(
            remote.location_args(),
            vec![
                "-name",
                "schedd1.example.org",
                "-pool",
                "collector.example.org"
            ]
        );
        assert!(CondorInterface::local().location_args().is_empty());
    }

    #[test]
    fn test_query_args() {
        let condor = CondorInterface::local();
        let args = condor.query_args("Owner==\"alice\"", &["ClusterId", "ProcId"]);
        assert_eq!(
            args,
            vec![
                "-json",
                "-attributes",
                "ClusterId,ProcId",
                "-constraint",
                "Owner==\"alice\""
            ]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        let records = CondorInterface::parse_records("condor_q", "\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_records() {
        let stdout = r#"[
            {"ClusterId": 10, "ProcId": 0, "JobStatus": 1, "Out": "job_0_10.stdout"},
            {"ClusterId": 10, "ProcId": 1, "JobStatus": 5, "HoldReason": "memory"}
        ]"#;
        let records = CondorInterface::parse_records("condor_q", stdout).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].hold_reason.as_deref(), Some("memory"));
    }

    #[test]
    fn test_garbage_output_is_an_error() {
        assert!(CondorInterface::parse_records("condor_q", "not json").is_err());
    }
}
