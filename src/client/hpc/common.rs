use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{JobId, JobIdentity, JobStatus};

/// Attributes requested for every job query.
pub const QUERY_ATTRIBUTES: &[&str] = &[
    "ClusterId",
    "ProcId",
    "HoldReason",
    "Out",
    "Args",
    "Arguments",
    "JobStatus",
    "ServerTime",
    "ChirpCMSSWLastUpdate",
    "ChirpCMSSWElapsed",
    "ChirpCMSSWEvents",
    "DESIRED_Sites",
    "MATCH_EXP_JOB_GLIDEIN_CMSSite",
    "RemoteHost",
    "LastRemoteHost",
];

/// Scheduler-side actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobAction {
    Hold,
    Release,
    Remove,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Hold => write!(f, "hold"),
            JobAction::Release => write!(f, "release"),
            JobAction::Remove => write!(f, "remove"),
        }
    }
}

/// One job as returned by a scheduler query.
///
/// Every attribute is optional: an attribute the scheduler did not return is `None`
/// rather than a lookup failure. Attributes not named here land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRecord {
    #[serde(rename = "ClusterId", default, deserialize_with = "lenient_i64")]
    pub cluster_id: Option<i64>,
    #[serde(rename = "ProcId", default, deserialize_with = "lenient_i64")]
    pub proc_id: Option<i64>,
    #[serde(rename = "Out", default)]
    pub out: Option<String>,
    #[serde(rename = "JobStatus", default, deserialize_with = "lenient_status")]
    pub status: Option<JobStatus>,
    #[serde(rename = "HoldReason", default)]
    pub hold_reason: Option<String>,
    #[serde(rename = "Args", default)]
    pub args: Option<String>,
    #[serde(rename = "Arguments", default)]
    pub arguments: Option<String>,
    #[serde(rename = "ServerTime", default, deserialize_with = "lenient_i64")]
    pub server_time: Option<i64>,
    #[serde(
        rename = "ChirpCMSSWLastUpdate",
        default,
        deserialize_with = "lenient_i64"
    )]
    pub last_update: Option<i64>,
    #[serde(rename = "ChirpCMSSWElapsed", default, deserialize_with = "lenient_f64")]
    pub elapsed_secs: Option<f64>,
    #[serde(rename = "ChirpCMSSWEvents", default, deserialize_with = "lenient_i64")]
    pub events: Option<i64>,
    #[serde(rename = "DESIRED_Sites", default)]
    pub desired_sites: Option<String>,
    #[serde(rename = "MATCH_EXP_JOB_GLIDEIN_CMSSite", default)]
    pub matched_site: Option<String>,
    #[serde(rename = "RemoteHost", default)]
    pub remote_host: Option<String>,
    #[serde(rename = "LastRemoteHost", default)]
    pub last_remote_host: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SchedulerRecord {
    pub fn job_id(&self) -> Option<JobId> {
        Some(JobId::new(self.cluster_id?, self.proc_id?))
    }

    /// Output file name without directory and `.stdout` extension,
    /// e.g. `signal_M500_3_123456`.
    pub fn stdout_name(&self) -> Option<String> {
        let out = self.out.as_deref()?;
        let file = out.rsplit('/').next().unwrap_or(out);
        let name = file.strip_suffix(".stdout").unwrap_or(file);
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Logical job name: the output name minus its trailing `_<counter>`.
    pub fn job_name(&self) -> Option<String> {
        let stdout = self.stdout_name()?;
        let (name, _) = stdout.rsplit_once('_')?;
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn identity(&self) -> Option<JobIdentity> {
        JobIdentity::parse(&self.job_name()?)
    }

    /// Name and value of whichever argument attribute the job uses.
    pub fn argument_field(&self) -> Option<(&'static str, &str)> {
        if let Some(args) = &self.args {
            Some(("Args", args.as_str()))
        } else {
            self.arguments
                .as_deref()
                .map(|arguments| ("Arguments", arguments))
        }
    }

    /// String value of an attribute outside the named schema.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match self.extra.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Execute machine, without the slot prefix.
    pub fn machine(&self) -> Option<String> {
        let host = self
            .remote_host
            .as_deref()
            .or(self.last_remote_host.as_deref())?;
        let machine = host.rsplit('@').next().unwrap_or(host);
        (!machine.is_empty()).then(|| machine.to_string())
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<JobStatus>, D::Error> {
    Ok(lenient_i64(deserializer)?.map(JobStatus::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_record() {
        let json = r#"{
            "ClusterId": 1234,
            "ProcId": 5,
            "Out": "logs/signal_M500_3_1234.stdout",
            "JobStatus": 2,
            "Args": "-x root://eos/ -N 3",
            "ChirpCMSSWElapsed": "7200.5",
            "ChirpCMSSWEvents": "1000",
            "RemoteHost": "slot1_2@node42.example.org",
            "InputFiles": "/store/mc/file.root"
        }"#;
        let record: SchedulerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.job_id(), Some(JobId::new(1234, 5)));
        assert_eq!(record.status, Some(JobStatus::Running));
        assert_eq!(record.stdout_name().as_deref(), Some("signal_M500_3_1234"));
        assert_eq!(record.job_name().as_deref(), Some("signal_M500_3"));
        assert_eq!(record.identity(), Some(JobIdentity::new("signal_M500", 3)));
        assert_eq!(record.elapsed_secs, Some(7200.5));
        assert_eq!(record.events, Some(1000));
        assert_eq!(record.machine().as_deref(), Some("node42.example.org"));
        assert_eq!(
            record.attribute("InputFiles").as_deref(),
            Some("/store/mc/file.root")
        );
        assert_eq!(record.argument_field(), Some(("Args", "-x root://eos/ -N 3")));
    }

    #[test]
    fn test_missing_attributes_are_unset() {
        let record: SchedulerRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record.job_id(), None);
        assert_eq!(record.identity(), None);
        assert_eq!(record.argument_field(), None);
        assert_eq!(record.machine(), None);
    }
}
