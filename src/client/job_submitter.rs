//! Preparing, counting, submitting and auditing the jobs of a manifest.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::errors::{ProdError, Result};
use crate::client::hpc::SchedulerInterface;
use crate::client::manifest::{ProtoJob, SubmissionManifest};
use crate::client::queue_clause::QueueClause;
use crate::client::reconcile::{self, ReconciliationSnapshot, ResubmitPlan};
use crate::client::storage::StoreLister;
use crate::config::ProdConfig;
use crate::models::JobIdentity;
use crate::time_utils::TimeWindow;

/// The exclusive operation run after an optional prepare step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitAction {
    Count,
    Submit,
    Missing,
}

/// Selected modes. `prepare` combines with any action; actions exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitModes {
    pub prepare: bool,
    pub action: Option<SubmitAction>,
}

impl SubmitModes {
    pub fn from_flags(prepare: bool, count: bool, submit: bool, missing: bool) -> Result<Self> {
        let actions: Vec<SubmitAction> = [
            (count, SubmitAction::Count),
            (submit, SubmitAction::Submit),
            (missing, SubmitAction::Missing),
        ]
        .into_iter()
        .filter_map(|(on, action)| on.then_some(action))
        .collect();
        if actions.len() > 1 {
            return Err(ProdError::config(
                "Modes count, submit, missing are exclusive, pick one",
            ));
        }
        if !prepare && actions.is_empty() {
            return Err(ProdError::config(
                "No operation mode selected (prepare, count, submit, missing)",
            ));
        }
        Ok(Self {
            prepare,
            action: actions.first().copied(),
        })
    }
}

/// Outcome of submitting every proto-job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitReport {
    pub submitted: Vec<String>,
    /// Jobs whose description was never prepared
    pub unprepared: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Outcome of the missing-jobs check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MissingReport {
    pub missing: BTreeSet<JobIdentity>,
    pub plan: ResubmitPlan,
    /// Active jobs could not be queried and were not excluded
    pub degraded: bool,
}

/// Works through the proto-jobs of one manifest.
pub struct JobSubmitter<'a> {
    config: &'a ProdConfig,
    manifest: &'a SubmissionManifest,
    template: PathBuf,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(config: &'a ProdConfig, manifest: &'a SubmissionManifest, base_dir: &Path) -> Self {
        let template = manifest
            .jdl_template
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.submit.jdl));
        let template = if template.is_absolute() {
            template
        } else {
            base_dir.join(template)
        };
        Self {
            config,
            manifest,
            template,
        }
    }

    pub fn template(&self) -> &Path {
        &self.template
    }

    pub fn jdl_path(&self, job: &ProtoJob) -> PathBuf {
        job.jdl_path(&self.template)
    }

    pub fn count(&self) -> usize {
        self.manifest.count()
    }

    /// Configured substitutions, overridden in place by the job's own patterns.
    pub fn patterns(&self, job: &ProtoJob) -> Vec<(String, String)> {
        let submit = &self.config.submit;
        let mut env_args = submit
            .env
            .as_ref()
            .map(|env| format!("-E {}", env))
            .unwrap_or_default();
        if submit.intermediate {
            env_args.push_str(" -I");
        }
        let singularity = if submit.singularity.is_empty() {
            String::new()
        } else {
            format!("+SingularityImage = \"{}\"", submit.singularity)
        };
        let mut patterns = vec![
            ("SCRIPTARGS".to_string(), submit.scripts.join(",")),
            ("MYDISK".to_string(), submit.disk.to_string()),
            ("MYMEMORY".to_string(), submit.memory.to_string()),
            ("MYCPUS".to_string(), submit.cpus.to_string()),
            ("ENVARGS".to_string(), env_args),
            ("SINGULARITYARGS".to_string(), singularity),
        ];
        for (find, replace) in &job.patterns {
            match patterns.iter_mut().find(|(f, _)| f == find) {
                Some(existing) => existing.1 = replace.clone(),
                None => patterns.push((find.clone(), replace.clone())),
            }
        }
        patterns
    }

    /// Lines appended after the template body.
    pub fn appends(&self, job: &ProtoJob) -> Vec<String> {
        let submit = &self.config.submit;
        let mut appends = Vec::new();
        if !submit.sites.is_empty() {
            appends.push(format!("+DESIRED_Sites = \"{}\"", submit.sites));
        }
        if let Some(requirements) = &submit.requirements {
            appends.push(format!("Requirements = ({})", requirements));
        }
        appends.extend(job.appends.iter().cloned());
        appends
    }

    /// Render the prepared description of one job.
    pub fn render(&self, template: &str, job: &ProtoJob) -> String {
        let mut text = template.to_string();
        for (find, replace) in self.patterns(job) {
            if !find.is_empty() {
                text = text.replace(&find, &replace);
            }
        }
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        for line in self.appends(job) {
            text.push_str(&line);
            text.push('\n');
        }
        let queue = job.queue().to_jdl_line();
        if self.config.submit.no_queue_arg {
            text.push_str(&queue);
        } else {
            text.push_str("# ");
            text.push_str(&queue);
        }
        text.push('\n');
        text
    }

    /// Write every job's description next to the template.
    pub fn prepare(&self) -> Result<Vec<PathBuf>> {
        if !self.template.is_file() {
            return Err(ProdError::MissingInput(self.template.clone()));
        }
        let template = fs::read_to_string(&self.template).map_err(|e| {
            ProdError::io(format!("Failed to read {}", self.template.display()), e)
        })?;
        let mut written = Vec::new();
        for job in &self.manifest.jobs {
            let path = self.jdl_path(job);
            fs::write(&path, self.render(&template, job))
                .map_err(|e| ProdError::io(format!("Failed to write {}", path.display()), e))?;
            debug!("Prepared job={} jdl={}", job.name, path.display());
            written.push(path);
        }
        info!("Prepared {} job descriptions", written.len());
        Ok(written)
    }

    /// Submit each prepared job. Unprepared and failing jobs are reported, not fatal.
    pub fn submit(&self, scheduler: &dyn SchedulerInterface) -> SubmitReport {
        let mut report = SubmitReport::default();
        for job in &self.manifest.jobs {
            let path = self.jdl_path(job);
            if !path.is_file() {
                error!(
                    "Couldn't find {}, try running in prepare mode",
                    path.display()
                );
                report.unprepared.push(job.name.clone());
                continue;
            }
            let queue = job.queue();
            let override_queue = (!self.config.submit.no_queue_arg).then_some(&queue);
            match scheduler.submit(&path, override_queue) {
                Ok(_) => report.submitted.push(job.name.clone()),
                Err(e) => {
                    warn!("Submission failed for {}: {:#}", job.name, e);
                    report.failed.push((job.name.clone(), format!("{:#}", e)));
                }
            }
        }
        report
    }

    /// Reconcile every proto-job and build the resubmission plan.
    ///
    /// With `resub` the plan holds submission commands (one per job, carrying the
    /// missing ordinals); otherwise it lists the missing identities.
    pub fn missing(
        &self,
        store: &dyn StoreLister,
        schedulers: &[Box<dyn SchedulerInterface>],
        window: &TimeWindow,
        resub: bool,
    ) -> Result<MissingReport> {
        let completed = match &self.manifest.output {
            Some(output) => reconcile::query_completed(
                store,
                output,
                window,
                &self.config.store.output_suffix,
            )?,
            None => BTreeSet::new(),
        };
        let active = reconcile::query_active(schedulers, &self.config.common.user);

        let mut report = MissingReport {
            degraded: active.degraded,
            ..Default::default()
        };
        for job in &self.manifest.jobs {
            let snapshot = ReconciliationSnapshot::new(
                job.expected(),
                completed.clone(),
                reconcile::apply_alias(&active.identities, &job.chain_name, &job.name),
            );
            let missing = snapshot.missing();
            if missing.is_empty() {
                continue;
            }
            debug!("Missing job={} count={}", job.name, missing.len());
            if resub {
                let clause = QueueClause::process_in(missing.iter().map(|id| id.ordinal));
                let path = self.jdl_path(job);
                if self.config.submit.no_queue_arg {
                    rewrite_queue(&path, &clause)?;
                    report.plan.push(format!("condor_submit {}", path.display()));
                } else {
                    report.plan.push(format!(
                        "condor_submit {} {}",
                        path.display(),
                        clause.to_submit_arg()
                    ));
                }
            } else {
                report.plan.extend_identities(&missing);
            }
            report.missing.extend(missing);
        }
        Ok(report)
    }
}

/// Comment out the dispatch statement of a prepared description and dispatch
/// `clause` in its place.
pub fn rewrite_queue(path: &Path, clause: &QueueClause) -> Result<()> {
    let text = fs::read_to_string(path)
        .map_err(|e| ProdError::io(format!("Failed to read {}", path.display()), e))?;
    let mut rewritten = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#')
            && !trimmed.starts_with('-')
            && QueueClause::parse(trimmed).is_some()
        {
            rewritten.push('#');
            rewritten.push_str(line);
            rewritten.push('\n');
            rewritten.push_str(&clause.to_jdl_line());
        } else {
            rewritten.push_str(line);
        }
        rewritten.push('\n');
    }
    fs::write(path, rewritten)
        .map_err(|e| ProdError::io(format!("Failed to write {}", path.display()), e))
}
