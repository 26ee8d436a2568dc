//! `prodjobs submit`: prepare, count, submit or audit the jobs of a manifest.

use anyhow::{Context, Result};
use clap::Args;
use log::warn;
use std::path::{Path, PathBuf};

use crate::client::commands::output::{is_json, print_json};
use crate::client::errors::ProdError;
use crate::client::hpc::{CondorInterface, create_scheduler_interfaces};
use crate::client::job_submitter::{JobSubmitter, SubmitAction, SubmitModes};
use crate::client::manifest::SubmissionManifest;
use crate::client::storage::XrootdStore;
use crate::config::ProdConfig;
use crate::time_utils::{TimeWindow, parse_date};

#[derive(Args, Debug)]
#[command(after_long_help = "\
EXAMPLES:
    # Write job descriptions and submit them
    prodjobs submit jobs.toml --prepare --submit

    # Count expected jobs
    prodjobs submit jobs.toml --count

    # Write a script resubmitting everything neither finished nor running
    prodjobs submit jobs.toml --missing --resub resub.sh

    # Only count outputs written in a window
    prodjobs submit jobs.toml --missing --min-date '2024-03-01 00:00:00'
")]
pub struct SubmitArgs {
    /// Submission manifest (TOML)
    pub manifest: PathBuf,

    /// Write the job descriptions
    #[arg(short, long)]
    pub prepare: bool,

    /// Count the expected number of jobs
    #[arg(short, long)]
    pub count: bool,

    /// Submit the jobs
    #[arg(short, long)]
    pub submit: bool,

    /// Check for jobs neither finished nor running
    #[arg(short, long)]
    pub missing: bool,

    /// Write a resubmission script with this name (missing mode)
    #[arg(short, long)]
    pub resub: Option<PathBuf>,

    /// Ignore outputs older than this (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_parser = parse_date)]
    pub min_date: Option<chrono::NaiveDateTime>,

    /// Ignore outputs at or after this (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_parser = parse_date)]
    pub max_date: Option<chrono::NaiveDateTime>,

    /// Put the dispatch statement in the job description instead of using -queue
    #[arg(short = 'q', long)]
    pub no_queue_arg: bool,
}

pub fn handle_submit(config: &ProdConfig, args: &SubmitArgs, format: &str) -> Result<()> {
    let modes = SubmitModes::from_flags(args.prepare, args.count, args.submit, args.missing)?;
    let manifest = SubmissionManifest::from_file(&args.manifest)?;
    let base_dir = args
        .manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut config = config.clone();
    config.submit.no_queue_arg |= args.no_queue_arg;
    let submitter = JobSubmitter::new(&config, &manifest, base_dir);

    if modes.prepare {
        let written = submitter.prepare()?;
        if !is_json(format) {
            for path in &written {
                println!("Prepared {}", path.display());
            }
        }
    }

    match modes.action {
        Some(SubmitAction::Count) => {
            let count = submitter.count();
            if is_json(format) {
                print_json(&serde_json::json!({ "jobs": count }), "count");
            } else {
                println!("{} jobs", count);
            }
        }
        Some(SubmitAction::Submit) => {
            let report = submitter.submit(&CondorInterface::local());
            if is_json(format) {
                print_json(&report, "submission");
            } else {
                for name in &report.submitted {
                    println!("Submitted {}", name);
                }
                for name in &report.unprepared {
                    println!(
                        "Error: couldn't find {}, try running in prepare mode",
                        name
                    );
                }
                for (name, error) in &report.failed {
                    println!("Failed {}: {}", name, error);
                }
            }
            let failed = report.unprepared.len() + report.failed.len();
            if failed > 0 {
                return Err(ProdError::PartialFailure {
                    failed,
                    total: manifest.jobs.len(),
                }
                .into());
            }
        }
        Some(SubmitAction::Missing) => {
            let window = TimeWindow::new(args.min_date, args.max_date);
            let schedulers = create_scheduler_interfaces(&config);
            let report = submitter.missing(
                &XrootdStore::new()?,
                &schedulers,
                &window,
                args.resub.is_some(),
            )?;
            if report.degraded {
                warn!("\"Missing jobs\" check did not consider running jobs");
            }
            let lines = report
                .plan
                .finish(args.resub.as_deref())
                .context("Failed to write resubmission script")?;
            if is_json(format) {
                print_json(&report, "missing jobs");
            } else {
                for line in lines {
                    println!("{}", line);
                }
            }
        }
        None => {}
    }
    Ok(())
}
