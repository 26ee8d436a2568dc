//! `prodjobs jobs`: list, remove and resubmit queued jobs.

use anyhow::Result;
use clap::{Args, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use tabled::Tabled;

use crate::client::catalog::DasCatalog;
use crate::client::commands::output::{
    display_table_with_count, is_json, print_json, print_json_wrapped,
};
use crate::client::hpc::{
    CondorInterface, JobAction, SchedulerInterface, create_scheduler_interfaces,
};
use crate::client::input_files::InputSource;
use crate::client::job_query::{
    BatchSummary, JobFilter, ManagedJob, StateFilter, for_each_selection, select_jobs,
};
use crate::client::resubmit::{
    ResubmitOptions, ResubmitReport, Resubmitter, SiteEdit, SiteResubmitReport, parse_edits,
    parse_redirector, site_resubmit,
};
use crate::client::site_resolver::{SiteResolution, SiteResolver};
use crate::config::ProdConfig;

/// Which jobs to act on.
#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Jobs of this user (default: common.user)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Query every configured schedd instead of the local one
    #[arg(short, long)]
    pub all: bool,

    /// Only held jobs
    #[arg(long)]
    pub held: bool,

    /// Only running jobs
    #[arg(short, long)]
    pub running: bool,

    /// Only idle jobs
    #[arg(short, long)]
    pub idle: bool,

    /// Only the last N finished jobs
    #[arg(long, default_value_t = 0)]
    pub finished: usize,

    /// Only running jobs without a progress update (see manage.stuck_threshold_hours)
    #[arg(short = 't', long)]
    pub stuck: bool,

    /// Keep jobs whose output name or hold reason contains any of these
    #[arg(short, long, value_delimiter = ',')]
    pub grep: Vec<String>,

    /// Drop jobs whose output name or hold reason contains any of these
    #[arg(short, long, value_delimiter = ',')]
    pub vgrep: Vec<String>,

    /// Override the stuck threshold in hours
    #[arg(long)]
    pub stuck_threshold: Option<f64>,

    /// Show output file names instead of job names
    #[arg(short = 'o', long)]
    pub stdout: bool,
}

impl SelectArgs {
    fn filter(&self, config: &ProdConfig, extra: Option<&str>) -> Result<JobFilter> {
        let state = StateFilter::from_flags(self.held, self.running, self.idle, self.finished)?;
        Ok(JobFilter {
            state,
            stuck: self.stuck,
            stuck_threshold_hours: self
                .stuck_threshold
                .unwrap_or(config.manage.stuck_threshold_hours),
            grep: self.grep.clone(),
            vgrep: self.vgrep.clone(),
            extra_attributes: extra.map(|a| vec![a.to_string()]).unwrap_or_default(),
        })
    }

    fn user(&self, config: &ProdConfig) -> Result<String> {
        let user = self.user.clone().unwrap_or_else(|| config.common.user.clone());
        if user.is_empty() {
            anyhow::bail!("Must specify a user");
        }
        Ok(user)
    }

    fn schedulers(&self, config: &ProdConfig) -> Vec<Box<dyn SchedulerInterface>> {
        if self.all {
            create_scheduler_interfaces(config)
        } else {
            vec![Box::new(CondorInterface::local())]
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(after_long_help = "\
EXAMPLES:
    # Held jobs with their hold reasons, one per line
    prodjobs jobs list --held --plain --why

    # Running jobs with progress, on every schedd
    prodjobs jobs list --running --plain --progress --all

    # Resubmit held jobs reading input through a specific site
    prodjobs jobs resubmit --held -x T2_US_MIT

    # Resubmit stuck jobs from wherever their input is stored
    prodjobs jobs site-resubmit --stuck --input-attribute InputFiles --dry-run
")]
pub enum JobCommands {
    /// List selected jobs
    List {
        #[command(flatten)]
        select: SelectArgs,
        /// One line per job instead of a table
        #[arg(long)]
        plain: bool,
        /// Show cluster.process ids (plain output)
        #[arg(short, long)]
        num: bool,
        /// Show events processed, hours running and rate (plain output)
        #[arg(short, long)]
        progress: bool,
        /// Show why jobs were held (plain output)
        #[arg(short, long)]
        why: bool,
        /// Show matched site and machine (plain output)
        #[arg(short, long)]
        matched: bool,
    },
    /// Remove selected jobs
    Remove {
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Edit and release selected jobs
    Resubmit {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Resubmit selected jobs reading input from the best site holding it
    #[command(name = "site-resubmit")]
    SiteResubmit {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        edit: EditArgs,
        /// Scheduler attribute listing each job's input files
        #[arg(short = 'C', long)]
        input_attribute: Option<String>,
        /// Key identifying input-file lines in job logs
        #[arg(short = 'K', long)]
        log_key: Option<String>,
        /// Directory of job logs
        #[arg(short = 'L', long)]
        log_path: Option<PathBuf>,
        /// Rank sites in this region first (e.g. US)
        #[arg(short = 'R', long)]
        region: Option<String>,
        /// Sites never read from, in addition to manage.blacklisted_sites
        #[arg(short = 'B', long, value_delimiter = ',')]
        blacklist: Vec<String>,
        /// Resolve and report without touching the scheduler
        #[arg(short = 'D', long)]
        dry_run: bool,
        /// Report files and sites for every job
        #[arg(long)]
        verbose: bool,
    },
}

/// Edits applied when resubmitting.
#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Input redirector (root://...) or site name (T...)
    #[arg(short = 'x', long)]
    pub xrootd: Option<String>,
    /// Attribute edits as a JSON object
    #[arg(short, long)]
    pub edit: Option<String>,
    /// Sites to add to DESIRED_Sites
    #[arg(long, value_delimiter = ',')]
    pub add_sites: Vec<String>,
    /// Sites to remove from DESIRED_Sites
    #[arg(long, value_delimiter = ',')]
    pub rm_sites: Vec<String>,
    /// Directory of job stdout files, for log backups (default: manage.dir)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

impl EditArgs {
    fn options(&self, config: &ProdConfig, dry_run: bool) -> Result<ResubmitOptions> {
        let redirector = self
            .xrootd
            .as_deref()
            .map(|x| parse_redirector(x, &config.manage.default_redirector))
            .transpose()?;
        let log_dir = self.dir.clone().or_else(|| {
            (!config.manage.dir.is_empty()).then(|| PathBuf::from(&config.manage.dir))
        });
        Ok(ResubmitOptions {
            dry_run,
            log_dir,
            redirector,
            sites: SiteEdit {
                add: self.add_sites.clone(),
                remove: self.rm_sites.clone(),
            },
            edits: parse_edits(self.edit.as_deref().unwrap_or_default())?,
        })
    }
}

#[derive(Tabled)]
struct JobTableRow {
    #[tabled(rename = "Job")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Site")]
    site: String,
    #[tabled(rename = "Hold reason")]
    why: String,
}

#[derive(Tabled)]
struct ResolutionRow {
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Site")]
    site: String,
    #[tabled(rename = "Candidates")]
    candidates: String,
}

impl From<&SiteResolution> for ResolutionRow {
    fn from(r: &SiteResolution) -> Self {
        Self {
            job: r.job.clone(),
            file: r.file.clone().unwrap_or_default(),
            site: r.best.clone().unwrap_or_default(),
            candidates: r.candidates.join(","),
        }
    }
}

/// One line per job, in the classic listing layout.
pub fn format_job_line(
    job: &ManagedJob,
    use_stdout: bool,
    num: bool,
    progress: bool,
    matched: bool,
    why: bool,
) -> String {
    let mut line = job.label(use_stdout).to_string();
    if num {
        line.push_str(&format!(" ({})", job.id));
    }
    if progress {
        line.push_str(&format!(
            " ({} events in {:.1} hours = {:.1} evt/sec)",
            job.events, job.hours, job.rate
        ));
    }
    if matched && !job.matched_site.is_empty() && !job.machine.is_empty() {
        line.push_str(&format!(" : {}, {}", job.matched_site, job.machine));
    }
    if why && !job.hold_reason.is_empty() {
        line.push_str(&format!(" : {}", job.hold_reason));
    }
    line
}

pub fn handle_job_commands(config: &ProdConfig, command: &JobCommands, format: &str) -> Result<()> {
    match command {
        JobCommands::List {
            select,
            plain,
            num,
            progress,
            why,
            matched,
        } => {
            let filter = select.filter(config, None)?;
            let user = select.user(config)?;
            let mut all_jobs = Vec::new();
            for scheduler in select.schedulers(config) {
                match select_jobs(scheduler.as_ref(), &user, &filter) {
                    Ok(jobs) => all_jobs.extend(jobs),
                    Err(e) => warn!("Could not query schedd {}: {:#}", scheduler.name(), e),
                }
            }
            if is_json(format) {
                print_json_wrapped("jobs", &all_jobs, "jobs");
            } else if all_jobs.is_empty() {
                println!("No jobs found for user {}", user);
            } else if *plain {
                for job in &all_jobs {
                    println!(
                        "{}",
                        format_job_line(job, select.stdout, *num, *progress, *matched, *why)
                    );
                }
            } else {
                let rows: Vec<JobTableRow> = all_jobs
                    .iter()
                    .map(|job| JobTableRow {
                        name: job.label(select.stdout).to_string(),
                        id: job.id.to_string(),
                        status: job.status.to_string(),
                        progress: format!(
                            "{} events / {:.1} h / {:.1} evt/s",
                            job.events, job.hours, job.rate
                        ),
                        site: [job.matched_site.as_str(), job.machine.as_str()]
                            .iter()
                            .filter(|s| !s.is_empty())
                            .copied()
                            .collect::<Vec<_>>()
                            .join(", "),
                        why: job.hold_reason.clone(),
                    })
                    .collect();
                display_table_with_count(&rows, "jobs");
            }
        }
        JobCommands::Remove { select } => {
            let filter = select.filter(config, None)?;
            ensure_mutable(&filter)?;
            let user = select.user(config)?;
            let schedulers = select.schedulers(config);
            let mut removed = Vec::new();
            let summary = for_each_selection(&schedulers, &user, &filter, |scheduler, jobs| {
                let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
                if let Err(e) = scheduler.act(&ids, JobAction::Remove) {
                    warn!("Could not remove jobs on {}: {:#}", scheduler.name(), e);
                    if !is_json(format) {
                        println!(
                            "Failed to remove {} jobs on {}: {:#}",
                            ids.len(),
                            scheduler.name(),
                            e
                        );
                    }
                    return ids.len();
                }
                info!("Removed {} jobs on {}", ids.len(), scheduler.name());
                for job in jobs {
                    if !is_json(format) {
                        println!("Removed {} ({})", job.label(select.stdout), job.id);
                    }
                    removed.push(job.id.to_string());
                }
                0
            });
            if is_json(format) {
                print_json(
                    &serde_json::json!({ "removed": removed, "summary": &summary }),
                    "removal",
                );
            }
            finish_batch(&summary, &user, format)?;
        }
        JobCommands::Resubmit { select, edit } => {
            let filter = select.filter(config, None)?;
            ensure_mutable(&filter)?;
            let user = select.user(config)?;
            let options = edit.options(config, false)?;
            let schedulers = select.schedulers(config);
            let summary = for_each_selection(&schedulers, &user, &filter, |scheduler, jobs| {
                let report = Resubmitter::new(scheduler, &options).resubmit(jobs, select.stdout);
                if is_json(format) {
                    print_json(&report, "resubmission");
                } else {
                    for outcome in &report.resubmitted {
                        println!("Resubmitted {} ({})", outcome.job, outcome.id);
                    }
                    for outcome in &report.failed {
                        println!(
                            "Failed {} ({}): {}",
                            outcome.job,
                            outcome.id,
                            outcome.error.as_deref().unwrap_or_default()
                        );
                    }
                }
                report.failed.len()
            });
            if is_json(format) && summary.is_empty() {
                print_json(&ResubmitReport::default(), "resubmission");
            }
            finish_batch(&summary, &user, format)?;
        }
        JobCommands::SiteResubmit {
            select,
            edit,
            input_attribute,
            log_key,
            log_path,
            region,
            blacklist,
            dry_run,
            verbose,
        } => {
            let source = InputSource::from_options(
                input_attribute.clone(),
                log_path.clone(),
                log_key.clone(),
            )?;
            let filter = select.filter(config, source.attribute())?;
            ensure_mutable(&filter)?;
            let user = select.user(config)?;
            let options = edit.options(config, *dry_run)?;
            let mut manage = config.manage.clone();
            manage.blacklisted_sites.extend(blacklist.iter().cloned());
            let catalog = DasCatalog::new();
            let resolver = SiteResolver::new(&catalog, &manage, region.clone());
            let schedulers = select.schedulers(config);

            let summary = for_each_selection(&schedulers, &user, &filter, |scheduler, jobs| {
                let report = site_resubmit(
                    scheduler,
                    jobs,
                    &source,
                    &resolver,
                    &options,
                    &manage.default_redirector,
                    select.stdout,
                );
                if is_json(format) {
                    print_json(&report, "site resubmission");
                    return report.failed.len();
                }
                println!("Jobs resubmitted (dry run = {}):", dry_run);
                print_resolutions(&report.resubmitted, *verbose);
                println!("\nJobs not resubmitted due to lack of an acceptable site:");
                print_resolutions(&report.not_resubmitted, *verbose);
                if !report.failed.is_empty() {
                    println!("\nJobs that failed to resubmit:");
                    for (resolution, error) in &report.failed {
                        println!("\t{}: {}", resolution.job, error);
                    }
                }
                report.failed.len()
            });
            if is_json(format) && summary.is_empty() {
                print_json(&SiteResubmitReport::default(), "site resubmission");
            }
            finish_batch(&summary, &user, format)?;
        }
    }
    Ok(())
}

/// Report unreachable schedds or an empty selection, then fail on any failed unit.
fn finish_batch(summary: &BatchSummary, user: &str, format: &str) -> Result<()> {
    if !is_json(format) {
        for schedd in &summary.unreachable {
            println!("Could not query schedd {}: {}", schedd.schedd, schedd.error);
        }
        if summary.is_empty() {
            println!("{}", nothing_selected(user));
        }
    }
    summary.check()?;
    Ok(())
}

/// Message for a command that selected no jobs.
pub fn nothing_selected(user: &str) -> String {
    format!("No jobs selected for user {}, nothing to do", user)
}

/// History entries cannot be edited or removed.
fn ensure_mutable(filter: &JobFilter) -> Result<()> {
    if matches!(filter.state, StateFilter::Finished(_)) {
        anyhow::bail!("finished jobs cannot be removed or resubmitted");
    }
    Ok(())
}

fn print_resolutions(resolutions: &[SiteResolution], verbose: bool) {
    if resolutions.is_empty() {
        println!("\t(none)");
    } else if verbose {
        let rows: Vec<ResolutionRow> = resolutions.iter().map(ResolutionRow::from).collect();
        display_table_with_count(&rows, "jobs");
    } else {
        for r in resolutions {
            println!("\t{}", r.job);
        }
    }
}
