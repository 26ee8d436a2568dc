mod common;

use common::{Call, MapCatalog, RecordingScheduler, managed_job, record};
use rstest::rstest;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

use prodjobs::client::ProdError;
use prodjobs::client::hpc::JobAction;
use prodjobs::client::commands::jobs::nothing_selected;
use prodjobs::client::hpc::SchedulerInterface;
use prodjobs::client::input_files::InputSource;
use prodjobs::client::job_query::{BatchSummary, JobFilter, ManagedJob, for_each_selection};
use prodjobs::client::resubmit::{
    Recovery, ResubmitOptions, Resubmitter, SiteEdit, site_resubmit,
};
use prodjobs::client::site_resolver::SiteResolver;
use prodjobs::config::ManageConfig;
use prodjobs::models::{JobId, JobStatus};

const DEFAULT_REDIRECTOR: &str = "root://cmsxrootd.fnal.gov/";

fn edit(id: JobId, field: &str, value: &str) -> Call {
    Call::Edit {
        id,
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn act(id: JobId, action: JobAction) -> Call {
    Call::Act { id, action }
}

fn redirector_options(redirector: &str) -> ResubmitOptions {
    ResubmitOptions {
        redirector: Some(redirector.to_string()),
        ..Default::default()
    }
}

fn job_with_input(cluster: i64, process: i64, stdout: &str, input: Option<&str>) -> ManagedJob {
    let mut rec = record(cluster, process, stdout, JobStatus::Held);
    if let Some(input) = input {
        rec.extra.insert("InputFiles".to_string(), json!(input));
    }
    ManagedJob::from_record(rec, "schedd1").unwrap()
}

#[rstest]
fn test_running_job_is_held_edited_and_released() {
    let scheduler = RecordingScheduler::new("schedd1");
    let options = redirector_options("root://cmseos.fnal.gov/");
    let job = managed_job(100, 0, "sig_0_100", JobStatus::Running);

    let report = Resubmitter::new(&scheduler, &options).resubmit(&[job], false);
    assert_eq!(report.resubmitted.len(), 1);
    assert!(report.failed.is_empty());
    assert!(report.check().is_ok());

    let id = JobId::new(100, 0);
    assert_eq!(
        scheduler.calls_for(id),
        vec![
            act(id, JobAction::Hold),
            edit(id, "Args", "\"-S step1.sh -x root://cmseos.fnal.gov/ -N 0\""),
            edit(id, "NumShadowStarts", "0"),
            edit(id, "NumJobStarts", "0"),
            edit(id, "JobRunCount", "0"),
            act(id, JobAction::Release),
        ]
    );
}

#[rstest]
fn test_idle_job_is_never_held_or_released() {
    let scheduler = RecordingScheduler::new("schedd1");
    let options = redirector_options("root://cmseos.fnal.gov/");
    let job = managed_job(100, 1, "sig_1_100", JobStatus::Idle);

    Resubmitter::new(&scheduler, &options).resubmit(&[job], false);
    let calls = scheduler.calls_for(JobId::new(100, 1));
    assert!(calls.iter().all(|c| !matches!(c, Call::Act { .. })));
    assert_eq!(calls.len(), 4);
}

#[rstest]
fn test_counters_reset_before_release() {
    let scheduler = RecordingScheduler::new("schedd1");
    let options = ResubmitOptions::default();
    let job = managed_job(100, 2, "sig_2_100", JobStatus::Held);

    Resubmitter::new(&scheduler, &options).resubmit(&[job], false);
    let id = JobId::new(100, 2);
    assert_eq!(
        scheduler.calls_for(id),
        vec![
            edit(id, "NumShadowStarts", "0"),
            edit(id, "NumJobStarts", "0"),
            edit(id, "JobRunCount", "0"),
            act(id, JobAction::Release),
        ]
    );
}

#[rstest]
fn test_site_and_attribute_edits() {
    let scheduler = RecordingScheduler::new("schedd1");
    let options = ResubmitOptions {
        sites: SiteEdit {
            add: vec!["T2_DE_DESY".to_string()],
            remove: vec!["T1_US_FNAL".to_string()],
        },
        edits: vec![("MaxWallTimeMins".to_string(), "1440".to_string())],
        ..Default::default()
    };
    let jobs = vec![
        managed_job(100, 0, "sig_0_100", JobStatus::Idle),
        managed_job(100, 1, "sig_1_100", JobStatus::Idle),
    ];

    Resubmitter::new(&scheduler, &options).resubmit(&jobs, false);
    for process in 0..2 {
        let calls = scheduler.calls_for(JobId::new(100, process));
        assert!(calls.contains(&edit(
            JobId::new(100, process),
            "DESIRED_Sites",
            "\"T2_US_MIT,T2_DE_DESY\""
        )));
        assert_eq!(
            calls.last(),
            Some(&edit(JobId::new(100, process), "MaxWallTimeMins", "1440"))
        );
    }
}

#[rstest]
fn test_failure_is_recorded_and_batch_continues() {
    let scheduler = RecordingScheduler::new("schedd1").failing_on(JobId::new(100, 1));
    let options = redirector_options("root://cmseos.fnal.gov/");
    let jobs = vec![
        managed_job(100, 0, "sig_0_100", JobStatus::Held),
        managed_job(100, 1, "sig_1_100", JobStatus::Held),
        managed_job(100, 2, "sig_2_100", JobStatus::Held),
    ];

    let report = Resubmitter::new(&scheduler, &options).resubmit(&jobs, false);
    let resubmitted: Vec<&str> = report.resubmitted.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(resubmitted, vec!["100.0", "100.2"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].job, "sig_1");
    assert!(report.failed[0].error.is_some());
    // held before the attempt, so it stays held rather than rerunning unedited
    assert_eq!(report.failed[0].recovery, None);
    assert!(
        !scheduler
            .calls_for(JobId::new(100, 1))
            .contains(&act(JobId::new(100, 1), JobAction::Release))
    );
    assert!(matches!(
        report.check(),
        Err(ProdError::PartialFailure {
            failed: 1,
            total: 3
        })
    ));
}

#[rstest]
fn test_running_job_released_when_edit_fails() {
    let id = JobId::new(100, 0);
    let scheduler = RecordingScheduler::new("schedd1").failing_on(id);
    let options = redirector_options("root://cmseos.fnal.gov/");
    let job = managed_job(100, 0, "sig_0_100", JobStatus::Running);

    let report = Resubmitter::new(&scheduler, &options).resubmit(&[job], false);
    assert!(report.resubmitted.is_empty());
    assert_eq!(report.failed[0].recovery, Some(Recovery::Released));
    assert!(
        report.failed[0]
            .error
            .as_deref()
            .unwrap()
            .ends_with("(released without its edits)")
    );
    assert_eq!(
        scheduler.calls_for(id),
        vec![
            act(id, JobAction::Hold),
            edit(id, "Args", "\"-S step1.sh -x root://cmseos.fnal.gov/ -N 0\""),
            act(id, JobAction::Release),
        ]
    );
}

#[rstest]
fn test_running_job_reported_held_when_release_fails() {
    let id = JobId::new(100, 0);
    let scheduler = RecordingScheduler::new("schedd1")
        .failing_on(id)
        .failing_action(id, JobAction::Release);
    let options = redirector_options("root://cmseos.fnal.gov/");
    let job = managed_job(100, 0, "sig_0_100", JobStatus::Running);

    let report = Resubmitter::new(&scheduler, &options).resubmit(&[job], false);
    assert_eq!(report.failed[0].recovery, Some(Recovery::StillHeld));
    assert!(report.failed[0].error.as_deref().unwrap().ends_with("(left held)"));
}

#[rstest]
fn test_dry_run_makes_no_mutations() {
    let scheduler = RecordingScheduler::new("schedd1");
    let options = ResubmitOptions {
        dry_run: true,
        ..redirector_options("root://cmseos.fnal.gov/")
    };
    let jobs = vec![
        managed_job(100, 0, "sig_0_100", JobStatus::Running),
        managed_job(100, 1, "sig_1_100", JobStatus::Held),
    ];
    let report = Resubmitter::new(&scheduler, &options).resubmit(&jobs, true);
    assert_eq!(report.resubmitted.len(), 2);
    assert_eq!(report.resubmitted[0].job, "sig_0_100");
    assert!(scheduler.calls().is_empty());
}

#[rstest]
fn test_logs_backed_up_for_held_and_running_jobs() {
    let temp = TempDir::new().unwrap();
    let log_dir = temp.path().to_path_buf();
    fs::write(log_dir.join("sig_1_100.stdout"), "held job output").unwrap();
    fs::write(log_dir.join("sig_2_100.stdout"), "idle job output").unwrap();

    let scheduler = RecordingScheduler::new("schedd1");
    let options = ResubmitOptions {
        log_dir: Some(log_dir.clone()),
        ..Default::default()
    };
    let jobs = vec![
        managed_job(100, 0, "sig_0_100", JobStatus::Running),
        managed_job(100, 1, "sig_1_100", JobStatus::Held),
        managed_job(100, 2, "sig_2_100", JobStatus::Idle),
    ];
    let report = Resubmitter::new(&scheduler, &options).resubmit(&jobs, false);
    assert!(report.failed.is_empty());

    // running: tailed into tmp, then backed up from there
    assert_eq!(scheduler.calls_for(JobId::new(100, 0))[0], Call::Tail(JobId::new(100, 0)));
    assert!(log_dir.join("tmp/sig_0_100.stdout").is_file());
    assert_eq!(
        fs::read_to_string(log_dir.join("backup/sig_0_100_0.stdout")).unwrap(),
        "last lines of output\n"
    );
    assert_eq!(
        fs::read_to_string(log_dir.join("backup/sig_1_100_0.stdout")).unwrap(),
        "held job output"
    );
    assert!(!log_dir.join("backup/sig_2_100_0.stdout").exists());

    // a second pass numbers the next backup
    Resubmitter::new(&scheduler, &options).resubmit(&jobs[1..2], false);
    assert!(log_dir.join("backup/sig_1_100_1.stdout").is_file());
}

fn site_jobs() -> Vec<ManagedJob> {
    vec![
        job_with_input(
            200,
            0,
            "sig_0_200",
            Some("root://cmsxrootd.fnal.gov//store/mc/sig/a.root,/store/mc/sig/b.root"),
        ),
        job_with_input(200, 1, "sig_1_200", Some("/store/mc/sig/unknown.root")),
        job_with_input(200, 2, "sig_2_200", None),
    ]
}

fn site_catalog() -> MapCatalog {
    MapCatalog::default().with(
        "/store/mc/sig/a.root",
        &["T1_US_FNAL_Tape", "T2_US_MIT_Disk", "T2_DE_DESY"],
    )
}

#[rstest]
fn test_site_resubmit_reads_from_resolved_site() {
    let scheduler = RecordingScheduler::new("schedd1");
    let catalog = site_catalog();
    let resolver = SiteResolver::new(&catalog, &ManageConfig::default(), Some("US".to_string()));
    let source = InputSource::Attribute("InputFiles".to_string());

    let report = site_resubmit(
        &scheduler,
        &site_jobs(),
        &source,
        &resolver,
        &ResubmitOptions::default(),
        DEFAULT_REDIRECTOR,
        false,
    );
    assert_eq!(report.resubmitted.len(), 1);
    assert_eq!(report.resubmitted[0].best.as_deref(), Some("T2_US_MIT"));
    let not: Vec<&str> = report.not_resubmitted.iter().map(|r| r.job.as_str()).collect();
    assert_eq!(not, vec!["sig_1", "sig_2"]);
    assert!(report.failed.is_empty());

    let id = JobId::new(200, 0);
    assert!(scheduler.calls_for(id).contains(&edit(
        id,
        "Args",
        "\"-S step1.sh -x root://cmsxrootd.fnal.gov//store/test/xrootd/T2_US_MIT/ -N 0\""
    )));
    assert!(scheduler.calls_for(JobId::new(200, 1)).is_empty());
}

#[rstest]
fn test_site_resubmit_falls_back_to_redirector() {
    let scheduler = RecordingScheduler::new("schedd1");
    let catalog = site_catalog();
    let resolver = SiteResolver::new(&catalog, &ManageConfig::default(), None);
    let source = InputSource::Attribute("InputFiles".to_string());
    let options = redirector_options("root://cmseos.fnal.gov/");

    let report = site_resubmit(
        &scheduler,
        &site_jobs(),
        &source,
        &resolver,
        &options,
        DEFAULT_REDIRECTOR,
        false,
    );
    assert_eq!(report.resubmitted.len(), 3);
    assert!(report.not_resubmitted.is_empty());
}

#[rstest]
fn test_site_resubmit_dry_run_matches_live_partition() {
    let catalog = site_catalog();
    let resolver = SiteResolver::new(&catalog, &ManageConfig::default(), Some("US".to_string()));
    let source = InputSource::Attribute("InputFiles".to_string());
    let jobs = site_jobs();

    let dry_scheduler = RecordingScheduler::new("schedd1");
    let dry = site_resubmit(
        &dry_scheduler,
        &jobs,
        &source,
        &resolver,
        &ResubmitOptions {
            dry_run: true,
            ..Default::default()
        },
        DEFAULT_REDIRECTOR,
        false,
    );
    let live_scheduler = RecordingScheduler::new("schedd1");
    let live = site_resubmit(
        &live_scheduler,
        &jobs,
        &source,
        &resolver,
        &ResubmitOptions::default(),
        DEFAULT_REDIRECTOR,
        false,
    );

    assert!(dry_scheduler.mutations().is_empty());
    assert!(!live_scheduler.mutations().is_empty());
    assert_eq!(dry.resubmitted, live.resubmitted);
    assert_eq!(dry.not_resubmitted, live.not_resubmitted);
}

fn resubmit_all(schedulers: &[Box<dyn SchedulerInterface>]) -> BatchSummary {
    let options = redirector_options("root://cmseos.fnal.gov/");
    for_each_selection(schedulers, "alice", &JobFilter::default(), |scheduler, jobs| {
        Resubmitter::new(scheduler, &options)
            .resubmit(jobs, false)
            .failed
            .len()
    })
}

#[rstest]
fn test_unreachable_schedd_does_not_stop_batch() {
    let good = RecordingScheduler::new("schedd_good")
        .with_records(vec![record(300, 0, "sig_0_300", JobStatus::Held)]);
    let schedulers: Vec<Box<dyn SchedulerInterface>> = vec![
        Box::new(RecordingScheduler::new("schedd_bad").unreachable()),
        Box::new(good.clone()),
    ];

    let summary = resubmit_all(&schedulers);
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.unreachable.len(), 1);
    assert_eq!(summary.unreachable[0].schedd, "schedd_bad");
    assert!(
        good.calls_for(JobId::new(300, 0))
            .contains(&act(JobId::new(300, 0), JobAction::Release))
    );
    assert!(matches!(
        summary.check(),
        Err(ProdError::PartialFailure {
            failed: 1,
            total: 2
        })
    ));
}

#[rstest]
fn test_empty_selection_is_reported() {
    let schedulers: Vec<Box<dyn SchedulerInterface>> =
        vec![Box::new(RecordingScheduler::new("schedd1"))];
    let mut called = false;
    let summary = for_each_selection(&schedulers, "alice", &JobFilter::default(), |_, _| {
        called = true;
        0
    });
    assert!(!called);
    assert!(summary.is_empty());
    assert!(summary.check().is_ok());
    assert_eq!(
        nothing_selected("alice"),
        "No jobs selected for user alice, nothing to do"
    );
}

#[rstest]
fn test_all_schedds_unreachable_is_not_empty() {
    let schedulers: Vec<Box<dyn SchedulerInterface>> =
        vec![Box::new(RecordingScheduler::new("schedd1").unreachable())];
    let summary = resubmit_all(&schedulers);
    assert!(!summary.is_empty());
    assert!(summary.check().is_err());
}
