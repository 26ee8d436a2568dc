mod common;

use common::MapCatalog;
use rstest::rstest;

use prodjobs::client::site_resolver::SiteResolver;
use prodjobs::config::ManageConfig;

const FILE: &str = "/store/mc/Run3/signal/file.root";

fn manage(blacklist: &[&str], preferred: &[&str]) -> ManageConfig {
    ManageConfig {
        blacklisted_sites: blacklist.iter().map(|s| s.to_string()).collect(),
        preferred_sites: preferred.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[rstest]
fn test_region_preferred_disk_replica() {
    let catalog = MapCatalog::default().with(FILE, &["T1_US_Disk", "T1_US_Tape", "T2_DE_Disk"]);
    let resolver = SiteResolver::new(&catalog, &manage(&[], &[]), Some("US".to_string()));
    assert_eq!(resolver.resolve(FILE).as_deref(), Some("T1_US"));
}

#[rstest]
fn test_blacklisted_region_site_falls_back() {
    let catalog = MapCatalog::default().with(FILE, &["T1_US_Disk", "T1_US_Tape", "T2_DE_Disk"]);
    let resolver = SiteResolver::new(&catalog, &manage(&["T1_US"], &[]), Some("US".to_string()));
    assert_eq!(resolver.resolve(FILE).as_deref(), Some("T2_DE"));
}

#[rstest]
fn test_tape_only_never_selected() {
    let catalog = MapCatalog::default().with(FILE, &["T1_US_FNAL_Tape", "T0_CH_CERN_Tape"]);
    let resolver = SiteResolver::new(&catalog, &manage(&[], &[]), Some("US".to_string()));
    assert_eq!(resolver.resolve(FILE), None);
}

#[rstest]
#[case(&[], "T2_DE_DESY")]
#[case(&["MIT"], "T2_US_MIT")]
#[case(&["T2_IT_Pisa", "MIT"], "T2_IT_Pisa")]
fn test_preference_order(#[case] preferred: &[&str], #[case] expected: &str) {
    let catalog = MapCatalog::default().with(FILE, &["T2_DE_DESY", "T2_US_MIT", "T2_IT_Pisa"]);
    let resolver = SiteResolver::new(&catalog, &manage(&[], preferred), None);
    assert_eq!(resolver.resolve(FILE).as_deref(), Some(expected));
}

#[rstest]
fn test_region_outranks_preference() {
    let catalog = MapCatalog::default().with(FILE, &["T2_DE_DESY", "T2_US_MIT", "T2_US_Purdue"]);
    let resolver = SiteResolver::new(
        &catalog,
        &manage(&[], &["DESY", "Purdue"]),
        Some("US".to_string()),
    );
    assert_eq!(
        resolver.rank(&catalog.sites[FILE]),
        vec!["T2_US_Purdue", "T2_US_MIT", "T2_DE_DESY"]
    );
}

#[rstest]
fn test_catalog_failure_yields_no_site() {
    let catalog = MapCatalog::default();
    let resolver = SiteResolver::new(&catalog, &manage(&[], &[]), None);
    assert_eq!(resolver.resolve(FILE), None);

    let resolutions = resolver.resolve_many(&[
        ("job_0".to_string(), Some(FILE.to_string())),
        ("job_1".to_string(), None),
    ]);
    assert_eq!(resolutions.len(), 2);
    assert!(resolutions.iter().all(|r| r.best.is_none() && r.candidates.is_empty()));
    assert_eq!(resolutions[1].file, None);
}

#[rstest]
fn test_duplicate_labels_collapse() {
    let catalog = MapCatalog::default().with(FILE, &["T2_US_MIT_Disk", "T2_US_MIT", "T2_US_MIT"]);
    let resolver = SiteResolver::new(&catalog, &manage(&[], &[]), None);
    assert_eq!(resolver.rank(&catalog.sites[FILE]), vec!["T2_US_MIT"]);
}
