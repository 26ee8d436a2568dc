//! Locality-aware choice of the site to read a job's input from.

use log::{debug, warn};
use serde::Serialize;

use crate::client::catalog::Catalog;
use crate::config::ManageConfig;
use crate::models::CandidateReplica;

/// Ranks the replicas of an input file and picks the best readable site.
pub struct SiteResolver<'a> {
    catalog: &'a dyn Catalog,
    blacklist: Vec<String>,
    preferred: Vec<String>,
    region: Option<String>,
}

/// Resolution of one job's input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteResolution {
    pub job: String,
    pub file: Option<String>,
    pub best: Option<String>,
    /// Every label the catalog returned, before filtering
    pub candidates: Vec<String>,
}

impl<'a> SiteResolver<'a> {
    pub fn new(catalog: &'a dyn Catalog, config: &ManageConfig, region: Option<String>) -> Self {
        Self {
            catalog,
            blacklist: config.blacklisted_sites.clone(),
            preferred: config.preferred_sites.clone(),
            region: region.filter(|r| !r.is_empty()),
        }
    }

    /// Best site for `file`, or `None` when no usable replica exists or the catalog
    /// lookup failed.
    pub fn resolve(&self, file: &str) -> Option<String> {
        let labels = self.lookup(file)?;
        self.select(&labels)
    }

    /// Resolve every `(job, input file)` pair. Jobs without a file are reported with
    /// no candidates.
    pub fn resolve_many(&self, jobs: &[(String, Option<String>)]) -> Vec<SiteResolution> {
        jobs.iter()
            .map(|(job, file)| {
                let candidates = file
                    .as_deref()
                    .and_then(|f| self.lookup(f))
                    .unwrap_or_default();
                let best = self.select(&candidates);
                debug!("Resolved job={} best={:?}", job, best);
                SiteResolution {
                    job: job.clone(),
                    file: file.clone(),
                    best,
                    candidates,
                }
            })
            .collect()
    }

    fn lookup(&self, file: &str) -> Option<Vec<String>> {
        match self.catalog.sites_for(file) {
            Ok(labels) => Some(labels),
            Err(e) => {
                warn!("Catalog lookup failed for {}: {:#}", file, e);
                None
            }
        }
    }

    /// Rank raw catalog labels and return the head.
    pub fn select(&self, labels: &[String]) -> Option<String> {
        self.rank(labels).into_iter().next()
    }

    /// Normalized, filtered labels in preference order.
    pub fn rank(&self, labels: &[String]) -> Vec<String> {
        let mut sites: Vec<String> = Vec::new();
        for replica in labels.iter().map(|l| CandidateReplica::from_label(l)) {
            if replica.is_tape_only {
                continue;
            }
            let site = replica.normalized_label();
            if self.is_blacklisted(&site) || sites.contains(&site) {
                continue;
            }
            sites.push(site);
        }
        sites.sort_by_key(|site| (!self.in_region(site), self.preference_rank(site)));
        sites
    }

    fn is_blacklisted(&self, site: &str) -> bool {
        self.blacklist
            .iter()
            .any(|b| b == site || b.replace("_Disk", "") == site)
    }

    fn in_region(&self, site: &str) -> bool {
        self.region
            .as_deref()
            .is_some_and(|region| site.split('_').nth(1).is_some_and(|c| c.contains(region)))
    }

    /// Position in the preference list; matches the full label or its site component.
    fn preference_rank(&self, site: &str) -> usize {
        let component = site.split('_').nth(2);
        self.preferred
            .iter()
            .position(|p| p == site || component == Some(p.as_str()))
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapCatalog(HashMap<String, Vec<String>>);

    impl Catalog for MapCatalog {
        fn sites_for(&self, file: &str) -> anyhow::Result<Vec<String>> {
            self.0
                .get(file)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no entry for {}", file))
        }
    }

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_preference_order_with_region() {
        let catalog = MapCatalog(HashMap::new());
        let config = ManageConfig {
            preferred_sites: labels(&["CERN", "FNAL"]),
            ..Default::default()
        };
        let resolver = SiteResolver::new(&catalog, &config, Some("US".to_string()));
        let ranked = resolver.rank(&labels(&[
            "T2_CH_CERN",
            "T2_US_MIT",
            "T1_US_FNAL_Disk",
            "T2_DE_DESY",
        ]));
        assert_eq!(ranked, labels(&["T1_US_FNAL", "T2_US_MIT", "T2_CH_CERN", "T2_DE_DESY"]));
    }

    #[test]
    fn test_without_region_keeps_catalog_order() {
        let catalog = MapCatalog(HashMap::new());
        let resolver = SiteResolver::new(&catalog, &ManageConfig::default(), None);
        let ranked = resolver.rank(&labels(&["T2_DE_DESY", "T2_US_MIT", "T2_DE_DESY"]));
        assert_eq!(ranked, labels(&["T2_DE_DESY", "T2_US_MIT"]));
    }

    #[test]
    fn test_catalog_failure_resolves_to_none() {
        let catalog = MapCatalog(HashMap::new());
        let resolver = SiteResolver::new(&catalog, &ManageConfig::default(), None);
        assert_eq!(resolver.resolve("/store/missing.root"), None);
        let batch = resolver.resolve_many(&[
            ("job_0".to_string(), Some("/store/missing.root".to_string())),
            ("job_1".to_string(), None),
        ]);
        assert!(batch.iter().all(|r| r.best.is_none() && r.candidates.is_empty()));
    }
}
