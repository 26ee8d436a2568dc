//! Durable output store listing.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{debug, trace, warn};
use regex::Regex;
use std::env;
use std::process::Command;

use crate::time_utils::{DATE_FORMAT, TimeWindow};

/// Lists the objects stored under a path.
pub trait StoreLister {
    /// Fully-qualified names under `path`, restricted to `window` when it is bounded.
    fn list(&self, path: &str, window: &TimeWindow) -> Result<Vec<String>>;
}

/// XRootD store accessed through `xrdfs`.
///
/// `path` is a physical file name such as `root://cmseos.fnal.gov//store/user/x`;
/// everything before `/store` addresses the server.
#[derive(Debug, Clone)]
pub struct XrootdStore {
    long_entry_regex: Regex,
}

impl XrootdStore {
    pub fn new() -> Result<Self> {
        // <mode> <date> <time> <size> <name>
        let long_entry_regex =
            Regex::new(r"^\S+\s+(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})\s+\d+\s+(\S+)$")?;
        Ok(Self { long_entry_regex })
    }

    /// Parse one line of a long listing into its timestamp and name.
    pub fn parse_long_entry(&self, line: &str) -> Option<(NaiveDateTime, String)> {
        let caps = self.long_entry_regex.captures(line.trim())?;
        let stamp = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
        let date = NaiveDateTime::parse_from_str(&stamp, DATE_FORMAT).ok()?;
        Some((date, caps[2].to_string()))
    }

    fn get_xrdfs_exec() -> String {
        env::var("PRODJOBS_FAKE_XRDFS").unwrap_or_else(|_| "xrdfs".to_string())
    }
}

/// Split a physical file name into its server and logical file name.
pub fn split_pfn(pfn: &str) -> (&str, &str) {
    match pfn.find("/store") {
        Some(idx) => (&pfn[..idx], &pfn[idx..]),
        None => ("", pfn),
    }
}

impl StoreLister for XrootdStore {
    fn list(&self, path: &str, window: &TimeWindow) -> Result<Vec<String>> {
        let (server, lfn) = split_pfn(path);
        let xrdfs = Self::get_xrdfs_exec();
        let mut args = vec![server, "ls"];
        if !window.is_unbounded() {
            args.push("-l");
        }
        args.push(lfn);

        trace!("Running command: {} {:?}", xrdfs, args);
        let output = Command::new(&xrdfs)
            .args(&args)
            .env("XrdSecGSISRVNAMES", "cmseos.fnal.gov")
            .output()
            .with_context(|| format!("Failed to run {}", xrdfs))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "xrdfs ls {} failed: {}",
                lfn,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        let names: Vec<String> = if window.is_unbounded() {
            lines.map(str::to_string).collect()
        } else {
            lines
                .filter_map(|line| {
                    let entry = self.parse_long_entry(line);
                    if entry.is_none() {
                        warn!("Skipping malformed listing line: {}", line);
                    }
                    entry
                })
                .filter(|(date, _)| window.contains(date))
                .map(|(_, name)| name)
                .collect()
        };
        debug!("Listed {} entries under {}", names.len(), lfn);
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::parse_date;

    #[test]
    fn test_split_pfn() {
        assert_eq!(
            split_pfn("root://cmseos.fnal.gov//store/user/me/out"),
            ("root://cmseos.fnal.gov/", "/store/user/me/out")
        );
        assert_eq!(split_pfn("/local/dir"), ("", "/local/dir"));
    }

    #[test]
    fn test_parse_long_entry() {
        let store = XrootdStore::new().unwrap();
        let line = "-rw- 2024-03-01 12:30:00   1048576 /store/user/me/out/job_3.root";
        let (date, name) = store.parse_long_entry(line).unwrap();
        assert_eq!(date, parse_date("2024-03-01 12:30:00").unwrap());
        assert_eq!(name, "/store/user/me/out/job_3.root");
        assert!(store.parse_long_entry("garbage").is_none());
        assert!(
            store
                .parse_long_entry("-rw- yesterday noon 1 /store/x.root")
                .is_none()
        );
        assert!(
            store
                .parse_long_entry("-rw- 2024-13-45 12:30:00 1 /store/x.root")
                .is_none()
        );
    }
}
