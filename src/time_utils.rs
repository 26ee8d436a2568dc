//! Date handling for listing windows.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format used on the command line and in long store listings.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn parse_date(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| format!("Invalid date '{}' (expected {}): {}", value, DATE_FORMAT, e))
}

/// Optional time window used to filter completed outputs.
/// The lower bound is inclusive, the upper bound exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub min: Option<NaiveDateTime>,
    pub max: Option<NaiveDateTime>,
}

impl TimeWindow {
    pub fn new(min: Option<NaiveDateTime>, max: Option<NaiveDateTime>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        self.min.is_none_or(|min| *at >= min) && self.max.is_none_or(|max| *at < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let date = parse_date("2024-03-01 12:30:00").unwrap();
        assert_eq!(date.to_string(), "2024-03-01 12:30:00");
        assert!(parse_date("2024-03-01").is_err());
    }

    #[test]
    fn test_window_bounds() {
        let min = parse_date("2024-03-01 00:00:00").unwrap();
        let max = parse_date("2024-03-02 00:00:00").unwrap();
        let window = TimeWindow::new(Some(min), Some(max));
        assert!(window.contains(&min));
        assert!(!window.contains(&max));
        assert!(window.contains(&parse_date("2024-03-01 23:59:59").unwrap()));
        assert!(!window.contains(&parse_date("2024-02-28 23:59:59").unwrap()));
    }

    #[test]
    fn test_unbounded_window_contains_everything() {
        let window = TimeWindow::default();
        assert!(window.is_unbounded());
        assert!(window.contains(&parse_date("1999-01-01 00:00:00").unwrap()));
    }
}
