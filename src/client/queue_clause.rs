//! Structured form of the scheduler dispatch statement.
//!
//! A dispatch statement appears either inside a job description (`Queue 10`,
//! `Queue Process in 1,4,7`) or on the `condor_submit` command line
//! (`-queue 10`, `-queue "Process in 1,4,7"`). Both spellings parse into the same
//! [`QueueClause`] so callers never patch strings by character offset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed dispatch statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueClause {
    /// Bare `Queue`: one process
    Default,
    /// `Queue N`
    Count(u32),
    /// `Queue Process in a,b,c`: one process per listed index
    ProcessIn(Vec<u32>),
    /// Any other queue syntax, kept verbatim
    Other(String),
}

impl QueueClause {
    /// Parse either spelling. Returns `None` when the text is not a dispatch statement.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let rest = strip_prefix_ignore_case(trimmed, "-queue")
            .or_else(|| strip_prefix_ignore_case(trimmed, "queue"))?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }

        let body = rest.trim().trim_matches('"').trim();
        if body.is_empty() {
            return Some(QueueClause::Default);
        }
        if let Ok(count) = body.parse::<u32>() {
            return Some(QueueClause::Count(count));
        }
        if let Some(items) = strip_prefix_ignore_case(body, "process in") {
            let parsed: Result<Vec<u32>, _> = items
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<u32>)
                .collect();
            if let Ok(mut indices) = parsed
                && !indices.is_empty()
            {
                indices.sort_unstable();
                indices.dedup();
                return Some(QueueClause::ProcessIn(indices));
            }
        }
        Some(QueueClause::Other(body.to_string()))
    }

    /// Clause dispatching exactly the given indices.
    pub fn process_in(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut indices: Vec<u32> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        QueueClause::ProcessIn(indices)
    }

    /// Number of processes spawned, when known.
    pub fn process_count(&self) -> Option<usize> {
        match self {
            QueueClause::Default => Some(1),
            QueueClause::Count(n) => Some(*n as usize),
            QueueClause::ProcessIn(items) => Some(items.len()),
            QueueClause::Other(_) => None,
        }
    }

    fn body(&self) -> String {
        match self {
            QueueClause::Default => String::new(),
            QueueClause::Count(n) => n.to_string(),
            QueueClause::ProcessIn(items) => format!(
                "Process in {}",
                items
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            QueueClause::Other(raw) => raw.clone(),
        }
    }

    /// Statement form for a job description file.
    pub fn to_jdl_line(&self) -> String {
        let body = self.body();
        if body.is_empty() {
            "Queue".to_string()
        } else {
            format!("Queue {}", body)
        }
    }

    /// Value of the `-queue` command-line option.
    pub fn submit_value(&self) -> String {
        match self {
            QueueClause::Default => "1".to_string(),
            _ => self.body(),
        }
    }

    /// Command-line form for `condor_submit`, always quoted.
    pub fn to_submit_arg(&self) -> String {
        format!("-queue \"{}\"", self.submit_value())
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

impl fmt::Display for QueueClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_jdl_line())
    }
}
