//! Job description markup: parsing and directive classification.
//!
//! A job description is a line-oriented file of `key = value` directives. A trailing
//! backslash joins the next physical line onto the current one, `#` starts a comment,
//! and keys compare case-insensitively. Lines without ` = ` are bare statements, never
//! continuations of the directive above them; only a trailing backslash continues a
//! value. The scheduler's dispatch statement (`Queue ...`) is the important bare one.

use log::trace;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::errors::{ProdError, Result};
use crate::client::queue_clause::QueueClause;

pub const KEY_TRANSFER_INPUT: &str = "transfer_input_files";
pub const KEY_ARGUMENTS: &str = "arguments";
pub const KEY_TRANSFER_OUTPUT: &str = "transfer_output_files";
pub const KEY_OUTPUT_REMAPS: &str = "transfer_output_remaps";
const LOG_PATH_KEYS: &[&str] = &["output", "error", "log"];
const RESOURCE_PREFIX: &str = "request_";

/// Marker that expands to the process index at dispatch time.
pub const PROCESS_MARKER: &str = "$(Process)";

/// One logical statement of a job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `key = value`; the key is stored lower-case
    Directive { key: String, value: String },
    /// A line without ` = `, e.g. `Queue 10`
    Bare(String),
}

/// How a statement is treated when several descriptions are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveClass {
    /// `request_*`: merged by maximum
    Resource,
    /// `transfer_input_files`: files are staged per subjob
    FileTransfer,
    /// `arguments`: kept per subjob
    Arguments,
    /// `output`, `error`, `log`: first wins, chain name substituted
    LogPath,
    /// `Queue ...`: exactly one retained
    Dispatch,
    /// Everything else: first wins
    FreeForm,
}

impl Statement {
    pub fn classify(&self) -> DirectiveClass {
        match self {
            Statement::Directive { key, .. } => {
                if key.starts_with(RESOURCE_PREFIX) {
                    DirectiveClass::Resource
                } else if key == KEY_TRANSFER_INPUT {
                    DirectiveClass::FileTransfer
                } else if key == KEY_ARGUMENTS {
                    DirectiveClass::Arguments
                } else if LOG_PATH_KEYS.contains(&key.as_str()) {
                    DirectiveClass::LogPath
                } else {
                    DirectiveClass::FreeForm
                }
            }
            Statement::Bare(value) => {
                if QueueClause::parse(value).is_some() {
                    DirectiveClass::Dispatch
                } else {
                    DirectiveClass::FreeForm
                }
            }
        }
    }
}

/// A parsed job description file.
#[derive(Debug, Clone)]
pub struct JobDescription {
    /// Logical job name: the file name without its `.jdl` extension
    pub name: String,
    /// Directory the description was read from; relative input files resolve against it
    pub source_dir: PathBuf,
    pub statements: Vec<Statement>,
}

impl JobDescription {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ProdError::MissingInput(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| ProdError::io(format!("Failed to read {}", path.display()), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().replace(".jdl", ""))
            .unwrap_or_default();
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let statements = parse_statements(&text);
        trace!(
            "Parsed job description name={} statements={}",
            name,
            statements.len()
        );
        Ok(Self {
            name,
            source_dir,
            statements,
        })
    }

    pub fn from_text(name: impl Into<String>, source_dir: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            name: name.into(),
            source_dir: source_dir.into(),
            statements: parse_statements(text),
        }
    }

    /// First value of a directive, looked up case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.statements.iter().find_map(|s| match s {
            Statement::Directive { key: k, value } if *k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// The first dispatch statement, if any.
    pub fn dispatch(&self) -> Option<QueueClause> {
        self.statements.iter().find_map(|s| match s {
            Statement::Bare(value) => QueueClause::parse(value),
            _ => None,
        })
    }
}

/// Split markup into statements, joining continued lines and dropping comments.
pub fn parse_statements(text: &str) -> Vec<Statement> {
    let mut logical: Vec<String> = Vec::new();
    let mut continue_previous = false;
    for raw in text.lines() {
        let mut line = raw.trim_end_matches('\r').to_string();
        let continues = line.trim_end().ends_with('\\');
        if continues {
            line = line.trim_end().trim_end_matches('\\').to_string();
        }
        match logical.last_mut() {
            Some(last) if continue_previous => last.push_str(&line),
            _ => logical.push(line),
        }
        continue_previous = continues;
    }

    let mut statements = Vec::new();
    for line in logical {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(" = ") {
            Some((key, value)) => {
                let key = key.trim().to_lowercase();
                if key.starts_with('#') {
                    continue;
                }
                statements.push(Statement::Directive {
                    key,
                    value: value.trim().to_string(),
                });
            }
            None => {
                if trimmed.starts_with('#') {
                    continue;
                }
                statements.push(Statement::Bare(trimmed.to_string()));
            }
        }
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
universe = vanilla
Executable = jobExecCondor.sh
# request_memory = 9999
request_memory = 2000
transfer_input_files = jobExecCondor.sh, input_$(Process).txt
arguments = -S step1.sh \\
-x root://cmsxrootd.fnal.gov/
Output = test_part$(Process)_$(Cluster).stdout

Queue 10
";

    #[test]
    fn test_parse_statements() {
        let statements = parse_statements(SAMPLE);
        assert_eq!(statements.len(), 7);
        assert_eq!(
            statements[1],
            Statement::Directive {
                key: "executable".to_string(),
                value: "jobExecCondor.sh".to_string()
            }
        );
        assert_eq!(statements[6], Statement::Bare("Queue 10".to_string()));
    }

    #[test]
    fn test_continuation_joins_lines() {
        let description = JobDescription::from_text("test", ".", SAMPLE);
        assert_eq!(
            description.get("arguments"),
            Some("-S step1.sh -x root://cmsxrootd.fnal.gov/")
        );
    }

    #[test]
    fn test_line_without_separator_is_not_a_continuation() {
        let statements = parse_statements("arguments = -n A\n-n B\n");
        assert_eq!(
            statements,
            vec![
                Statement::Directive {
                    key: "arguments".to_string(),
                    value: "-n A".to_string()
                },
                Statement::Bare("-n B".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let description = JobDescription::from_text("test", ".", SAMPLE);
        assert_eq!(description.get("REQUEST_MEMORY"), Some("2000"));
        let text = "# just a comment\n#key = value\n# Queue 3\n";
        assert!(parse_statements(text).is_empty());
    }

    #[test]
    fn test_classification() {
        let statements = parse_statements(SAMPLE);
        let classes: Vec<DirectiveClass> = statements.iter().map(Statement::classify).collect();
        assert_eq!(
            classes,
            vec![
                DirectiveClass::FreeForm,
                DirectiveClass::FreeForm,
                DirectiveClass::Resource,
                DirectiveClass::FileTransfer,
                DirectiveClass::Arguments,
                DirectiveClass::LogPath,
                DirectiveClass::Dispatch,
            ]
        );
    }

    #[test]
    fn test_dispatch_lookup() {
        let description = JobDescription::from_text("test", ".", SAMPLE);
        assert_eq!(description.dispatch(), Some(QueueClause::Count(10)));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = JobDescription::from_file(Path::new("/nonexistent/job.jdl")).unwrap_err();
        assert!(matches!(err, ProdError::MissingInput(_)));
    }
}
