//! Error types for prodjobs operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the core components.
///
/// Merge-time variants abort the whole chain build. `ExternalQuery` and
/// `PartialFailure` are scoped to single jobs or files and are collected by the
/// batch drivers instead of aborting them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProdError {
    /// Bad or missing configuration or directive value
    #[error("configuration error: {0}")]
    Config(String),

    /// A resource request directive that is not an integer
    #[error("malformed resource value for '{key}': '{value}'")]
    MalformedResourceValue { key: String, value: String },

    /// A per-process wildcard in a file-transfer directive matched nothing
    #[error("no files match wildcard pattern '{0}'")]
    UnmatchedWildcard(String),

    /// A referenced input file does not exist
    #[error("missing input file: {}", .0.display())]
    MissingInput(PathBuf),

    /// Filesystem error with context
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Scheduler, catalog or store unreachable or returned garbage
    #[error("external query failed: {0}")]
    ExternalQuery(String),

    /// Some units of a batch failed while others succeeded
    #[error("{failed} of {total} units failed")]
    PartialFailure { failed: usize, total: usize },
}

impl ProdError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalQuery(msg.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProdError>;
