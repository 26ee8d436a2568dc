//! Client implementation for prodjobs
//!
//! This module contains the job-description compiler, reconciliation against the
//! output store and scheduler, locality-aware resubmission, the external tool
//! adapters and the CLI command handlers.

pub mod arguments;
pub mod catalog;
pub mod chain;
pub mod commands;
pub mod errors;
pub mod hpc;
pub mod input_files;
pub mod jdl;
pub mod job_query;
pub mod job_submitter;
pub mod manifest;
pub mod queue_clause;
pub mod reconcile;
pub mod resource_envelope;
pub mod resubmit;
pub mod site_resolver;
pub mod storage;

// Re-exports for convenience
pub use chain::{ChainOptions, ChainedJobDescription, create_chain};
pub use errors::ProdError;
pub use hpc::{CondorInterface, JobAction, SchedulerInterface, SchedulerRecord};
pub use reconcile::{ReconciliationSnapshot, reconcile};
pub use site_resolver::{SiteResolution, SiteResolver};
