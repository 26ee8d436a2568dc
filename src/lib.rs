//! prodjobs: batch production tooling for HTCondor.
//!
//! Chains job descriptions into single submissions, finds jobs that are neither
//! finished nor running, and resubmits jobs reading their input from the best
//! available site.

pub mod client;
pub mod config;
pub mod models;
pub mod time_utils;
