//! CLI command handlers

pub mod chain;
pub mod config;
pub mod jobs;
pub mod output;
pub mod submit;
