use anyhow::{Context, Result};
use clap::{Parser, builder::styling};
use env_logger::Builder;
use log::{LevelFilter, debug};
use std::path::PathBuf;
use std::str::FromStr;

use prodjobs::client::commands::chain::{ChainArgs, handle_chain};
use prodjobs::client::commands::config::{ConfigCommands, handle_config_commands};
use prodjobs::client::commands::jobs::{JobCommands, handle_job_commands};
use prodjobs::client::commands::submit::{SubmitArgs, handle_submit};
use prodjobs::config::{ConfigPaths, ProdConfig};

const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::Green.on_default().bold())
    .usage(styling::AnsiColor::Green.on_default().bold())
    .literal(styling::AnsiColor::Cyan.on_default().bold())
    .placeholder(styling::AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(name = "prodjobs")]
#[command(about = "Batch production tooling for HTCondor", long_about = None)]
#[command(version)]
#[command(styles = STYLES)]
struct Cli {
    /// Output format (table or json); default from common.format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Log level (error, warn, info, debug, trace); default from common.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Extra configuration file, applied after the standard locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Merge job descriptions into one chain job
    Chain(ChainArgs),
    /// Prepare, count, submit or check the jobs of a manifest
    Submit(SubmitArgs),
    /// List, remove and resubmit queued jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show or initialise configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn load_config(extra: Option<&PathBuf>) -> Result<ProdConfig> {
    let paths = ConfigPaths::new();
    let mut files: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
    if let Some(extra) = extra {
        if !extra.is_file() {
            anyhow::bail!("Config file {} does not exist", extra.display());
        }
        files.push(extra.clone());
    }
    ProdConfig::load_from_files(&files)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(format) = &cli.format {
        config.common.format = format.clone();
    }
    if let Some(level) = &cli.log_level {
        config.common.log_level = level.clone();
    }

    let level = LevelFilter::from_str(&config.common.log_level)
        .with_context(|| format!("Invalid log level '{}'", config.common.log_level))?;
    Builder::from_default_env().filter_level(level).init();

    // A broken configuration may still be inspected and replaced.
    if !matches!(cli.command, Commands::Config { .. })
        && let Err(errors) = config.validate()
    {
        for error in &errors {
            eprintln!("  - {}", error);
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }
    debug!("Configuration loaded user={}", config.common.user);

    let format = config.common.format.clone();
    match &cli.command {
        Commands::Chain(args) => handle_chain(&config, args, &format),
        Commands::Submit(args) => handle_submit(&config, args, &format),
        Commands::Jobs { command } => handle_job_commands(&config, command, &format),
        Commands::Config { command } => handle_config_commands(&config, command, &format),
    }
}
