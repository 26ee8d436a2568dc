//! `prodjobs config`: inspect and initialise configuration files.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;

use crate::client::commands::output::{is_json, print_json};
use crate::config::{ConfigPaths, ProdConfig};

#[derive(Subcommand, Debug)]
#[command(after_long_help = "\
EXAMPLES:
    # Show the merged configuration
    prodjobs config show

    # Write a default user configuration
    prodjobs config init --user

    # Check configuration files for errors
    prodjobs config validate
")]
pub enum ConfigCommands {
    /// Print the merged configuration
    Show,
    /// List configuration file locations
    Paths,
    /// Validate the merged configuration
    Validate,
    /// Write a default configuration file
    Init {
        /// Write the user file instead of the local .prodconfig.toml
        #[arg(long)]
        user: bool,
        /// Write to this path
        #[arg(short, long, conflicts_with = "user")]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_commands(
    config: &ProdConfig,
    command: &ConfigCommands,
    format: &str,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            if is_json(format) {
                print_json(config, "configuration");
            } else {
                print!("{}", config.to_toml()?);
            }
        }
        ConfigCommands::Paths => {
            let paths = ConfigPaths::new();
            let mut all = vec![("system", Some(paths.system.clone()))];
            all.push(("user", paths.user.clone()));
            all.push(("local", Some(paths.local.clone())));
            for (label, path) in all {
                match path {
                    Some(path) => {
                        let state = if path.exists() { "found" } else { "absent" };
                        println!("{:<7} {} ({})", label, path.display(), state);
                    }
                    None => println!("{:<7} (unavailable)", label),
                }
            }
        }
        ConfigCommands::Validate => match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(errors) => {
                for error in &errors {
                    eprintln!("  - {}", error);
                }
                anyhow::bail!("{} configuration errors", errors.len());
            }
        },
        ConfigCommands::Init {
            user,
            output,
            force,
        } => {
            let paths = ConfigPaths::new();
            let target = match (output, user) {
                (Some(path), _) => path.clone(),
                (None, true) => paths
                    .user
                    .clone()
                    .context("Could not determine the user configuration directory")?,
                (None, false) => paths.local.clone(),
            };
            if target.exists() && !force {
                anyhow::bail!(
                    "{} already exists, use --force to overwrite",
                    target.display()
                );
            }
            if let Some(parent) = target.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&target, ProdConfig::generate_default_config())
                .with_context(|| format!("Failed to write {}", target.display()))?;
            println!("Wrote {}", target.display());
        }
    }
    Ok(())
}
