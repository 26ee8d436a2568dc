//! `prodjobs chain`: merge job descriptions into one chain job.

use anyhow::Result;
use clap::Args;
use log::info;
use std::path::PathBuf;
use tabled::Tabled;

use crate::client::chain::{ChainOptions, create_chain};
use crate::client::commands::output::{display_table_with_count, is_json, print_json};
use crate::config::ProdConfig;

#[derive(Args, Debug)]
#[command(after_long_help = "\
EXAMPLES:
    # Chain two prepared jobs
    prodjobs chain -n chainSig -l signal_M500 jobExecCondor_sig1.jdl jobExecCondor_sig2.jdl

    # Enable per-subjob checkpoints
    prodjobs chain -n chainSig -l signal_M500 --checkpoint jobExecCondor_sig*.jdl
")]
pub struct ChainArgs {
    /// Name of the chain job
    #[arg(short, long)]
    pub name: String,

    /// Log-name prefix of the first job, replaced by the chain name
    #[arg(short, long)]
    pub log: String,

    /// Job description files, in execution order
    #[arg(required = true, num_args = 1..)]
    pub jdls: Vec<PathBuf>,

    /// Transfer a checkpoint file for every subjob
    #[arg(long)]
    pub checkpoint: bool,

    /// Directory receiving the chain outputs
    #[arg(short = 'd', long, default_value = ".")]
    pub work_dir: PathBuf,
}

#[derive(Tabled)]
struct SubjobRow {
    #[tabled(rename = "Ordinal")]
    ordinal: usize,
    #[tabled(rename = "Job")]
    name: String,
    #[tabled(rename = "Arguments")]
    arguments: String,
    #[tabled(rename = "Staged files")]
    staged: usize,
}

pub fn handle_chain(config: &ProdConfig, args: &ChainArgs, format: &str) -> Result<()> {
    let mut chain_config = config.chain.clone();
    chain_config.checkpoint |= args.checkpoint;
    let options =
        ChainOptions::new(&args.name, &args.log, &chain_config).with_work_dir(&args.work_dir);
    let chain = create_chain(&args.jdls, &options)?;
    info!(
        "Chain built name={} subjobs={} jdl={}",
        chain.name,
        chain.subjobs.len(),
        chain.jdl_path.display()
    );

    if is_json(format) {
        print_json(&chain, "chain");
        return Ok(());
    }
    let rows: Vec<SubjobRow> = chain
        .subjobs
        .iter()
        .map(|s| SubjobRow {
            ordinal: s.ordinal,
            name: s.name.clone(),
            arguments: s.arguments.clone().unwrap_or_default(),
            staged: s.staged_files.len(),
        })
        .collect();
    display_table_with_count(&rows, "subjobs");
    println!("Wrote {}", chain.jdl_path.display());
    println!("Wrote {}", chain.archive.display());
    Ok(())
}
