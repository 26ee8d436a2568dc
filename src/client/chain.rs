//! Chain jobs: merge many job descriptions into one chained submission.
//!
//! The chain runs on a single scheduler slot. Each input description becomes a subjob
//! with its own staging directory (`job0`, `job1`, ...) holding its arguments, its name
//! and its input files. The staging tree is shipped as one archive and a chain executor
//! script dispatches the subjobs by ordinal on the worker.
//!
//! Merge policy per directive class:
//! - `request_*`: maximum over all subjobs
//! - `transfer_input_files`: files copied into the subjob's staging directory
//! - `arguments`: written to the subjob's `arguments.txt`, never merged
//! - `output` / `error` / `log`: first wins, log prefix replaced by the chain name
//! - `Queue`: first wins, then rewritten to the number of subjobs
//! - everything else: first wins
//!
//! Nothing becomes visible under the chain's final names until every step succeeded.

use flate2::Compression;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::client::errors::{ProdError, Result};
use crate::client::jdl::{
    DirectiveClass, JobDescription, KEY_ARGUMENTS, KEY_OUTPUT_REMAPS, KEY_TRANSFER_INPUT,
    KEY_TRANSFER_OUTPUT, PROCESS_MARKER, Statement,
};
use crate::client::queue_clause::QueueClause;
use crate::client::resource_envelope::ResourceEnvelope;
use crate::config::ChainConfig;

pub const ARGUMENTS_FILE: &str = "arguments.txt";
pub const JOBNAME_FILE: &str = "jobname.txt";
const CHECKPOINT_FLAG: &str = "-C";

/// Options for one chain build.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Name of the chain job; also the staging directory and archive stem
    pub name: String,
    /// Log-name prefix of the original jobs, replaced by the chain name in log paths
    pub log_prefix: String,
    /// Script that dispatches subjobs on the worker
    pub executor_script: String,
    /// Checkpoint file name, when checkpointing is enabled
    pub checkpoint_file: Option<String>,
    /// Directory receiving the staging tree, archive and chain description
    pub work_dir: PathBuf,
}

impl ChainOptions {
    pub fn new(name: impl Into<String>, log_prefix: impl Into<String>, config: &ChainConfig) -> Self {
        Self {
            name: name.into(),
            log_prefix: log_prefix.into(),
            executor_script: config.executor_script.clone(),
            checkpoint_file: config
                .checkpoint
                .then(|| config.checkpoint_file.clone()),
            work_dir: PathBuf::from("."),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProdError::config("chain name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(ProdError::config(format!(
                "chain name must not contain '/': {}",
                self.name
            )));
        }
        if self.executor_script.trim().is_empty() {
            return Err(ProdError::config("chain executor script must not be empty"));
        }
        Ok(())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join(&self.name)
    }

    pub fn archive_name(&self) -> String {
        format!("{}.tar.gz", self.name)
    }

    pub fn checkpoint_dir_name(&self) -> String {
        format!("{}_checkpoints", self.name)
    }

    pub fn jdl_path(&self) -> PathBuf {
        self.work_dir.join(format!("jobExecCondor_{}.jdl", self.name))
    }
}

/// Bookkeeping for one subjob of a chain.
#[derive(Debug, Clone, Serialize)]
pub struct Subjob {
    pub ordinal: usize,
    pub name: String,
    pub arguments: Option<String>,
    pub staged_files: Vec<String>,
}

/// Result of merging job descriptions.
#[derive(Debug, Clone, Serialize)]
pub struct ChainedJobDescription {
    pub name: String,
    /// Directives in output order
    pub directives: Vec<(String, String)>,
    /// Bare statements other than the dispatch statement
    pub bare: Vec<String>,
    pub queue: QueueClause,
    pub subjobs: Vec<Subjob>,
    pub staging_dir: PathBuf,
    pub archive: PathBuf,
    pub jdl_path: PathBuf,
    pub checkpoint_dir: Option<PathBuf>,
}

impl ChainedJobDescription {
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.directives
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render as job description markup.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.directives {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        for line in &self.bare {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.queue.to_jdl_line());
        out.push('\n');
        out
    }
}

/// Accumulates merged state while subjobs are processed.
#[derive(Default)]
struct ChainMerger {
    directives: Vec<(String, String)>,
    envelope: ResourceEnvelope,
    bare: Vec<String>,
    dispatch: Option<QueueClause>,
}

impl ChainMerger {
    fn position(&self, key: &str) -> Option<usize> {
        self.directives.iter().position(|(k, _)| k == key)
    }

    /// Keep the first non-empty value of a directive.
    fn keep_first(&mut self, key: &str, value: String) {
        match self.position(key) {
            Some(idx) if self.directives[idx].1.is_empty() => self.directives[idx].1 = value,
            Some(_) => debug!("Dropping duplicate directive {}", key),
            None => self.directives.push((key.to_string(), value)),
        }
    }

    /// Replace a directive's value in place, or append it.
    fn set(&mut self, key: &str, value: String) {
        match self.position(key) {
            Some(idx) => self.directives[idx].1 = value,
            None => self.directives.push((key.to_string(), value)),
        }
    }

    fn absorb_resource(&mut self, key: &str, value: &str) -> Result<()> {
        self.envelope.absorb(key, value)?;
        if self.position(key).is_none() {
            // placeholder keeps first-seen order; filled from the envelope at the end
            self.directives.push((key.to_string(), String::new()));
        }
        Ok(())
    }

    fn fill_resources(&mut self) {
        let maxima: Vec<(String, u64)> = self
            .envelope
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for (key, value) in maxima {
            self.set(&key, value.to_string());
        }
    }
}

/// Merge the given job description files into one chain job.
///
/// Produces `<work_dir>/<name>/job<N>/...`, `<work_dir>/<name>.tar.gz` and
/// `<work_dir>/jobExecCondor_<name>.jdl`. Any failure removes the partial staging
/// tree and archive and leaves previous outputs under the final names untouched.
pub fn create_chain(jdls: &[PathBuf], options: &ChainOptions) -> Result<ChainedJobDescription> {
    options.validate()?;
    if jdls.is_empty() {
        return Err(ProdError::config("no job descriptions given for chain"));
    }

    // Parse everything up front so a missing description aborts before any write.
    let descriptions = jdls
        .iter()
        .map(|p| JobDescription::from_file(p))
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(&options.work_dir).map_err(|e| {
        ProdError::io(
            format!("Failed to create {}", options.work_dir.display()),
            e,
        )
    })?;
    let tmp_staging = options.work_dir.join(format!(".{}.staging", options.name));
    let tmp_archive = options.work_dir.join(format!(".{}.tmp", options.archive_name()));
    let tmp_jdl = options.work_dir.join(format!(".{}.jdl.tmp", options.name));

    let result = build_chain(&descriptions, options, &tmp_staging, &tmp_archive, &tmp_jdl);
    if result.is_err() {
        for path in [&tmp_archive, &tmp_jdl] {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
        if tmp_staging.exists() {
            let _ = fs::remove_dir_all(&tmp_staging);
        }
    }
    result
}

fn build_chain(
    descriptions: &[JobDescription],
    options: &ChainOptions,
    tmp_staging: &Path,
    tmp_archive: &Path,
    tmp_jdl: &Path,
) -> Result<ChainedJobDescription> {
    if tmp_staging.exists() {
        fs::remove_dir_all(tmp_staging).map_err(|e| {
            ProdError::io(format!("Failed to clear {}", tmp_staging.display()), e)
        })?;
    }
    create_dir(tmp_staging)?;

    let mut merger = ChainMerger::default();
    let mut subjobs = Vec::with_capacity(descriptions.len());

    for (ordinal, description) in descriptions.iter().enumerate() {
        let subdir = tmp_staging.join(format!("job{}", ordinal));
        create_dir(&subdir)?;
        let mut subjob = Subjob {
            ordinal,
            name: description.name.clone(),
            arguments: None,
            staged_files: Vec::new(),
        };

        for statement in &description.statements {
            let class = statement.classify();
            match statement {
                Statement::Directive { key, value } => match class {
                    DirectiveClass::Resource => merger.absorb_resource(key, value)?,
                    DirectiveClass::FileTransfer => {
                        subjob.staged_files.extend(stage_inputs(
                            value,
                            &description.source_dir,
                            &subdir,
                        )?);
                    }
                    DirectiveClass::Arguments => {
                        write_file(&subdir.join(ARGUMENTS_FILE), value)?;
                        subjob.arguments = Some(value.clone());
                    }
                    DirectiveClass::LogPath => {
                        let value = if options.log_prefix.is_empty() {
                            value.clone()
                        } else {
                            value.replace(&options.log_prefix, &options.name)
                        };
                        merger.keep_first(key, value);
                    }
                    DirectiveClass::Dispatch | DirectiveClass::FreeForm => {
                        merger.keep_first(key, value.clone());
                    }
                },
                Statement::Bare(line) => {
                    if class == DirectiveClass::Dispatch {
                        if merger.dispatch.is_none() {
                            merger.dispatch = QueueClause::parse(line);
                        }
                    } else if !merger.bare.contains(line) {
                        merger.bare.push(line.clone());
                    }
                }
            }
        }

        write_file(&subdir.join(JOBNAME_FILE), &description.name)?;
        debug!(
            "Staged subjob ordinal={} name={} files={}",
            ordinal,
            subjob.name,
            subjob.staged_files.len()
        );
        subjobs.push(subjob);
    }

    merger.fill_resources();

    let archive_name = options.archive_name();
    let mut transfer = vec![options.executor_script.clone(), archive_name.clone()];
    let mut arguments = format!("-J {} -N {}", options.name, subjobs.len());
    let mut checkpoint_dir = None;
    if let Some(checkpoint_file) = &options.checkpoint_file {
        let dir_name = options.checkpoint_dir_name();
        transfer.push(dir_name.clone());
        arguments.push(' ');
        arguments.push_str(CHECKPOINT_FLAG);

        let outputs = match merger.position(KEY_TRANSFER_OUTPUT) {
            Some(idx) if !merger.directives[idx].1.is_empty() => {
                format!("{},{}", merger.directives[idx].1, checkpoint_file)
            }
            _ => checkpoint_file.clone(),
        };
        merger.set(KEY_TRANSFER_OUTPUT, outputs);
        merger.set(
            KEY_OUTPUT_REMAPS,
            format!(
                "\"{} = {}/{}_{}\"",
                checkpoint_file, dir_name, PROCESS_MARKER, checkpoint_file
            ),
        );
        merger.set("when_to_transfer_output", "ON_EXIT_OR_EVICT".to_string());
        checkpoint_dir = Some(options.work_dir.join(dir_name));
    }
    merger.set(KEY_TRANSFER_INPUT, transfer.join(","));
    merger.set(KEY_ARGUMENTS, arguments);

    if let Some(previous) = &merger.dispatch {
        debug!(
            "Replacing dispatch statement '{}' with subjob count {}",
            previous,
            subjobs.len()
        );
    } else {
        warn!(
            "No dispatch statement found in chain inputs, using subjob count {}",
            subjobs.len()
        );
    }
    let queue = QueueClause::Count(subjobs.len() as u32);

    write_archive(tmp_staging, &options.name, tmp_archive)?;

    let chained = ChainedJobDescription {
        name: options.name.clone(),
        directives: merger.directives,
        bare: merger.bare,
        queue,
        subjobs,
        staging_dir: options.staging_dir(),
        archive: options.work_dir.join(&archive_name),
        jdl_path: options.jdl_path(),
        checkpoint_dir,
    };
    write_file(tmp_jdl, &chained.render())?;

    // Everything is in place; move into the final names.
    swap_into_place(&[
        (tmp_staging, chained.staging_dir.as_path()),
        (tmp_archive, chained.archive.as_path()),
        (tmp_jdl, chained.jdl_path.as_path()),
    ])?;
    if let Some(dir) = &chained.checkpoint_dir {
        fs::create_dir_all(dir)
            .map_err(|e| ProdError::io(format!("Failed to create {}", dir.display()), e))?;
    }

    info!(
        "Chain built name={} subjobs={} archive={} jdl={}",
        chained.name,
        chained.subjobs.len(),
        chained.archive.display(),
        chained.jdl_path.display()
    );
    Ok(chained)
}

/// Copy the files named by a `transfer_input_files` value into `dest`.
///
/// Tokens containing the per-process marker are expanded with a filesystem glob; a
/// marker that matches nothing is an error, as is any missing plain file.
fn stage_inputs(value: &str, source_dir: &Path, dest: &Path) -> Result<Vec<String>> {
    let mut staged = Vec::new();
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let sources = if token.contains(PROCESS_MARKER) {
            expand_wildcard(token, source_dir)?
        } else {
            let path = source_dir.join(token);
            if !path.exists() {
                return Err(ProdError::MissingInput(path));
            }
            vec![path]
        };
        for source in sources {
            let file_name = source
                .file_name()
                .ok_or_else(|| ProdError::MissingInput(source.clone()))?;
            let target = dest.join(file_name);
            copy_path(&source, &target)?;
            staged.push(file_name.to_string_lossy().to_string());
        }
    }
    Ok(staged)
}

fn expand_wildcard(token: &str, source_dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped_dir = glob::Pattern::escape(&source_dir.to_string_lossy());
    let escaped_token = glob::Pattern::escape(token).replace(
        &glob::Pattern::escape(PROCESS_MARKER),
        "*",
    );
    let pattern = format!("{}/{}", escaped_dir.trim_end_matches('/'), escaped_token);
    let entries = glob::glob(&pattern)
        .map_err(|e| ProdError::config(format!("Invalid wildcard '{}': {}", token, e)))?;
    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            ProdError::io(format!("Failed to expand '{}'", token), e.into_error())
        })?;
        matches.push(path);
    }
    if matches.is_empty() {
        return Err(ProdError::UnmatchedWildcard(token.to_string()));
    }
    matches.sort();
    Ok(matches)
}

fn copy_path(source: &Path, target: &Path) -> Result<()> {
    if source.is_dir() {
        create_dir(target)?;
        let entries = fs::read_dir(source)
            .map_err(|e| ProdError::io(format!("Failed to read {}", source.display()), e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| ProdError::io(format!("Failed to read {}", source.display()), e))?;
            copy_path(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, target).map(|_| ()).map_err(|e| {
            ProdError::io(
                format!(
                    "Failed to copy {} to {}",
                    source.display(),
                    target.display()
                ),
                e,
            )
        })
    }
}

fn write_archive(staging: &Path, name: &str, archive: &Path) -> Result<()> {
    let context = || format!("Failed to write archive {}", archive.display());
    let file = File::create(archive).map_err(|e| ProdError::io(context(), e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(name, staging)
        .map_err(|e| ProdError::io(context(), e))?;
    let encoder = builder.into_inner().map_err(|e| ProdError::io(context(), e))?;
    encoder.finish().map_err(|e| ProdError::io(context(), e))?;
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| ProdError::io(format!("Failed to create {}", path.display()), e))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .map_err(|e| ProdError::io(format!("Failed to write {}", path.display()), e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        ProdError::io(
            format!("Failed to move {} to {}", from.display(), to.display()),
            e,
        )
    })
}

/// Move each `tmp` onto its `target` as one unit.
///
/// Existing targets are set aside first. If any move fails, the moves already made
/// go back to their `tmp` names and the set-aside targets are restored.
fn swap_into_place(pairs: &[(&Path, &Path)]) -> Result<()> {
    let mut moved: Vec<(&Path, &Path, Option<PathBuf>)> = Vec::new();
    for &(tmp, target) in pairs {
        let step = set_aside(target).and_then(|aside| match rename(tmp, target) {
            Ok(()) => Ok(aside),
            Err(e) => {
                if let Some(aside) = &aside {
                    restore(aside, target);
                }
                Err(e)
            }
        });
        match step {
            Ok(aside) => moved.push((tmp, target, aside)),
            Err(e) => {
                for (tmp, target, aside) in moved.into_iter().rev() {
                    restore(target, tmp);
                    if let Some(aside) = aside {
                        restore(&aside, target);
                    }
                }
                return Err(e);
            }
        }
    }
    for (_, _, aside) in moved {
        if let Some(aside) = aside {
            remove_path(&aside);
        }
    }
    Ok(())
}

/// Rename an existing `target` to a hidden sibling and return where it went.
fn set_aside(target: &Path) -> Result<Option<PathBuf>> {
    if !target.exists() {
        return Ok(None);
    }
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let aside = target.with_file_name(format!(".{}.previous", name));
    remove_path(&aside);
    rename(target, &aside)?;
    Ok(Some(aside))
}

fn restore(from: &Path, to: &Path) {
    if let Err(e) = fs::rename(from, to) {
        warn!(
            "Could not restore {} to {}: {}",
            from.display(),
            to.display(),
            e
        );
    }
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return;
    };
    if let Err(e) = result {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}
