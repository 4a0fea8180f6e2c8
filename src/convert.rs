use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::{ZipArchive, ZipWriter};

use crate::archive::{EntryKind, Traversal, classify};
use crate::config::{ConversionConfig, OutputTarget, prepare_output_root};
use crate::error::ArchiveError;
use crate::report::{OutputRecord, Report};
use crate::scan::{enumerate, mirror_path};
use crate::stub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Configuring,
    Scanning,
    Processing(usize),
    Done,
    Aborted,
}

#[derive(Debug)]
pub struct Converter {
    cfg: ConversionConfig,
    state: RunState,
}

impl Converter {
    pub fn new(cfg: ConversionConfig) -> Self {
        Self {
            cfg,
            state: RunState::Idle,
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.cfg
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Converts everything the configuration selects. Errors are fatal for the run; problems
    /// with single files or entries end up in the returned report instead.
    pub fn run(&mut self) -> Result<Report> {
        self.state = RunState::Configuring;
        let target = match prepare_output_root(&self.cfg) {
            Ok(target) => target,
            Err(e) => {
                self.state = RunState::Aborted;
                return Err(e.into());
            }
        };

        self.state = RunState::Scanning;
        let jobs = match self.plan(&target) {
            Ok(jobs) => jobs,
            Err(e) => {
                self.state = RunState::Aborted;
                return Err(e);
            }
        };
        info!(files = jobs.len(), input = %self.cfg.input_path.display(), "converting");

        self.state = RunState::Processing(jobs.len());
        let traversal = Traversal::new(&self.cfg);
        let cfg = &self.cfg;
        let report = jobs
            .par_iter()
            .map(|(input, output)| convert_file(cfg, &traversal, input, output))
            .reduce(Report::default, |mut acc, next| {
                acc.merge(next);
                acc
            });

        self.state = RunState::Done;
        Ok(report)
    }

    fn plan(&self, target: &OutputTarget) -> Result<Vec<(PathBuf, PathBuf)>> {
        let input = &self.cfg.input_path;
        if !input.is_dir() {
            let output = match target {
                OutputTarget::File(path) => path.clone(),
                OutputTarget::Directory(dir) => {
                    dir.join(input.file_name().unwrap_or(input.as_os_str()))
                }
            };
            return Ok(vec![(input.clone(), output)]);
        }

        let OutputTarget::Directory(output_root) = target else {
            anyhow::bail!("Output path must be a directory: {}", self.cfg.output_path.display());
        };
        let scope = self.cfg.scope;
        let include_resources = self.cfg.include_non_class_resources;
        let files = enumerate(input, self.cfg.recurse_subdirectories, |path| {
            scope.accepts(path, include_resources)
        })
        .with_context(|| format!("Failed to scan input directory: {}", input.display()))?;

        Ok(files
            .into_iter()
            .map(|file| {
                let output = mirror_path(input, &file, output_root);
                (file, output)
            })
            .collect())
    }
}

/// Converts one top-level file. Never fails: every problem is recorded in the report.
fn convert_file(
    cfg: &ConversionConfig,
    traversal: &Traversal,
    input: &Path,
    output: &Path,
) -> Report {
    let mut report = Report::default();
    report.stats.files = 1;

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = fs::create_dir_all(parent)
    {
        report.warn(format!("Could not create {}: {e}", parent.display()));
        return report;
    }

    match classify(&input.to_string_lossy()) {
        EntryKind::Class => {
            debug!(path = %input.display(), "process");
            let result = fs::read(input)
                .with_context(|| format!("Failed to read class file: {}", input.display()))
                .and_then(|bytes| {
                    stub::process(bytes, &traversal.filter)
                        .with_context(|| format!("Failed to convert {}", input.display()))
                });
            match result {
                Ok(outcome) => {
                    report.stats.record(&outcome);
                    match outcome.bytes() {
                        Some(bytes) => write_output(output, bytes, &mut report),
                        None => debug!(path = %input.display(), ?outcome, "skip"),
                    }
                }
                Err(e) => report.warn(format!("{e:#}")),
            }
        }
        EntryKind::Archive => {
            debug!(path = %input.display(), "process");
            match convert_archive(traversal, input, &mut report) {
                Ok(bytes) => write_output(output, &bytes, &mut report),
                Err(e) => report.warn(format!("{e:#}")),
            }
        }
        EntryKind::Resource if cfg.include_non_class_resources => {
            debug!(path = %input.display(), "process resource file");
            match fs::read(input) {
                Ok(bytes) => {
                    report.stats.resources += 1;
                    write_output(output, &bytes, &mut report);
                }
                Err(e) => report.warn(format!("Failed to read {}: {e}", input.display())),
            }
        }
        EntryKind::Resource => {
            debug!(path = %input.display(), "skip resource file");
            report.stats.skipped += 1;
        }
    }
    report
}

/// Stubs a top-level archive into memory; the output file is only written once this succeeds.
fn convert_archive(traversal: &Traversal, input: &Path, report: &mut Report) -> Result<Vec<u8>> {
    let file =
        File::open(input).with_context(|| format!("Failed to open archive: {}", input.display()))?;
    // SAFETY: The file is opened read-only and outlives the mapping, which is dropped first.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to map archive: {}", input.display()))?;

    let label = input.to_string_lossy().to_string();
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .map_err(|e| ArchiveError::Open(e, label.clone()))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    traversal.transform(&mut archive, &mut writer, &label, 0, report)?;
    let cursor = writer
        .finish()
        .map_err(|e| ArchiveError::Finish(e, label.clone()))?;
    Ok(cursor.into_inner())
}

fn write_output(output: &Path, bytes: &[u8], report: &mut Report) {
    debug!(path = %output.display(), "dump");
    match fs::write(output, bytes) {
        Ok(()) => report.outputs.push(OutputRecord::new(output, bytes)),
        Err(e) => report.warn(format!("Could not write {}: {e}", output.display())),
    }
}
