use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::ops::AddAssign;
use std::path::Path;
use tracing::warn;

use crate::stub::Outcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub files: usize,
    pub archives: usize,
    pub stubbed: usize,
    pub unchanged: usize,
    pub ignored: usize,
    pub resources: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Stub(_) => self.stubbed += 1,
            Outcome::Unchanged(_) => self.unchanged += 1,
            Outcome::Ignore(_) => self.ignored += 1,
        }
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.archives += rhs.archives;
        self.stubbed += rhs.stubbed;
        self.unchanged += rhs.unchanged;
        self.ignored += rhs.ignored;
        self.resources += rhs.resources;
        self.skipped += rhs.skipped;
        self.errors += rhs.errors;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

impl OutputRecord {
    pub fn new(path: &Path, bytes: &[u8]) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            size: bytes.len() as u64,
            sha256: hash_content(bytes),
        }
    }
}

/// What one unit of work produced. Each rayon task owns one; they are merged at the end.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub stats: RunStats,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub outputs: Vec<OutputRecord>,
}

impl Report {
    pub fn warn(&mut self, message: String) {
        warn!("{message}");
        self.stats.errors += 1;
        self.warnings.push(message);
    }

    pub fn merge(&mut self, other: Report) {
        self.stats += other.stats;
        self.warnings.extend(other.warnings);
        self.outputs.extend(other.outputs);
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub input: String,
    pub output: String,
    pub preserve_references: bool,
    pub duration_ms: u64,
    pub stats: RunStats,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn to_text(&self) -> String {
        let s = &self.stats;
        format!(
            "{} files, {} archives: {} stubbed, {} unchanged, {} ignored, {} resources copied, {} skipped, {} errors ({}ms)",
            s.files,
            s.archives,
            s.stubbed,
            s.unchanged,
            s.ignored,
            s.resources,
            s.skipped,
            s.errors,
            self.duration_ms
        )
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    output_root: String,
    files: &'a [OutputRecord],
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Writes the list of produced files, sorted by path, as pretty JSON.
pub fn write_manifest(path: &Path, output_root: &Path, outputs: &[OutputRecord]) -> Result<()> {
    let mut files = outputs.to_vec();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let manifest = Manifest {
        output_root: output_root.to_string_lossy().to_string(),
        files: &files,
    };
    let json = serde_json::to_string_pretty(&manifest)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    Ok(())
}
