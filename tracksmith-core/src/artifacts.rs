//! Checkpoint discovery and run-directory archive handling.

use regex::Regex;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{RelayError, RelayResult};

/// Largest run archive the supervisor will upload, in bytes.
pub const ARCHIVE_UPLOAD_CAP: u64 = 200 * 1024 * 1024;

/// Trainer checkpoints carry a fixed prefix and double extension.
static CHECKPOINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^checkpoint-.*\.pth\.tar$").expect("checkpoint pattern should be valid")
});

/// Tracks which checkpoint files have been uploaded, by file name.
///
/// The run directory is rescanned every pass; names already seen are never
/// returned again, so each checkpoint is uploaded exactly once even though
/// the trainer rewrites and relinks files in place.
#[derive(Debug, Default)]
pub struct CheckpointWatcher {
    seen: HashSet<String>,
}

impl CheckpointWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Return paths of checkpoint files not yet seen, in name order.
    ///
    /// A missing run directory is normal early in a run and yields nothing.
    pub fn scan_new(&mut self, run_dir: &Path) -> RelayResult<Vec<PathBuf>> {
        if !run_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut fresh = Vec::new();
        for entry in std::fs::read_dir(run_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !CHECKPOINT_RE.is_match(&name) {
                continue;
            }
            if self.seen.insert(name) {
                fresh.push(entry.path());
            }
        }

        fresh.sort();
        Ok(fresh)
    }
}

/// Whether the run archive exists and fits under the upload cap.
pub fn within_archive_cap(path: &Path, cap: u64) -> RelayResult<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    Ok(std::fs::metadata(path)?.len() <= cap)
}

/// Flat zip of the run directory's files, written to `archive`.
///
/// Returns the number of entries added. Subdirectories are left out; the
/// trainer keeps the run directory flat.
pub fn bundle_run_dir(run_dir: &Path, archive: &Path) -> RelayResult<usize> {
    let file = std::fs::File::create(archive)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut added = 0;
    if run_dir.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(run_dir)?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let mut buf = Vec::new();
            std::fs::File::open(entry.path())?.read_to_end(&mut buf)?;
            zip.start_file(&name, options)
                .map_err(|e| RelayError::artifact(format!("failed to add {name}: {e}")))?;
            zip.write_all(&buf)?;
            added += 1;
        }
    }

    zip.finish()
        .map_err(|e| RelayError::artifact(format!("failed to finalize archive: {e}")))?;
    Ok(added)
}
