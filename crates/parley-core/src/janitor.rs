//! Retention sweep for cached attachment bytes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

/// A path the sweep could not read or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Regular files examined.
    pub scanned: usize,
    pub deleted: usize,
    /// Deletions that failed.
    pub failed: Vec<SweepFailure>,
    /// Entries kept because their type or age could not be read.
    pub skipped: Vec<SweepFailure>,
}

impl SweepReport {
    fn skip(&mut self, path: &Path, error: &io::Error) {
        warn!(file = %path.display(), error = %error, "Keeping unreadable media entry");
        self.skipped.push(SweepFailure {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

/// Delete regular files in `dir` last modified more than `max_age` ago.
///
/// A missing directory is an empty sweep. Subdirectories and the directory
/// itself are never touched. Entries whose type or age cannot be read are
/// kept and listed in `skipped`; failed deletions are listed in `failed`.
/// Neither stops the sweep.
pub fn sweep_expired_files(dir: &Path, max_age: Duration) -> io::Result<SweepReport> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SweepReport::default()),
        Err(e) => return Err(e),
    };

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut report = SweepReport::default();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                report.skip(dir, &e);
                continue;
            }
        };
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            // Removed between listing and inspection.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                report.skip(&path, &e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        report.scanned += 1;

        if !is_expired(&path, metadata.modified(), cutoff, &mut report) {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.deleted += 1;
                debug!(file = %path.display(), "Deleted expired media file");
            }
            // Someone else removed it first.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to delete expired media file");
                report.failed.push(SweepFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Whether a file modified at `modified` is older than `cutoff`. An unknown
/// age keeps the file and records it as skipped.
fn is_expired(
    path: &Path,
    modified: io::Result<SystemTime>,
    cutoff: SystemTime,
    report: &mut SweepReport,
) -> bool {
    match modified {
        Ok(modified) => modified < cutoff,
        Err(e) => {
            report.skip(path, &e);
            false
        }
    }
}

/// Run one sweep on a blocking thread and log the outcome.
pub async fn run_sweep(dir: PathBuf, max_age: Duration) -> io::Result<SweepReport> {
    let report = tokio::task::spawn_blocking(move || sweep_expired_files(&dir, max_age))
        .await
        .map_err(io::Error::other)??;

    if report.deleted > 0 || !report.failed.is_empty() || !report.skipped.is_empty() {
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Media retention sweep finished"
        );
    }
    Ok(report)
}
