//! Stale working/output file sweep.
//!
//! Two jobs, both independent of archive retention:
//!
//! - remove `*.tmp` leftovers from interrupted pipeline runs regardless of
//!   age, and
//! - remove working/output files older than the configured threshold.
//!
//! The sweep is best-effort: individual deletion failures are logged and
//! skipped, never failing the pass.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Sweep the given directories. Returns the number of removed files.
pub fn sweep(dirs: &[&Path], max_age_days: u32) -> usize {
    let max_age = Duration::from_secs(max_age_days as u64 * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut removed = 0;

    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_tmp(path) || is_older_than(path, now, max_age) {
                match std::fs::remove_file(path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "swept stale file");
                        removed += 1;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "could not sweep file")
                    }
                }
            }
        }
    }
    removed
}

fn is_tmp(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

fn is_older_than(path: &Path, now: SystemTime, max_age: Duration) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    now.duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false)
}
