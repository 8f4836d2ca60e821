//! Timestamped artifact archive with retention pruning.
//!
//! Every uploaded artifact gets a copy under
//! `<archive_dir>/<source id>/<YYYYmmdd_HHMMSS>.<ext>`. Entries are
//! append-only: a timestamp collision (two revisions within one second, or
//! a re-run after a failed commit) gets a numeric suffix instead of
//! overwriting.
//!
//! Pruning removes entries older than the retention window. By default the
//! newest entry of each source survives even past the window, so no source
//! is ever left without archived history; the flag exists because that
//! safety policy is a choice, not a law.

use crate::transform::Artifact;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Timestamp layout used in archive filenames.
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free archive slot for {0} at {1}")]
    SlotExhausted(String, String),
}

/// One archived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

pub struct Archiver {
    root: PathBuf,
}

impl Archiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write a timestamped copy of the artifact, never overwriting a prior
    /// entry.
    pub fn store(
        &self,
        artifact: &Artifact,
        id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ArchiveEntry, ArchiveError> {
        let dir = self.root.join(id);
        fs::create_dir_all(&dir)?;

        let stamp = timestamp.format(STAMP_FORMAT).to_string();
        let ext = artifact.format.extension();
        let mut path = dir.join(format!("{stamp}.{ext}"));
        let mut suffix = 0u32;
        while path.exists() {
            suffix += 1;
            if suffix > 999 {
                return Err(ArchiveError::SlotExhausted(id.to_string(), stamp));
            }
            path = dir.join(format!("{stamp}-{suffix}.{ext}"));
        }

        fs::write(&path, &artifact.bytes)?;
        debug!(id, path = %path.display(), "archived artifact");
        Ok(ArchiveEntry {
            source_id: id.to_string(),
            timestamp,
            path,
        })
    }

    /// All entries for one source, oldest first. Files whose names don't
    /// parse as timestamps are ignored.
    pub fn entries_for(&self, id: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let dir = self.root.join(id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let path = dirent?.path();
            if let Some(timestamp) = parse_stamp(&path) {
                entries.push(ArchiveEntry {
                    source_id: id.to_string(),
                    timestamp,
                    path,
                });
            }
        }
        entries.sort_by_key(|e| (e.timestamp, e.path.clone()));
        Ok(entries)
    }

    /// Delete entries older than `retention_days`. With `keep_latest`, the
    /// newest entry of each source survives regardless of age. Returns the
    /// number of deleted entries.
    pub fn prune(&self, retention_days: u32, keep_latest: bool) -> Result<usize, ArchiveError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let mut removed = 0;

        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_dir() {
                continue;
            }
            let id = dirent.file_name().to_string_lossy().to_string();
            let mut entries = self.entries_for(&id)?;
            if entries.is_empty() {
                continue;
            }
            if keep_latest {
                entries.pop(); // newest stays no matter what
            }
            for entry in entries {
                if entry.timestamp < cutoff {
                    match fs::remove_file(&entry.path) {
                        Ok(()) => removed += 1,
                        Err(err) => {
                            warn!(path = %entry.path.display(), error = %err, "could not prune archive entry")
                        }
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Parse `YYYYmmdd_HHMMSS` (with optional `-N` suffix) out of a filename.
fn parse_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let stamp = stem.split('-').next().unwrap_or(stem);
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
