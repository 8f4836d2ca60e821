//! Persisted content-hash ledger — the gate for skip/upload decisions.
//!
//! One record per source id: the SHA-256 of the last successfully
//! processed revision's *raw fetched bytes*, when it was committed, and
//! how many upload retries that revision needed. The ledger is the single
//! point of truth for change detection.
//!
//! # Commit discipline
//!
//! A record advances only after the entire pipeline for a revision
//! (transform + archive + upload) has succeeded. A failure at any stage
//! leaves the old record in place, so the next pass re-attempts the same
//! revision. Commits for different ids are independent; the orchestrator
//! never schedules two workers for the same id in one pass, so per-id
//! serialization holds by construction.
//!
//! # Storage
//!
//! A JSON file (`ledger.json` in the work dir), rewritten atomically via a
//! temp file + rename after every commit so a crash mid-pass loses at most
//! the in-flight sources. A legacy layout mapping id → bare hash string is
//! upgraded on load.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Name of the ledger file within the work directory.
const LEDGER_FILENAME: &str = "ledger.json";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The last successfully processed revision of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashRecord {
    /// SHA-256 hex digest of the raw fetched bytes.
    pub hash: String,
    /// When the revision's pipeline completed.
    pub committed_at: DateTime<Utc>,
    /// Upload retries the revision needed (0 = first try).
    #[serde(default)]
    pub upload_retries: u32,
}

/// Accepts both the current record layout and the legacy bare-hash form.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Full(HashRecord),
    Legacy(String),
}

#[derive(Debug, Default)]
pub struct HashLedger {
    records: BTreeMap<String, HashRecord>,
    path: PathBuf,
}

impl HashLedger {
    /// Load the ledger from the work directory.
    ///
    /// A missing file yields an empty ledger. An unreadable or unparsable
    /// file is an error — silently starting empty would re-upload every
    /// source.
    pub fn load(work_dir: &Path) -> Result<Self, LedgerError> {
        let path = work_dir.join(LEDGER_FILENAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    records: BTreeMap::new(),
                    path,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let stored: BTreeMap<String, StoredRecord> = serde_json::from_str(&content)?;
        let records = stored
            .into_iter()
            .map(|(id, record)| {
                let record = match record {
                    StoredRecord::Full(record) => record,
                    StoredRecord::Legacy(hash) => {
                        warn!(id = %id, "upgrading legacy ledger entry");
                        HashRecord {
                            hash,
                            committed_at: Utc::now(),
                            upload_retries: 0,
                        }
                    }
                };
                (id, record)
            })
            .collect();
        Ok(Self { records, path })
    }

    /// Write the ledger atomically (temp file + rename).
    pub fn persist(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Whether the source must run the full pipeline.
    ///
    /// True when no record exists or the stored hash differs. When
    /// `reprocess_after` is set, an unchanged source whose record is older
    /// than the window is reprocessed anyway.
    pub fn should_process(
        &self,
        id: &str,
        new_hash: &str,
        reprocess_after: Option<Duration>,
    ) -> bool {
        match self.records.get(id) {
            None => true,
            Some(record) if record.hash != new_hash => true,
            Some(record) => match reprocess_after {
                Some(window) => Utc::now() - record.committed_at >= window,
                None => false,
            },
        }
    }

    /// Atomically replace the record for `id`.
    pub fn commit(
        &mut self,
        id: &str,
        hash: String,
        committed_at: DateTime<Utc>,
        upload_retries: u32,
    ) {
        self.records.insert(
            id.to_string(),
            HashRecord {
                hash,
                committed_at,
                upload_retries,
            },
        );
    }

    pub fn record(&self, id: &str) -> Option<&HashRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// SHA-256 hex digest of a fetched body.
pub fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}
