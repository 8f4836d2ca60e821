//! Per-source outcomes, run summaries, and the failure log.
//!
//! Workers return a [`SourceOutcome`] instead of mutating shared state;
//! the orchestrator folds them into a [`RunSummary`] once every source has
//! reached a terminal state, so aggregation is race-free by construction.
//!
//! The failure log is an append-only, tab-separated file for operational
//! triage — one line per failed source per pass, separate from the main
//! tracing output.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Pipeline stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    HashCheck,
    Transform,
    Archive,
    Upload,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::HashCheck => "hash-check",
            Stage::Transform => "transform",
            Stage::Archive => "archive",
            Stage::Upload => "upload",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Terminal state of one source's pipeline for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// Content unchanged since the last committed revision (or the stop
    /// signal arrived before this source started).
    Skipped,
    /// Full pipeline ran and the ledger was committed.
    Succeeded,
    /// A stage failed; nothing after it ran and the ledger did not move.
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub id: String,
    pub status: SourceStatus,
}

impl SourceOutcome {
    pub fn skipped(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: SourceStatus::Skipped,
        }
    }

    pub fn succeeded(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: SourceStatus::Succeeded,
        }
    }

    pub fn failed(id: &str, stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            id: id.to_string(),
            status: SourceStatus::Failed {
                stage,
                error: error.to_string(),
            },
        }
    }
}

/// Aggregate of all per-source outcomes for one pass.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<SourceOutcome>,
}

impl RunSummary {
    pub fn new(outcomes: Vec<SourceOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Stage, &str)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            SourceStatus::Failed { stage, error } => {
                Some((outcome.id.as_str(), stage, error.as_str()))
            }
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&SourceStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} unchanged, {} failed ({} total)",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.outcomes.len()
        )
    }
}

/// Append-only failure log: `timestamp \t id \t stage \t error`.
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, id: &str, stage: Stage, error: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        // errors can be multi-line (wrapped causes); flatten for one-line grep
        let flat = error.replace(['\n', '\t'], " ");
        writeln!(file, "{}\t{}\t{}\t{}", Utc::now().to_rfc3339(), id, stage, flat)
    }

    /// Record every failure of a pass.
    pub fn record_summary(&self, summary: &RunSummary) -> std::io::Result<()> {
        for (id, stage, error) in summary.failures() {
            self.append(id, *stage, error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mixed_summary() -> RunSummary {
        RunSummary::new(vec![
            SourceOutcome::succeeded("a"),
            SourceOutcome::skipped("b"),
            SourceOutcome::failed("c", Stage::Upload, "connection reset"),
            SourceOutcome::succeeded("d"),
        ])
    }

    #[test]
    fn summary_counts() {
        let summary = mixed_summary();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.has_failures());
    }

    #[test]
    fn summary_display() {
        assert_eq!(
            mixed_summary().to_string(),
            "2 uploaded, 1 unchanged, 1 failed (4 total)"
        );
    }

    #[test]
    fn empty_summary_has_no_failures() {
        let summary = RunSummary::default();
        assert!(!summary.has_failures());
        assert_eq!(summary.to_string(), "0 uploaded, 0 unchanged, 0 failed (0 total)");
    }

    #[test]
    fn failure_log_appends_one_line_per_failure() {
        let tmp = TempDir::new().unwrap();
        let log = FailureLog::new(tmp.path().join("failures.log"));
        log.record_summary(&mixed_summary()).unwrap();
        log.append("e", Stage::Fetch, "timed\nout").unwrap();

        let content = std::fs::read_to_string(tmp.path().join("failures.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("c\tupload\tconnection reset"));
        // newlines inside errors are flattened
        assert!(lines[1].contains("timed out"));
    }

    #[test]
    fn failure_log_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let log = FailureLog::new(tmp.path().join("work/logs/failures.log"));
        log.append("a", Stage::Transform, "boom").unwrap();
        assert!(tmp.path().join("work/logs/failures.log").exists());
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(Stage::Fetch.to_string(), "fetch");
        assert_eq!(Stage::HashCheck.to_string(), "hash-check");
        assert_eq!(Stage::Commit.to_string(), "commit");
    }
}
