//! # pixsync
//!
//! Synchronizes a configured set of remote images to an FTP destination.
//! Each source is fetched over HTTP, checked against a persisted hash
//! ledger, and — only when its content changed — pushed through a fixed
//! enhancement/resize pipeline, archived with a timestamp, and uploaded.
//!
//! # Architecture: Per-Source Pipeline
//!
//! Every configured source runs the same five-stage pipeline on its own
//! worker, isolated from all other sources:
//!
//! ```text
//! fetch → hash check → transform → archive → upload → ledger commit
//!              │
//!              └── unchanged since last success? skip everything else
//! ```
//!
//! The ledger is committed only after the *entire* pipeline succeeds for a
//! revision, so a failure at any stage leaves the previous record in place
//! and the next pass retries the same revision. A bounded rayon pool caps
//! how many sources are in flight at once; failures never propagate across
//! sources.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `config.toml` loading, validation, and transform override merging |
//! | [`catalog`] | Resolved per-source descriptors: stable ids, output names, merged params |
//! | [`retry`] | Exponential-backoff retry policy shared by fetch and upload |
//! | [`fetch`] | HTTP download with per-source headers, timeout, and retry |
//! | [`ledger`] | Persisted content-hash ledger gating skip/upload decisions |
//! | [`transform`] | Deterministic decode → enhance → resize → encode pipeline |
//! | [`archive`] | Timestamped artifact archive with retention pruning |
//! | [`upload`] | FTP transport behind a trait, with retrying uploader |
//! | [`cleanup`] | Stale working/output file sweep, separate from archive retention |
//! | [`report`] | Per-source outcomes, run summaries, and the failure log |
//! | [`orchestrate`] | Worker pool, per-source state machine, schedule loop, stop signal |
//!
//! # Design Decisions
//!
//! ## Hash of the Raw Bytes, Not the Artifact
//!
//! Change detection digests the *fetched* bytes. Re-tuning the transform
//! pipeline therefore never forces spurious re-uploads of unchanged
//! sources — and, deliberately, changing transform parameters alone does
//! not trigger reprocessing either.
//!
//! ## Trait at the Upload Seam
//!
//! The uploader talks to an [`upload::UploadTransport`] trait with exactly
//! two operations (`ensure_dir`, `store_file`). Production uses FTP via
//! `suppaftp`; tests use a recording mock, so the whole orchestration layer
//! is exercised without a network.
//!
//! ## Message-Passing Aggregation
//!
//! Workers never touch shared logs or counters. Each returns a structured
//! [`report::SourceOutcome`]; the orchestrator aggregates them into a
//! [`report::RunSummary`] after every source has reached a terminal state.

pub mod archive;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod fetch;
pub mod ledger;
pub mod orchestrate;
pub mod report;
pub mod retry;
pub mod transform;
pub mod upload;
