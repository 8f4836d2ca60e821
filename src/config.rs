//! Configuration loading, validation, and override merging.
//!
//! All settings live in a single `config.toml`. Files are sparse — every
//! field has a default and users override only what they need. Unknown
//! keys are rejected to catch typos early.
//!
//! ## Transform Override Merging
//!
//! Enhancement and resize settings follow a two-level scheme: the
//! `[transform]` table holds global defaults, and each `[[sources]]` entry
//! may carry a `transform` table of the same shape whose fields are all
//! optional. [`TransformOverrides::merge_onto`] is the single place where
//! the two are combined into the concrete [`TransformParams`] a worker
//! receives — no per-field merge logic is repeated anywhere else.
//!
//! ## Example
//!
//! ```toml
//! work_dir = "work"
//! archive_dir = "archive"
//! output_dir = "processed"
//!
//! [fetch]
//! timeout_secs = 30
//! max_retries = 2
//!
//! [upload]
//! host = "ftp.example.com"
//! username = "deploy"
//! password = "secret"
//! remote_dir = "/site/images"
//!
//! [transform]
//! target = [1920, 1920]
//! quality = 60
//!
//! [[sources]]
//! url = "https://example.com/banner.png"
//! name = "banner.webp"
//!
//! [sources.transform]
//! contrast = 1.2
//! ```

use crate::transform::{TransformParams, UnsharpParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Working directory for downloads, the ledger, and the failure log.
    pub work_dir: String,
    /// Directory receiving timestamped copies of every uploaded artifact.
    pub archive_dir: String,
    /// Directory mirroring the latest artifact per source.
    pub output_dir: String,
    pub fetch: FetchConfig,
    pub upload: UploadConfig,
    /// Global transform defaults, overridable per source.
    pub transform: TransformParams,
    pub retention: RetentionConfig,
    pub schedule: ScheduleConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            work_dir: "work".to_string(),
            archive_dir: "archive".to_string(),
            output_dir: "processed".to_string(),
            fetch: FetchConfig::default(),
            upload: UploadConfig::default(),
            transform: TransformParams::default(),
            retention: RetentionConfig::default(),
            schedule: ScheduleConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transform.quality > 100 {
            return Err(ConfigError::Validation(
                "transform.quality must be 0-100".into(),
            ));
        }
        if self.transform.target[0] == 0 || self.transform.target[1] == 0 {
            return Err(ConfigError::Validation(
                "transform.target dimensions must be non-zero".into(),
            ));
        }
        for factor in [
            ("sharpness", self.transform.sharpness),
            ("contrast", self.transform.contrast),
            ("brightness", self.transform.brightness),
            ("color", self.transform.color),
        ] {
            if !(0.0..=10.0).contains(&factor.1) {
                return Err(ConfigError::Validation(format!(
                    "transform.{} must be between 0.0 and 10.0",
                    factor.0
                )));
            }
        }
        if self.schedule.workers == 0 {
            return Err(ConfigError::Validation(
                "schedule.workers must be at least 1".into(),
            ));
        }
        if self.schedule.interval_minutes == 0 {
            return Err(ConfigError::Validation(
                "schedule.interval_minutes must be at least 1".into(),
            ));
        }
        for source in &self.sources {
            if source.url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "sources entry with empty url".into(),
                ));
            }
            if let Some(quality) = source.transform.quality {
                if quality > 100 {
                    return Err(ConfigError::Validation(format!(
                        "source {}: quality must be 0-100",
                        source.url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// HTTP download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Default per-request timeout, overridable per source.
    pub timeout_secs: u64,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Reprocess an unchanged source once its ledger record is older than
    /// this many hours. 0 disables the window (pure hash gating).
    pub force_reprocess_hours: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("pixsync/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            force_reprocess_hours: 0,
        }
    }
}

/// FTP destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote directory receiving the artifacts. Missing segments are
    /// created on first upload.
    pub remote_dir: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            remote_dir: "/".to_string(),
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Archive retention settings. The cleanup sweep for working/output files
/// uses `output_days` and runs independently of archive pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Archive entries older than this are pruned.
    pub archive_days: u32,
    /// Working/output files older than this are swept.
    pub output_days: u32,
    /// Never prune a source's sole remaining archive entry, even past the
    /// window.
    pub keep_latest: bool,
    /// Run the maintenance sweep before the first pass.
    pub sweep_on_start: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            archive_days: 14,
            output_days: 14,
            keep_latest: true,
            sweep_on_start: true,
        }
    }
}

/// Service-mode scheduling and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Minutes between passes in `serve` mode.
    pub interval_minutes: u64,
    /// Maximum sources in flight at once.
    pub workers: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            workers: 5,
        }
    }
}

/// One configured remote image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub url: String,
    /// Stable identifier. Derived from the URL basename when omitted.
    pub id: Option<String>,
    /// Output filename. Derived from the URL basename and the configured
    /// output format when omitted.
    pub name: Option<String>,
    /// Extra request headers for this source.
    pub headers: BTreeMap<String, String>,
    /// Per-source request timeout override.
    pub timeout_secs: Option<u64>,
    pub transform: TransformOverrides,
}

/// Sparse per-source transform settings. Every field is optional; unset
/// fields fall back to the global `[transform]` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformOverrides {
    pub target: Option<[u32; 2]>,
    pub working_max_dimension: Option<u32>,
    pub format: Option<crate::transform::OutputFormat>,
    pub quality: Option<u8>,
    pub autocontrast: Option<bool>,
    pub sharpness: Option<f32>,
    pub contrast: Option<f32>,
    pub brightness: Option<f32>,
    pub color: Option<f32>,
    /// Crop box as `[left, top, right, bottom]` pixel coordinates.
    pub crop: Option<[u32; 4]>,
    pub unsharp: Option<UnsharpParams>,
}

impl TransformOverrides {
    /// Merge these overrides onto global defaults, producing the concrete
    /// parameters for one source. Set fields win; unset fields keep the
    /// default.
    pub fn merge_onto(&self, defaults: &TransformParams) -> TransformParams {
        TransformParams {
            target: self.target.unwrap_or(defaults.target),
            working_max_dimension: self
                .working_max_dimension
                .unwrap_or(defaults.working_max_dimension),
            format: self.format.unwrap_or(defaults.format),
            quality: self.quality.unwrap_or(defaults.quality),
            autocontrast: self.autocontrast.unwrap_or(defaults.autocontrast),
            sharpness: self.sharpness.unwrap_or(defaults.sharpness),
            contrast: self.contrast.unwrap_or(defaults.contrast),
            brightness: self.brightness.unwrap_or(defaults.brightness),
            color: self.color.unwrap_or(defaults.color),
            crop: self.crop.or(defaults.crop),
            unsharp: self.unsharp.clone().or_else(|| defaults.unsharp.clone()),
        }
    }
}

/// A stock `config.toml` with every option documented, printed by the
/// `gen-config` subcommand.
pub const STOCK_CONFIG: &str = r##"# pixsync configuration — all values shown are the defaults.

# Working directory: downloads, the hash ledger, and the failure log.
work_dir = "work"
# Timestamped copies of every uploaded artifact.
archive_dir = "archive"
# Latest artifact per source, for inspection outside the archive.
output_dir = "processed"

[fetch]
# user_agent = "pixsync/0.3.0"
timeout_secs = 30
max_retries = 2              # additional attempts after the first failure
base_delay_ms = 1000         # backoff: base * 2^attempt, capped below
max_delay_ms = 30000
force_reprocess_hours = 0    # 0 = skip purely on hash equality

[upload]
host = ""                    # FTP host (required for run/serve)
port = 21
username = "anonymous"
password = ""
remote_dir = "/"
max_retries = 2
base_delay_ms = 1000
max_delay_ms = 30000

[transform]
target = [1920, 1920]        # fit-within bounds, aspect ratio preserved
working_max_dimension = 4000 # upscale small inputs to this before enhancing
format = "webp"              # webp | jpeg | png
quality = 60                 # used by lossy encoders
autocontrast = false
sharpness = 1.0              # 1.0 = no-op for all factors
contrast = 1.0
brightness = 1.0
color = 1.0
# crop = [0, 0, 800, 600]    # [left, top, right, bottom]
# [transform.unsharp]
# radius = 2.0
# percent = 150
# threshold = 3

[retention]
archive_days = 14
output_days = 14
keep_latest = true           # never prune a source's sole archive entry
sweep_on_start = true

[schedule]
interval_minutes = 10
workers = 5

# [[sources]]
# url = "https://example.com/banner.png"
# name = "banner.webp"       # optional output filename
# timeout_secs = 60          # optional per-source timeout
# [sources.headers]
# "X-Api-Key" = "..."
# [sources.transform]        # optional per-source overrides
# contrast = 1.2
"##;
