//! Artifact upload over FTP, behind a transport trait.
//!
//! [`UploadTransport`] is the seam between the retry/orchestration logic
//! and the wire: two operations, `ensure_dir` and `store_file`. The
//! production implementation is [`FtpTransport`] (suppaftp, one connection
//! per operation, so the type stays `Sync` and workers never share a
//! session); tests use the recording [`tests::MockTransport`].
//!
//! Uploads are idempotent — storing the same artifact at the same path
//! twice leaves the same remote state — so the retry loop re-runs the
//! whole operation on transient failures without special casing.

use crate::config::UploadConfig;
use crate::retry::RetryPolicy;
use crate::transform::Artifact;
use std::io::Cursor;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl UploadError {
    /// Connection-level failures are worth retrying; protocol rejections
    /// (bad credentials, permission denied) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Io(_)
                | UploadError::Ftp(FtpError::ConnectionError(_))
                | UploadError::Ftp(FtpError::BadResponse)
        )
    }
}

/// Result of one successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub source_id: String,
    pub remote_path: String,
    /// Retries needed before the upload went through.
    pub retries: u32,
}

/// Remote storage operations the uploader depends on.
pub trait UploadTransport: Sync {
    /// Create the directory chain, tolerating segments that already exist.
    fn ensure_dir(&self, path: &str) -> Result<(), UploadError>;

    /// Store a file under `dir/name`, replacing any previous content.
    fn store_file(&self, dir: &str, name: &str, bytes: &[u8]) -> Result<(), UploadError>;
}

/// FTP transport. Connects per operation; `ensure_dir` walks the remote
/// path segment by segment, creating what's missing.
pub struct FtpTransport {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl FtpTransport {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn connect(&self) -> Result<FtpStream, UploadError> {
        let mut stream = FtpStream::connect(format!("{}:{}", self.host, self.port))?;
        stream.login(&self.username, &self.password)?;
        stream.transfer_type(FileType::Binary)?;
        Ok(stream)
    }
}

impl UploadTransport for FtpTransport {
    fn ensure_dir(&self, path: &str) -> Result<(), UploadError> {
        let mut stream = self.connect()?;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if stream.cwd(&current).is_err() {
                // mkdir may lose a creation race; only a failing re-cwd is real
                let _ = stream.mkdir(&current);
                stream.cwd(&current)?;
            }
        }
        let _ = stream.quit();
        Ok(())
    }

    fn store_file(&self, dir: &str, name: &str, bytes: &[u8]) -> Result<(), UploadError> {
        let mut stream = self.connect()?;
        if !dir.is_empty() && dir != "/" {
            stream.cwd(dir)?;
        }
        stream.put_file(name, &mut Cursor::new(bytes))?;
        let _ = stream.quit();
        Ok(())
    }
}

/// Retrying uploader over any transport.
pub struct Uploader<T: UploadTransport> {
    transport: T,
    policy: RetryPolicy,
    remote_dir: String,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(transport: T, config: &UploadConfig) -> Self {
        Self {
            transport,
            policy: RetryPolicy::new(
                config.max_retries,
                config.base_delay_ms,
                config.max_delay_ms,
            ),
            remote_dir: config.remote_dir.clone(),
        }
    }

    /// Push one artifact to `<remote_dir>/<name>`, creating missing
    /// directories and retrying transient failures.
    pub fn upload(
        &self,
        artifact: &Artifact,
        id: &str,
        name: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let remote_path = if self.remote_dir.ends_with('/') {
            format!("{}{}", self.remote_dir, name)
        } else {
            format!("{}/{}", self.remote_dir, name)
        };

        let (_, retries) = self.policy.run(&remote_path, UploadError::is_retryable, || {
            self.transport.ensure_dir(&self.remote_dir)?;
            self.transport.store_file(&self.remote_dir, name, &artifact.bytes)
        })?;

        debug!(id, remote_path = %remote_path, retries, "uploaded artifact");
        Ok(UploadOutcome {
            source_id: id.to_string(),
            remote_path,
            retries,
        })
    }
}
