use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoints::{self, UploadState};
use crate::config::UploadConfig;
use crate::credential::ApiKey;
use crate::error::{Error, Result};

pub const SIGN_URL_PATH: &str = "/v1/upload/sign_url";

#[derive(Serialize)]
struct SignUrlRequest<'a> {
    api: &'a str,
}

#[derive(Deserialize)]
struct SignUrlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Two-step checkpoint upload: ask the API for a single-use pre-signed URL,
/// then PUT the file's bytes to it. The local file is left in place
/// whatever the outcome.
pub struct UploadClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl UploadClient {
    pub fn new(cfg: &UploadConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_signed_url(&self, key: &ApiKey) -> Result<String> {
        let url = format!("{}{SIGN_URL_PATH}", self.base_url);
        let res = self
            .client
            .post(url)
            .json(&SignUrlRequest { api: key.reveal() })
            .send()
            .map_err(|e| Error::msg(format!("sign-url request failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "sign-url request failed with status {}",
                res.status()
            )));
        }
        let body: SignUrlResponse = res
            .json()
            .map_err(|e| Error::msg(format!("sign-url response parse failed: {e}")))?;
        if !body.success {
            let msg = body.message.as_deref().unwrap_or("unknown error");
            return Err(Error::msg(format!("sign-url request refused: {msg}")));
        }
        body.url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::msg("sign-url response missing url"))
    }

    pub fn upload_checkpoint(&self, key: &ApiKey, path: &Path) -> Result<()> {
        let signed_url = self.request_signed_url(key)?;
        let body = fs::read(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        let res = self
            .client
            .put(signed_url)
            .body(body)
            .send()
            .map_err(|e| Error::msg(format!("checkpoint upload failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "checkpoint upload failed with status {}",
                res.status()
            )));
        }
        Ok(())
    }
}

/// Where finished checkpoints go. The driver treats a publish failure as
/// soft: it logs and moves on to the next interval.
pub trait CheckpointPublisher {
    fn publish(&mut self, step: u64, path: &Path) -> Result<()>;
}

/// Used when `upload.enabled = false`.
pub struct NullPublisher;

impl CheckpointPublisher for NullPublisher {
    fn publish(&mut self, _step: u64, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Publishes through [`UploadClient`] and records failures in the upload
/// queue so `ailive retry` can re-attempt them later.
pub struct RemotePublisher {
    client: UploadClient,
    key: ApiKey,
    queue_path: PathBuf,
}

impl RemotePublisher {
    pub fn new(client: UploadClient, key: ApiKey, queue_path: PathBuf) -> Self {
        Self {
            client,
            key,
            queue_path,
        }
    }
}

impl CheckpointPublisher for RemotePublisher {
    fn publish(&mut self, step: u64, path: &Path) -> Result<()> {
        match self.client.upload_checkpoint(&self.key, path) {
            Ok(()) => {
                info!(step, "checkpoint uploaded");
                Ok(())
            }
            Err(err) => {
                let file = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let digest = checkpoints::file_digest(path).unwrap_or_default();
                if let Err(qerr) = checkpoints::record_failure(
                    &self.queue_path,
                    step,
                    &file,
                    &digest,
                    &err.to_string(),
                ) {
                    warn!("failed to record upload failure: {qerr}");
                }
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Re-attempt queued uploads. An entry whose file no longer matches its
/// recorded digest is failed rather than re-sent; the remote would receive
/// bytes the queue never saw.
pub fn retry_pending(
    client: &UploadClient,
    key: &ApiKey,
    models_dir: &Path,
    queue_path: &Path,
    max: Option<usize>,
) -> Result<RetryReport> {
    let mut q = checkpoints::load_queue(queue_path)?;

    let mut attempted = 0usize;
    let mut uploaded = 0usize;
    let mut failed = 0usize;

    for e in &mut q.entries {
        if matches!(e.state, UploadState::Uploaded) {
            continue;
        }
        if let Some(m) = max
            && attempted >= m
        {
            break;
        }
        attempted = attempted.saturating_add(1);

        let path = models_dir.join(&e.file);
        let outcome = check_and_upload(client, key, &path, &e.digest);
        e.attempts = e.attempts.saturating_add(1);
        e.updated_at = chrono::Utc::now().to_rfc3339();
        match outcome {
            Ok(()) => {
                e.state = UploadState::Uploaded;
                e.last_error = None;
                uploaded = uploaded.saturating_add(1);
            }
            Err(err) => {
                e.state = UploadState::Failed;
                e.last_error = Some(err.to_string());
                failed = failed.saturating_add(1);
            }
        }
    }

    checkpoints::save_queue(queue_path, &q)?;
    Ok(RetryReport {
        attempted,
        uploaded,
        failed,
    })
}

fn check_and_upload(
    client: &UploadClient,
    key: &ApiKey,
    path: &Path,
    digest: &str,
) -> Result<()> {
    if !path.is_file() {
        return Err(Error::msg(format!(
            "checkpoint file missing: {}",
            path.display()
        )));
    }
    if !digest.is_empty() {
        let current = checkpoints::file_digest(path)?;
        if current != digest {
            return Err(Error::msg(format!(
                "checkpoint {} changed since the failed upload (digest mismatch)",
                path.display()
            )));
        }
    }
    client.upload_checkpoint(key, path)
}
