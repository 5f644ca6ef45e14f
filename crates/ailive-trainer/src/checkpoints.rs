use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const CHECKPOINT_SUFFIX: &str = ".zip";
pub const QUEUE_FILE: &str = "upload-queue.json";

pub fn checkpoint_path(models_dir: &Path, step: u64) -> PathBuf {
    models_dir.join(format!("{step}{CHECKPOINT_SUFFIX}"))
}

/// Highest step count present in `models_dir`, or 0 when no checkpoint
/// exists. A missing directory reads as empty.
pub fn latest_step(models_dir: &Path) -> Result<u64> {
    Ok(latest_checkpoint(models_dir)?
        .map(|(step, _)| step)
        .unwrap_or(0))
}

/// Step count and path of the newest checkpoint. Files whose stem does not
/// parse as a step count are skipped with a warning; a stray file must not
/// wedge resume, and silence would hide a corrupted store.
pub fn latest_checkpoint(models_dir: &Path) -> Result<Option<(u64, PathBuf)>> {
    let entries = match fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::msg(format!(
                "failed to list {}: {e}",
                models_dir.display()
            )));
        }
    };

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::msg(format!("failed to list {}: {e}", models_dir.display()))
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(CHECKPOINT_SUFFIX) else {
            continue;
        };
        let Ok(step) = stem.parse::<u64>() else {
            warn!(
                file = name,
                dir = %models_dir.display(),
                "skipping checkpoint with non-numeric name"
            );
            continue;
        };
        if best.as_ref().map(|(b, _)| step > *b).unwrap_or(true) {
            best = Some((step, entry.path()));
        }
    }
    Ok(best)
}

pub fn file_digest(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    let bytes = fs::read(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQueueDoc {
    pub version: u32,
    pub entries: Vec<UploadQueueEntry>,
}

impl Default for UploadQueueDoc {
    fn default() -> Self {
        Self {
            version: 1,
            entries: Vec::new(),
        }
    }
}

/// One checkpoint whose upload has not yet succeeded. `file` is the name
/// under the models directory; the digest pins the exact bytes that failed
/// so a retry can notice the file changed underneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQueueEntry {
    pub step: u64,
    pub file: String,
    pub digest: String,
    pub state: UploadState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// A queue file that does not exist yet reads as empty.
pub fn load_queue(path: &Path) -> Result<UploadQueueDoc> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<UploadQueueDoc>(&raw)
            .map_err(|e| Error::msg(format!("upload queue {} is corrupt: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UploadQueueDoc::default()),
        Err(e) => Err(Error::msg(format!(
            "cannot read upload queue {}: {e}",
            path.display()
        ))),
    }
}

pub fn save_queue(path: &Path, q: &UploadQueueDoc) -> Result<()> {
    let body = serde_json::to_string_pretty(q)
        .map_err(|e| Error::msg(format!("cannot encode upload queue: {e}")))?;
    replace_queue_file(path, &body)
}

/// Record a failed upload, merging by step so repeated failures for the
/// same checkpoint bump the attempt count instead of piling up entries.
pub fn record_failure(
    queue_path: &Path,
    step: u64,
    file: &str,
    digest: &str,
    err: &str,
) -> Result<()> {
    let mut q = load_queue(queue_path)?;
    let now = chrono::Utc::now().to_rfc3339();

    if let Some(existing) = q.entries.iter_mut().find(|e| e.step == step) {
        existing.file = file.to_string();
        existing.digest = digest.to_string();
        existing.state = UploadState::Failed;
        existing.last_error = Some(err.to_string());
        existing.attempts = existing.attempts.saturating_add(1);
        existing.updated_at = now;
        return save_queue(queue_path, &q);
    }

    q.entries.push(UploadQueueEntry {
        step,
        file: file.to_string(),
        digest: digest.to_string(),
        state: UploadState::Failed,
        attempts: 1,
        last_error: Some(err.to_string()),
        updated_at: now,
    });
    save_queue(queue_path, &q)
}

// The queue is rewritten whole on every update. Stage the new document in
// the same directory and rename it over the old one, so a reader never sees
// a half-written file and a crash leaves the previous queue intact.
fn replace_queue_file(path: &Path, body: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| Error::msg(format!("cannot create {}: {e}", dir.display())))?;

    let mut staged = tempfile::Builder::new()
        .prefix(".upload-queue.")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| Error::msg(format!("cannot stage queue update in {}: {e}", dir.display())))?;
    staged
        .write_all(body.as_bytes())
        .map_err(|e| Error::msg(format!("cannot write staged queue update: {e}")))?;
    staged
        .persist(path)
        .map_err(|e| Error::msg(format!("cannot replace queue {}: {e}", path.display())))?;
    Ok(())
}
