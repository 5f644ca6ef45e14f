use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::credential::ApiKey;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "ailive.toml";

fn default_true() -> bool {
    true
}

fn default_root_dir() -> String {
    "sessions".into()
}

fn default_api_key_env() -> Option<String> {
    Some("AILIVE_API_KEY".into())
}

fn default_env_id() -> String {
    "Humanoid-v5".into()
}

fn default_total_timesteps() -> u64 {
    10_000_000
}

fn default_save_interval() -> u64 {
    500_000
}

fn default_worker_command() -> String {
    "python3".into()
}

fn default_worker_args() -> Vec<String> {
    vec!["-u".into(), "worker.py".into()]
}

fn default_base_url() -> String {
    "https://api.ailive.co".into()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub credential: CredentialConfig,
    pub session: SessionConfig,
    pub training: TrainingConfig,
    pub worker: WorkerConfig,
    pub upload: UploadConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            credential: CredentialConfig::default(),
            session: SessionConfig::default(),
            training: TrainingConfig::default(),
            worker: WorkerConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.training.save_interval == 0 {
            return Err(Error::msg("training.save_interval must be greater than zero"));
        }
        if self.training.total_timesteps == 0 {
            return Err(Error::msg(
                "training.total_timesteps must be greater than zero",
            ));
        }
        if self.upload.enabled {
            if self.upload.base_url.trim().is_empty() {
                return Err(Error::msg("upload.base_url is empty"));
            }
            if self.upload.timeout_secs == 0 {
                return Err(Error::msg("upload.timeout_secs must be greater than zero"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Literal key in the config file. Prefer `api_key_env`; a secret in a
    /// checked-in file outlives every rotation.
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl CredentialConfig {
    /// Literal wins, then the named environment variable. Blank values
    /// count as absent.
    pub fn resolve(&self) -> Result<ApiKey> {
        let raw = literal_or_env(self.api_key.as_deref(), self.api_key_env.as_deref())
            .ok_or_else(|| match non_blank(self.api_key_env.as_deref()) {
                Some(k) => Error::msg(format!(
                    "credential.api_key is empty (also checked env var '{k}')"
                )),
                None => Error::msg("credential.api_key is empty"),
            })?;
        ApiKey::parse(&raw)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub root_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub env_id: String,
    pub total_timesteps: u64,
    pub save_interval: u64,
    pub render: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            env_id: default_env_id(),
            total_timesteps: default_total_timesteps(),
            save_interval: default_save_interval(),
            render: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: default_worker_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub queue_file: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            queue_file: None,
        }
    }
}

pub fn load(path: &Path) -> Result<TrainerConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let cfg: TrainerConfig = toml::from_str(&raw)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// A missing file at the default path falls back to built-in defaults; an
/// explicitly named file goes through [`load`] and must parse.
pub fn load_default() -> Result<TrainerConfig> {
    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.is_file() {
        return load(path);
    }
    let cfg = TrainerConfig::default();
    cfg.validate()?;
    Ok(cfg)
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// Config fields that may hold a secret come in pairs: the value itself and
// the name of an environment variable to read instead. The literal takes
// precedence so a scratch config can still pin a throwaway key.
fn literal_or_env(literal: Option<&str>, env_key: Option<&str>) -> Option<String> {
    if let Some(v) = non_blank(literal) {
        return Some(v.to_string());
    }
    let key = non_blank(env_key)?;
    let value = std::env::var(key).ok()?;
    non_blank(Some(&value)).map(ToOwned::to_owned)
}
