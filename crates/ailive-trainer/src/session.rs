use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::credential::ApiKey;
use crate::error::{Error, Result};

pub const TENSORBOARD_DIR: &str = "tensorboard";
pub const MODELS_DIR: &str = "models";

/// On-disk layout for one agent/skill pair:
/// `<root>/<agent>/<skill>/{tensorboard,models}`. The tensorboard directory
/// is written by the external trainer's metrics logger; the models
/// directory holds `<steps>.zip` checkpoints.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub tensorboard_dir: PathBuf,
    pub models_dir: PathBuf,
}

pub fn resolve(root_dir: &str, key: &ApiKey) -> Result<SessionPaths> {
    let root_dir = root_dir.trim();
    if root_dir.is_empty() {
        return Err(Error::msg("session.root_dir is empty"));
    }
    if Path::new(root_dir)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::msg(format!(
            "invalid session.root_dir '{root_dir}' (contains '..')"
        )));
    }

    let root = PathBuf::from(root_dir).join(key.agent()).join(key.skill());
    Ok(SessionPaths {
        tensorboard_dir: root.join(TENSORBOARD_DIR),
        models_dir: root.join(MODELS_DIR),
        root,
    })
}

/// Idempotent; both directories may already exist from a previous run.
pub fn init_dirs(root_dir: &str, key: &ApiKey) -> Result<SessionPaths> {
    let paths = resolve(root_dir, key)?;
    for dir in [&paths.tensorboard_dir, &paths.models_dir] {
        fs::create_dir_all(dir)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", dir.display())))?;
    }
    Ok(paths)
}
