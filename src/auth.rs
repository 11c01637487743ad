use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_ENV_VAR: &str = "BEEPER_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SecretsFile {
    token: Option<String>,
    endpoint_key: Option<String>,
    updated_at: Option<i64>,
}

/// Bearer token for the desktop API. An environment token wins over the file; a file
/// written for a different endpoint configuration is ignored.
pub struct AuthStore {
    path: PathBuf,
    endpoint_key: String,
    env_token: Option<String>,
}

impl AuthStore {
    pub fn new(path: PathBuf, endpoint_key: String) -> Self {
        Self {
            path,
            endpoint_key,
            env_token: None,
        }
    }

    pub fn with_env_token(mut self, token: Option<String>) -> Self {
        self.env_token = token;
        self
    }

    pub fn load_token(&self) -> Result<Option<String>, AuthError> {
        if let Some(token) = self.env_token.as_deref().map(str::trim) {
            if !token.is_empty() {
                return Ok(Some(token.to_string()));
            }
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err)),
        };

        let secrets: SecretsFile = serde_json::from_str(&contents)?;
        if let Some(endpoint_key) = secrets.endpoint_key.as_deref() {
            if endpoint_key != self.endpoint_key {
                return Ok(None);
            }
        }
        Ok(secrets.token.filter(|token| !token.trim().is_empty()))
    }

    pub fn store_token(&self, token: &str) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }

        let secrets = SecretsFile {
            token: Some(token.trim().to_string()),
            endpoint_key: Some(self.endpoint_key.clone()),
            updated_at: Some(chrono::Utc::now().timestamp()),
        };
        let payload = serde_json::to_string_pretty(&secrets)?;
        fs::write(&self.path, payload)?;
        set_permissions(&self.path, 0o600)?;
        Ok(())
    }

    pub fn clear_token(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err)),
        }
    }
}

pub(crate) fn ensure_private_dir(path: &Path) -> Result<(), io::Error> {
    fs::create_dir_all(path)?;
    set_permissions(path, 0o700)
}

#[cfg(unix)]
pub(crate) fn set_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}
