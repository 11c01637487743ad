use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{ensure_private_dir, set_permissions};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    pub default_account_id: Option<String>,
    pub endpoint_key: Option<String>,
    pub updated_at: Option<i64>,
}

/// CLI preferences kept between runs.
#[derive(Clone)]
pub struct LocalDb {
    path: PathBuf,
    endpoint_key: String,
}

impl LocalDb {
    pub fn new(path: PathBuf, endpoint_key: String) -> Self {
        Self { path, endpoint_key }
    }

    pub fn load(&self) -> Result<LocalState, StateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LocalState::default()),
            Err(err) => return Err(StateError::Io(err)),
        };
        let state: LocalState = serde_json::from_str(&contents)?;
        if let Some(endpoint_key) = state.endpoint_key.as_deref() {
            if endpoint_key != self.endpoint_key {
                return Ok(LocalState::default());
            }
        }
        Ok(state)
    }

    pub fn save(&self, state: &LocalState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }
        let payload = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, payload)?;
        set_permissions(&self.path, 0o600)?;
        Ok(())
    }

    pub fn set_default_account(&self, account_id: Option<String>) -> Result<(), StateError> {
        let mut state = self.load()?;
        state.default_account_id = account_id;
        state.endpoint_key = Some(self.endpoint_key.clone());
        state.updated_at = Some(chrono::Utc::now().timestamp());
        self.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_account_is_remembered_per_endpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let db = LocalDb::new(path.clone(), "direct".to_string());

        assert_eq!(db.load().expect("load"), LocalState::default());
        db.set_default_account(Some("whatsapp".to_string())).expect("save");
        assert_eq!(
            db.load().expect("load").default_account_id.as_deref(),
            Some("whatsapp")
        );

        let other = LocalDb::new(path, "proxy".to_string());
        assert_eq!(other.load().expect("load").default_account_id, None);

        db.set_default_account(None).expect("clear");
        assert_eq!(db.load().expect("load").default_account_id, None);
    }
}
