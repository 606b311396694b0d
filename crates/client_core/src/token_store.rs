//! On-disk session persistence: one JSON file under the per-user data dir,
//! so a restart resumes the signed-in session without a fresh login.

use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("no usable data directory for session storage")]
    NoDataDir,
    #[error("session file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("session file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Store under the platform's per-user app data dir.
    pub fn for_app() -> Result<Self, TokenStoreError> {
        let base = dirs::data_local_dir().ok_or(TokenStoreError::NoDataDir)?;
        Ok(Self::at_path(base.join("bleepo").join("session.json")))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Option<String>, TokenStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let session: StoredSession = serde_json::from_str(&raw)?;
        Ok(Some(session.access_token))
    }

    pub fn save(&self, access_token: &str) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let session = StoredSession {
            access_token: access_token.to_string(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), TokenStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
