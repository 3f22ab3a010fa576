//! Single-record session store
//!
//! Holds at most one [`SessionRecord`] as a JSON file. Saving a new pairing
//! overwrites the previous one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SessionRecord;
use crate::error::Result;

/// File backed store for the current session record
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store at an explicit path
    pub fn open(path: impl Into<PathBuf>) -> Self {
        SessionStore { path: path.into() }
    }

    /// `~/.wc-interactor/session.json`, falling back to the working directory
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wc-interactor")
            .join("session.json")
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record, if any
    pub fn load(&self) -> Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist `record`, replacing whatever was stored
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(record)?;
        // replaced atomically: readers see the old record or the new one
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), topic = %record.descriptor.topic, "session saved");
        Ok(())
    }

    /// Remove the stored record
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
