//! Atomic persistence of the replay cursor.
//!
//! The state file records the first byte of the spool not yet successfully
//! delivered, plus delivery counters and the last error. It is written with
//! a temp-file-plus-rename sequence (both fsynced) so a crash leaves either
//! the previous version or the new one, never a torn write. A missing or
//! malformed file loads as zeroes: replay restarts from the beginning of the
//! active spool, which is safe under the at-least-once contract.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::now_iso;

/// Errors that can occur while persisting replay state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted replay cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    /// First byte of the spool not yet successfully sent.
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub failed: u64,
}

/// Loads and saves `ReplayState` at a fixed path.
#[derive(Debug, Clone)]
pub struct ReplayStateStore {
    path: PathBuf,
}

impl ReplayStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ReplayStateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted state, or zeroes when the file is missing or
    /// unreadable.
    pub fn load(&self) -> ReplayState {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return ReplayState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read replay state");
                return ReplayState::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed replay state, starting from zero");
                ReplayState::default()
            }
        }
    }

    /// Stamps `updated_at` and writes the state atomically:
    /// write `<path>.tmp`, fsync, rename over `<path>`, fsync the directory.
    pub fn save(&self, state: &mut ReplayState) -> Result<(), StateError> {
        state.updated_at = Some(now_iso());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        // A crash after the rename could still revert the cursor if the
        // directory entry itself was never synced.
        if let Some(parent) = self.path.parent() {
            std::fs::File::open(parent)?.sync_all()?;
        }

        Ok(())
    }
}
