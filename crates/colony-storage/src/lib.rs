//! Durable record of the cross-round learning state.
//!
//! The record is a small JSON document holding one role-weight vector per team
//! and the cumulative round counter. Anything unusable on disk degrades to the
//! default state; write failures are reported to the caller and never abort a
//! running simulation.

use colony_core::{LearnerConfig, MetaState, RoundPersistence, RoundRecord};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Default file name used by the runner.
pub const DEFAULT_META_FILE: &str = "meta.json";

/// Errors returned by the meta store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("meta file i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("meta file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("meta file rejected: {0}")]
    Invalid(&'static str),
}

/// JSON file holding the persistent [`MetaState`].
#[derive(Debug, Clone)]
pub struct MetaStore {
    path: PathBuf,
}

impl MetaStore {
    /// Store backed by `path`; nothing is touched until the first load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the stored state without any fallback.
    pub fn try_load(&self, team_count: usize) -> Result<MetaState, StorageError> {
        let raw = fs::read_to_string(&self.path)?;
        let meta: MetaState = serde_json::from_str(&raw)?;
        if meta.role_weights.len() != team_count {
            return Err(StorageError::Invalid("team count does not match"));
        }
        if !meta.is_valid_for(team_count) {
            return Err(StorageError::Invalid(
                "weights must be finite and non-negative",
            ));
        }
        Ok(meta)
    }

    /// Load the stored state, falling back to defaults on any problem.
    #[must_use]
    pub fn load(&self, team_count: usize, config: &LearnerConfig) -> MetaState {
        match self.try_load(team_count) {
            Ok(meta) => {
                debug!(path = %self.path.display(), rounds = meta.rounds, "meta state loaded");
                meta
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "using default meta state");
                MetaState::default_for(team_count, config)
            }
        }
    }

    /// Overwrite the stored state via a temporary sibling and a rename.
    pub fn save(&self, meta: &MetaState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(meta)?;
        let tmp = self.temp_path();
        fs::write(&tmp, payload)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| DEFAULT_META_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RoundPersistence for MetaStore {
    fn on_round_end(&mut self, record: &RoundRecord, meta: &MetaState) {
        if let Err(err) = self.save(meta) {
            warn!(
                round = record.round,
                path = %self.path.display(),
                %err,
                "failed to save meta state"
            );
        }
    }
}
