//! Persistent storage for the session token pair.
//!
//! Values are JSON files in a per-user config directory:
//!   - Linux: `~/.config/fva/`
//!   - macOS: `~/Library/Application Support/fva/`
//!   - Windows: `%APPDATA%\fva\`

use std::path::PathBuf;

use fva_shared::{ApiError, TokenPair};
use serde::{de::DeserializeOwned, Serialize};

const SESSION_KEY: &str = "fva_session";

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at an explicit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the platform config directory, if one exists.
    pub fn default_location() -> Option<Self> {
        Some(Self::at(dirs::config_dir()?.join("fva")))
    }

    pub fn save_tokens(&self, tokens: &TokenPair) -> Result<(), ApiError> {
        self.save(SESSION_KEY, tokens)
    }

    /// Saved tokens; unreadable or corrupt files count as absent.
    pub fn load_tokens(&self) -> Option<TokenPair> {
        self.load(SESSION_KEY)
    }

    pub fn clear_tokens(&self) {
        self.remove(SESSION_KEY);
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ApiError> {
        let json = serde_json::to_string(value).map_err(|e| ApiError::Storage(e.to_string()))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| ApiError::Storage(e.to_string()))?;
        std::fs::write(self.file_path(key), json).map_err(|e| ApiError::Storage(e.to_string()))
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = std::fs::read_to_string(self.file_path(key)).ok()?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                crate::log_warn!("Discarding corrupt stored value {}: {}", key, e);
                None
            }
        }
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }
}
