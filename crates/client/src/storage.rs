//! Persistent JSON storage.
//!
//! Values are kept as one JSON file per key in a directory, by default the
//! platform-appropriate config directory:
//!   - Linux: `~/.config/cookbook/`
//!   - macOS: `~/Library/Application Support/cookbook/`
//!   - Windows: `%APPDATA%\cookbook\`

use std::io;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage rooted at `<config dir>/cookbook`, if the platform has one.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("cookbook")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }

    /// Save a value under `key`, creating the directory if needed.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value).map_err(io::Error::other)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.file_path(key), json)
    }

    /// Load a value from storage.
    ///
    /// Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = std::fs::read_to_string(self.file_path(key)).ok()?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("ignoring unreadable stored value for {key}: {e}");
                None
            }
        }
    }

    /// Remove a value. Removing a key that was never saved succeeds.
    pub fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.file_path(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
