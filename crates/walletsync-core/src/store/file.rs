use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::warn;

use super::KeyValueStore;

/// State file name in the cache directory
pub const STATE_FILE: &str = "state.json";

/// JSON-file backed store.
///
/// Every operation re-reads the file so separate processes pointed at the
/// same path observe each other's writes. Writes go to a temp file in the
/// same directory and are renamed into place, so a reader sees either the old
/// map or the new one. Two processes writing at once can still lose an
/// update; the sign lock TTL absorbs that.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_guard: Mutex::new(()),
        }
    }

    /// Store rooted in a state directory, using the default file name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read state file")?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse state file")
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let contents = serde_json::to_string_pretty(entries)?;

        let mut tmp = NamedTempFile::new_in(parent).context("Failed to create temp state file")?;
        tmp.write_all(contents.as_bytes())
            .context("Failed to write state file")?;
        tmp.persist(&self.path)
            .context("Failed to move state file into place")?;
        Ok(())
    }

    fn update<F>(&self, key: &str, apply: F)
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                // Writing now would erase every other key in the file.
                warn!(error = %e, key = key, path = ?self.path, "State file unreadable, skipping write");
                return;
            }
        };
        apply(&mut entries);
        if let Err(e) = self.save(&entries) {
            warn!(error = %e, key = key, "Failed to persist state");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(e) => {
                warn!(error = %e, key = key, "Failed to read state");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        self.update(key, |entries| {
            entries.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.update(key, |entries| {
            entries.remove(key);
        });
    }
}
