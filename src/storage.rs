//! Opaque string key-value store used to persist token fields between runs.

use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

pub trait TokenStore {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// JSON-file-backed store. The file is rewritten on every mutation; write
/// failures are logged rather than surfaced, a lost store only costs an extra
/// login on the next run.
pub struct FileTokenStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| format!("token store {} is not valid JSON: {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(format!("unable to read token store {}: {}", path.display(), e)),
        };
        Ok(FileTokenStore { path, entries })
    }

    fn persist(&self) {
        let json = match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("Unable to serialize token store: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            warn!("Unable to write token store {}: {}", self.path.display(), e);
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist();
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.persist();
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: BTreeMap<String, String>,
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}
