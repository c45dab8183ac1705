//! Per-source sync cursors with JSON file persistence.
//!
//! A cursor is the opaque `_since` timestamp for the next delta sync of one
//! directory. Persistence failures never fail a sync; a lost state file only
//! costs a redundant (idempotent) full sync on the next run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Composite key identifying a directory's sync state: the base URL for
/// roots, `base|ura` for discovered directories.
pub fn directory_key(base_url: &str, authoritative_ura: &str) -> String {
    if authoritative_ura.is_empty() {
        base_url.to_string()
    } else {
        format!("{base_url}|{authoritative_ura}")
    }
}

pub struct CursorStore {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl CursorStore {
    /// Load cursors from the state file. An absent file is an empty store;
    /// an unreadable or corrupt file logs a warning and also starts empty.
    pub fn load(path: Option<PathBuf>) -> Self {
        let Some(file) = path.as_deref() else {
            return Self {
                path,
                entries: Mutex::new(HashMap::new()),
            };
        };

        let entries = match std::fs::read(file) {
            Ok(data) => match serde_json::from_slice::<HashMap<String, String>>(&data) {
                Ok(entries) => {
                    tracing::info!(
                        file = %file.display(),
                        directories = entries.len(),
                        "loaded sync state from file"
                    );
                    entries
                }
                Err(e) => {
                    tracing::warn!(
                        file = %file.display(),
                        error = %e,
                        "failed to parse sync state file, starting with full sync"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    file = %file.display(),
                    "no sync state file found, starting with full sync"
                );
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    file = %file.display(),
                    error = %e,
                    "failed to read sync state file, starting with full sync"
                );
                HashMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("cursor lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, timestamp: String) {
        self.entries
            .lock()
            .expect("cursor lock poisoned")
            .insert(key.to_string(), timestamp);
    }

    pub fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("cursor lock poisoned")
            .remove(key);
    }

    /// Persist the cursors. Failures are logged, never surfaced.
    pub fn save(&self) {
        let Some(file) = self.path.as_deref() else {
            return;
        };
        let entries = self.entries.lock().expect("cursor lock poisoned").clone();
        let data = match serde_json::to_vec_pretty(&entries) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize sync state");
                return;
            }
        };
        if let Err(e) = std::fs::write(file, data) {
            tracing::error!(
                file = %file.display(),
                error = %e,
                "failed to write sync state file"
            );
            return;
        }
        tracing::debug!(file = %file.display(), "saved sync state to file");
    }
}
