//! Persistent per-script key/value storage.
//!
//! Entries are namespaced by script name, so two scripts can use the same key
//! without collision. Data deliberately survives `unload_script` and
//! `load_script`; only an explicit [`DataStore::clear`] removes a script's
//! entries. File-backed stores rewrite a single JSON document atomically on
//! every mutation, so state also survives host restarts.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{Result, StagehandError};

type Entries = HashMap<String, BTreeMap<String, JsonValue>>;

/// Namespaced key/value store for script data.
#[derive(Debug)]
pub struct DataStore {
    path: Option<PathBuf>,
    entries: Mutex<Entries>,
}

impl DataStore {
    /// Create a store with no backing file. Used by tests and embedded hosts
    /// that do their own persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Open a file-backed store, loading existing entries if the file exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| StagehandError::Store(format!("corrupt data file: {e}")))?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
            HashMap::new()
        };

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Store a value under `(script, key)`, replacing any previous value.
    pub fn store(&self, script: &str, key: &str, value: JsonValue) -> Result<()> {
        let mut entries = self.lock();
        entries
            .entry(script.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&entries)
    }

    /// Retrieve the value stored under `(script, key)`.
    pub fn retrieve(&self, script: &str, key: &str) -> Option<JsonValue> {
        self.lock().get(script).and_then(|m| m.get(key)).cloned()
    }

    /// Whether `(script, key)` has a stored value.
    pub fn exists(&self, script: &str, key: &str) -> bool {
        self.lock()
            .get(script)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    /// Remove `(script, key)`, returning the previous value if any.
    pub fn remove(&self, script: &str, key: &str) -> Result<Option<JsonValue>> {
        let mut entries = self.lock();
        let previous = match entries.get_mut(script) {
            Some(map) => {
                let previous = map.remove(key);
                if map.is_empty() {
                    entries.remove(script);
                }
                previous
            }
            None => None,
        };

        if previous.is_some() {
            self.persist(&entries)?;
        }
        Ok(previous)
    }

    /// All keys stored for a script, sorted.
    pub fn keys(&self, script: &str) -> Vec<String> {
        self.lock()
            .get(script)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every entry for a script. Returns the number removed.
    pub fn clear(&self, script: &str) -> Result<usize> {
        let mut entries = self.lock();
        let removed = entries.remove(script).map(|m| m.len()).unwrap_or(0);

        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    /// Names of all scripts with stored data.
    pub fn script_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // Recover from a poisoned mutex; entry maps are always left consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rewrite the backing file, if any, via a temp file and rename.
    fn persist(&self, entries: &Entries) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StagehandError::Store(format!("serialize failed: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, path)) {
            warn!(path = %path.display(), "failed to persist script data: {e}");
            return Err(StagehandError::Io(e));
        }
        Ok(())
    }
}
