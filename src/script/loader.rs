//! Script discovery: scanning a directory tree and syncing it into the
//! registry.
//!
//! The registry itself never touches the file system; this loader is the
//! collaborator that walks the scripts directory, detects changed sources by
//! hash, and drives `load_script`/`reload_script_from`/`unload_script`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::registry::ScriptRegistry;
use crate::Result;

/// Result of syncing the scripts directory into a registry.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Names of newly loaded scripts.
    pub added: Vec<String>,
    /// Names of scripts reloaded because their source changed.
    pub updated: Vec<String>,
    /// Names of scripts unloaded because their file disappeared.
    pub removed: Vec<String>,
    /// Per-file failures: (path or name, message).
    pub errors: Vec<(String, String)>,
}

impl SyncResult {
    /// Check if any changes were made.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }

    /// Total number of changes.
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Hex SHA-256 of a script source, used for change detection.
pub fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loader for scanning Lua scripts from the file system.
pub struct ScriptLoader {
    /// Base directory for scripts.
    scripts_dir: PathBuf,
    /// Names this loader has loaded into the registry.
    tracked: HashSet<String>,
    /// Sources that failed to load, by name -> hash, so the same bad file is
    /// not retried (and re-reported) every sync.
    failed: HashMap<String, String>,
}

impl ScriptLoader {
    /// Create a new loader for the given scripts directory.
    pub fn new<P: AsRef<Path>>(scripts_dir: P) -> Self {
        Self {
            scripts_dir: scripts_dir.as_ref().to_path_buf(),
            tracked: HashSet::new(),
            failed: HashMap::new(),
        }
    }

    /// Get the scripts directory path.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Create the scripts directory if it doesn't exist.
    pub fn ensure_scripts_dir(&self) -> Result<()> {
        if !self.scripts_dir.exists() {
            fs::create_dir_all(&self.scripts_dir)?;
        }
        Ok(())
    }

    /// Sync the directory into the registry.
    ///
    /// New `.lua` files are loaded, changed files are reloaded, deleted files
    /// are unloaded. Scripts registered by other means are never touched.
    pub fn sync(&mut self, registry: &mut ScriptRegistry) -> SyncResult {
        let mut result = SyncResult::default();
        let mut seen: HashSet<String> = HashSet::new();

        let mut files = Vec::new();
        if self.scripts_dir.exists() {
            Self::scan_directory(&self.scripts_dir, &mut files, &mut result);
        }

        for path in files {
            self.process_file(&path, registry, &mut seen, &mut result);
        }

        // Unload tracked scripts whose file disappeared
        for name in self.tracked.clone() {
            if seen.contains(&name) {
                continue;
            }
            if registry.contains(&name) {
                match registry.unload_script(&name) {
                    Ok(()) => result.removed.push(name.clone()),
                    Err(e) => result.errors.push((name.clone(), e.to_string())),
                }
            }
            self.tracked.remove(&name);
            self.failed.remove(&name);
        }

        result
    }

    fn process_file(
        &mut self,
        path: &Path,
        registry: &mut ScriptRegistry,
        seen: &mut HashSet<String>,
        result: &mut SyncResult,
    ) {
        let name = Self::script_name(path);

        if !seen.insert(name.clone()) {
            result.errors.push((
                path.display().to_string(),
                format!("duplicate script name '{name}'"),
            ));
            return;
        }

        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                result
                    .errors
                    .push((path.display().to_string(), e.to_string()));
                return;
            }
        };
        let current_hash = hash_source(&source);

        if registry.contains(&name) {
            if !self.tracked.contains(&name) {
                debug!(script = %name, "name registered outside the loader; skipped");
                return;
            }

            let registry_hash = registry.source(&name).map(hash_source);
            if registry_hash.as_deref() == Some(current_hash.as_str()) {
                return; // unchanged
            }

            match registry.reload_script_from(&name, &source) {
                Ok(()) => {
                    result.updated.push(name.clone());
                    self.failed.remove(&name);
                }
                Err(e) => {
                    result
                        .errors
                        .push((path.display().to_string(), e.to_string()));
                    self.failed.insert(name, current_hash);
                }
            }
            return;
        }

        // Not registered: a new file, or a tracked file whose last load
        // failed. Skip if that exact source already failed.
        if self.failed.get(&name) == Some(&current_hash) {
            return;
        }

        match registry.load_script(&name, &source) {
            Ok(()) => {
                result.added.push(name.clone());
                self.tracked.insert(name.clone());
                self.failed.remove(&name);
            }
            Err(e) => {
                result
                    .errors
                    .push((path.display().to_string(), e.to_string()));
                self.tracked.insert(name.clone());
                self.failed.insert(name, current_hash);
            }
        }
    }

    /// Scan a directory recursively for .lua files.
    fn scan_directory(dir: &Path, files: &mut Vec<PathBuf>, result: &mut SyncResult) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                result
                    .errors
                    .push((dir.display().to_string(), e.to_string()));
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::scan_directory(&path, files, result);
            } else if path.extension().is_some_and(|ext| ext == "lua") {
                files.push(path);
            }
        }

        files.sort();
    }

    /// Derive a registry name from a file path: lowercased stem with
    /// non-alphanumeric characters replaced by underscores.
    fn script_name(path: &Path) -> String {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}
