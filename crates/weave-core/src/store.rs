// SPDX-License-Identifier: Apache-2.0
//! Storage port for flow definitions.
//!
//! The runtime persists nothing itself; it talks to a [`FlowStore`]. A
//! missing definition is `Ok(None)`, and backends are expected to degrade
//! the same way on corrupt state: the caller treats every load failure as
//! "no persisted state", never as fatal.
//!
//! [`MemoryStore`] is the in-crate test double; [`DirStore`] keeps one
//! pretty-printed JSON file per definition under a root directory.

use std::fs;
use std::io;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use crate::snapshot::SnapshotMap;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization of a snapshot failed.
    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error("store i/o: {0}")]
    Io(#[from] io::Error),
    /// The definition name cannot be used as a file name.
    #[error("`{name}` is not a valid definition name")]
    BadName {
        /// Offending name.
        name: String,
    },
    /// Backend-specific failure.
    #[error("store backend: {message}")]
    Backend {
        /// Backend description of the failure.
        message: String,
    },
}

/// Port to wherever flow definitions live.
pub trait FlowStore {
    /// Loads a definition by name. Missing definitions are `Ok(None)`.
    fn load(&self, name: &str) -> Result<Option<SnapshotMap>, StoreError>;

    /// Saves a definition under `name`, replacing any previous content.
    fn save(&mut self, name: &str, snapshot: &SnapshotMap) -> Result<(), StoreError>;

    /// Deletes a definition. Deleting a missing definition is not an error.
    fn delete(&mut self, name: &str) -> Result<(), StoreError>;

    /// Names of stored definitions, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory [`FlowStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: FxHashMap<String, SnapshotMap>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<SnapshotMap>, StoreError> {
        Ok(self.entries.get(name).cloned())
    }

    fn save(&mut self, name: &str, snapshot: &SnapshotMap) -> Result<(), StoreError> {
        self.entries.insert(name.to_owned(), snapshot.clone());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), StoreError> {
        self.entries.remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}

/// Directory-backed [`FlowStore`]: one `<name>.json` file per definition.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        // Names are file stems, never paths.
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::BadName {
                name: name.to_owned(),
            });
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl FlowStore for DirStore {
    fn load(&self, name: &str) -> Result<Option<SnapshotMap>, StoreError> {
        let path = self.path_for(name)?;
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<SnapshotMap>(&text) {
            Ok(map) => Ok(Some(map)),
            Err(e) => {
                warn!(name, error = %e, "corrupt definition file treated as missing");
                Ok(None)
            }
        }
    }

    fn save(&mut self, name: &str, snapshot: &SnapshotMap) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let text = serde_json::to_string_pretty(snapshot)?;
        fs::write(path, text)?;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_definition_loads_as_none() {
        let store = MemoryStore::new();
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[test]
    fn save_load_delete_cycle() {
        let mut store = MemoryStore::new();
        let mut map = SnapshotMap::new();
        map.insert("#type".into(), serde_json::json!("add"));
        store.save("adder", &map).unwrap();
        assert_eq!(store.load("adder").unwrap(), Some(map));
        assert_eq!(store.list().unwrap(), vec!["adder".to_owned()]);
        store.delete("adder").unwrap();
        assert!(store.load("adder").unwrap().is_none());
        store.delete("adder").unwrap();
    }

    #[test]
    fn dir_store_round_trips_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();
        let mut map = SnapshotMap::new();
        map.insert("x".into(), serde_json::json!(5));
        store.save("counter", &map).unwrap();
        assert_eq!(store.load("counter").unwrap(), Some(map));
        assert_eq!(store.list().unwrap(), vec!["counter".to_owned()]);
        store.delete("counter").unwrap();
        assert!(store.load("counter").unwrap().is_none());
    }

    #[test]
    fn dir_store_degrades_on_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(store.load("bad").unwrap().is_none());
    }

    #[test]
    fn dir_store_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load("../escape"),
            Err(StoreError::BadName { .. })
        ));
    }
}
