//! CacheStorage: the set of named stores under one data directory

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::CacheStore;

/// File extension of store files
pub const STORE_EXTENSION: &str = "offc";

/// Registry of named stores
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    /// Use `root` as the data directory, creating it if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open the named store, creating it if absent
    pub fn open(&self, name: &str) -> Result<CacheStore> {
        validate_name(name)?;
        CacheStore::open(self.store_path(name), name)
    }

    /// Whether a store with this name exists on disk
    pub fn has(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.store_path(name).is_file()
    }

    /// Delete the named store. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;

        let path = self.store_path(name);
        if !path.is_file() {
            return Ok(false);
        }

        fs::remove_file(path)?;
        Ok(true)
    }

    /// Names of all stores, sorted
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || !path.extension().is_some_and(|ext| ext == STORE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, STORE_EXTENSION))
    }
}

/// Check that a store name is usable as a file stem
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{RequestKey, Response};
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_store() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();

        assert!(!storage.has("asbjj-v1"));
        let store = storage.open("asbjj-v1").unwrap();
        assert_eq!(store.name(), "asbjj-v1");
        assert!(storage.has("asbjj-v1"));
    }

    #[test]
    fn test_keys_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();

        storage.open("site-v2").unwrap();
        storage.open("site-v1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(storage.keys().unwrap(), vec!["site-v1", "site-v2"]);

        assert!(storage.delete("site-v1").unwrap());
        assert!(!storage.delete("site-v1").unwrap());
        assert_eq!(storage.keys().unwrap(), vec!["site-v2"]);
    }

    #[test]
    fn test_reopen_by_name_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();
        let key = RequestKey::get("http://localhost:8000/");

        {
            let store = storage.open("site-v1").unwrap();
            store.put_all(vec![(key.clone(), Response::new(200, "home"))]).unwrap();
        }

        let store = storage.open("site-v1").unwrap();
        assert_eq!(store.match_request(&key).unwrap().unwrap().body, b"home");

        // A different name is a different, empty store.
        assert!(storage.open("site-v2").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "..", "a/b", "with space", "../escape"] {
            assert!(matches!(validate_name(name), Err(Error::InvalidName(_))), "{name:?}");
        }
        validate_name("asbjj-v1").unwrap();
        validate_name("static_1.0").unwrap();

        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();
        assert!(storage.open("a/b").is_err());
        assert!(!storage.has("a/b"));
    }
}
