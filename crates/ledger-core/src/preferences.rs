//! Plain key-value preferences file.
//!
//! Holds small non-secret values (and the wrapped passphrase, which is safe
//! to store in the clear) as a flat JSON object of strings.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub struct ConfigStore {
    path: PathBuf,
    // Serializes read-modify-write cycles from this process.
    lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<(), ConfigError> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let data = serde_json::to_vec_pretty(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.flush()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("preferences.json"));
        assert_eq!(store.get("db.passphrase").unwrap(), None);
        store.remove("db.passphrase").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn set_get_remove_persist_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");
        ConfigStore::new(&path).set("a", "1").unwrap();
        ConfigStore::new(&path).set("b", "2").unwrap();

        let store = ConfigStore::new(&path);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        assert_eq!(ConfigStore::new(&path).get("a").unwrap(), None);
        assert_eq!(ConfigStore::new(&path).get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            ConfigStore::new(&path).get("a"),
            Err(ConfigError::Parse(_))
        ));
    }
}
