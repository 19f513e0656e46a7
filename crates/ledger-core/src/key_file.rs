//! File-backed wrapping key slot for hosts without a usable credential store.
//!
//! - Unix: raw key file with owner-only permissions (0600)
//! - Elsewhere: plain file in the private data directory

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::key_broker::{DeviceKeyBroker, SecretSlot};

pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    /// Key file `<keys_dir>/<alias>.key`.
    pub fn new(keys_dir: &Path, alias: &str) -> Self {
        Self {
            path: keys_dir.join(format!("{alias}.key")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn set_restricted_permissions(path: &Path) -> Result<(), KeyError> {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600); // rw-------
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_restricted_permissions(_path: &Path) -> Result<(), KeyError> {
        Ok(())
    }
}

impl SecretSlot for FileSlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyError::Unavailable(format!(
                "read key file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, secret: &[u8]) -> Result<(), KeyError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| KeyError::Unavailable("key file has no parent directory".into()))?;
        fs::create_dir_all(dir)
            .map_err(|e| KeyError::Unavailable(format!("create key dir: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        Self::set_restricted_permissions(tmp.path())?;
        tmp.write_all(secret)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| KeyError::Unavailable(format!("write key file: {e}")))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), KeyError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub type FileKeyBroker = DeviceKeyBroker<FileSlot>;

impl FileKeyBroker {
    pub fn new(keys_dir: &Path, alias: &str) -> Self {
        Self::with_slot(alias, FileSlot::new(keys_dir, alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_broker::{KeyBroker, KEY_ALIAS};
    use tempfile::TempDir;

    #[test]
    fn key_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");

        let first = FileKeyBroker::new(&keys, KEY_ALIAS);
        first.generate_key().unwrap();
        let wrapped = first.encrypt(b"passphrase").unwrap();

        let second = FileKeyBroker::new(&keys, KEY_ALIAS);
        assert!(second.key_exists().unwrap());
        assert_eq!(second.decrypt(&wrapped).unwrap().as_slice(), b"passphrase");
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let broker = FileKeyBroker::new(temp_dir.path(), KEY_ALIAS);
        broker.generate_key().unwrap();
        let path = temp_dir.path().join(format!("{KEY_ALIAS}.key"));
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn deleted_key_file_reads_as_absent() {
        let temp_dir = TempDir::new().unwrap();
        let broker = FileKeyBroker::new(temp_dir.path(), KEY_ALIAS);
        broker.generate_key().unwrap();
        broker.delete_key().unwrap();
        assert!(!broker.key_exists().unwrap());
        broker.delete_key().unwrap();
    }
}
