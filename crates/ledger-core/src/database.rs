//! Opening the encrypted database file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::KdfParams;
use crate::error::OpenError;
use crate::passphrase::Passphrase;
use crate::store::{Account, SealedStore};

/// Live, shared session on the encrypted store.
pub type StorageHandle = Arc<SealedStore>;

/// The database file and every side file sharing its name prefix.
#[derive(Debug, Clone)]
pub struct DatabaseFiles {
    dir: PathBuf,
    name: String,
}

impl DatabaseFiles {
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// True if the main database file exists as a regular file.
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Remove every non-directory entry whose name starts with the database
    /// name. Idempotent; returns the number of files removed.
    pub fn destroy(&self) -> std::io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.file_name().to_string_lossy().starts_with(&self.name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        if removed > 0 {
            info!(name = %self.name, removed, "database files deleted");
        }
        Ok(removed)
    }
}

/// Opens, creates, or destructively recreates the encrypted store.
pub struct StorageOpener {
    files: DatabaseFiles,
    kdf: KdfParams,
}

impl StorageOpener {
    pub fn new(files: DatabaseFiles, kdf: KdfParams) -> Self {
        Self { files, kdf }
    }

    pub fn files(&self) -> &DatabaseFiles {
        &self.files
    }

    pub fn database_exists(&self) -> bool {
        self.files.exists()
    }

    /// Open the store with `passphrase`, creating it if absent. A file that
    /// cannot be read with this passphrase is discarded and recreated empty.
    /// Every store handed out holds at least the default account.
    pub fn open(&self, passphrase: &Passphrase) -> Result<StorageHandle, OpenError> {
        fs::create_dir_all(self.files.dir())?;
        let path = self.files.path();

        let store = if self.files.exists() {
            match SealedStore::open(&path, passphrase) {
                Ok(store) => store,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "database unreadable, recreating");
                    self.files.destroy()?;
                    SealedStore::create(&path, passphrase, self.kdf).map_err(OpenError::Recreate)?
                }
            }
        } else {
            // Stray side files from an earlier run belong to no database.
            self.files.destroy()?;
            info!(path = %path.display(), "creating database");
            SealedStore::create(&path, passphrase, self.kdf).map_err(OpenError::Create)?
        };

        if store.count_accounts() == 0 {
            store
                .insert_account(Account::default_account())
                .map_err(OpenError::Seed)?;
            info!("seeded default account");
        }
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_ACCOUNT_ID;
    use tempfile::tempdir;

    fn opener(dir: &Path) -> StorageOpener {
        StorageOpener::new(
            DatabaseFiles::new(dir.join("databases"), "encryptedDB"),
            KdfParams::insecure_fast(),
        )
    }

    fn passphrase(seed: u8) -> Passphrase {
        Passphrase::from_key_bytes(&[seed; 32])
    }

    #[test]
    fn new_store_has_exactly_the_default_account() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        assert!(!opener.database_exists());
        let handle = opener.open(&passphrase(1)).unwrap();
        assert!(opener.database_exists());
        let accounts = handle.accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, DEFAULT_ACCOUNT_ID);
    }

    #[test]
    fn reopen_does_not_seed_twice() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        let handle = opener.open(&passphrase(1)).unwrap();
        handle
            .insert_account(Account {
                id: 4,
                name: "Cash".into(),
            })
            .unwrap();
        drop(handle);
        let handle = opener.open(&passphrase(1)).unwrap();
        assert_eq!(handle.count_accounts(), 2);
    }

    #[test]
    fn wrong_passphrase_recreates_store() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        let handle = opener.open(&passphrase(1)).unwrap();
        handle
            .insert_account(Account {
                id: 4,
                name: "Cash".into(),
            })
            .unwrap();
        drop(handle);

        let handle = opener.open(&passphrase(2)).unwrap();
        assert_eq!(handle.count_accounts(), 1);
        drop(handle);
        // The recreated file now belongs to the new passphrase.
        assert!(SealedStore::open(opener.files().path(), &passphrase(2)).is_ok());
    }

    #[test]
    fn corrupt_file_is_recreated() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        fs::create_dir_all(opener.files().dir()).unwrap();
        fs::write(opener.files().path(), b"garbage").unwrap();
        let handle = opener.open(&passphrase(1)).unwrap();
        assert_eq!(handle.count_accounts(), 1);
    }

    #[test]
    fn damaged_kdf_header_is_recreated() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        drop(opener.open(&passphrase(1)).unwrap());
        let mut bytes = fs::read(opener.files().path()).unwrap();
        bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(opener.files().path(), bytes).unwrap();

        let handle = opener.open(&passphrase(1)).unwrap();
        assert_eq!(handle.count_accounts(), 1);
        assert_eq!(handle.header().kdf, KdfParams::insecure_fast());
    }

    #[test]
    fn destroy_removes_prefixed_files_only() {
        let dir = tempdir().unwrap();
        let files = DatabaseFiles::new(dir.path(), "encryptedDB");
        for name in ["encryptedDB", "encryptedDB-journal", "encryptedDB-wal", "financeDB"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("encryptedDB.d")).unwrap();

        assert_eq!(files.destroy().unwrap(), 3);
        assert!(dir.path().join("financeDB").exists());
        assert!(dir.path().join("encryptedDB.d").is_dir());
        assert_eq!(files.destroy().unwrap(), 0);
    }

    #[test]
    fn destroy_on_missing_dir_is_noop() {
        let dir = tempdir().unwrap();
        let files = DatabaseFiles::new(dir.path().join("nope"), "encryptedDB");
        assert_eq!(files.destroy().unwrap(), 0);
    }

    #[test]
    fn unopenable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let opener = opener(dir.path());
        // A directory squatting on the database path survives the prefix sweep.
        fs::create_dir_all(opener.files().path()).unwrap();
        assert!(matches!(
            opener.open(&passphrase(1)),
            Err(OpenError::Create(_))
        ));
    }
}
