use crate::crypto::*;
use crate::passphrase::Passphrase;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

use super::error::StoreError;
use super::models::{Account, Category, Tables, Transaction};

pub const STORE_MAGIC: &[u8] = b"LEDGER01";
pub const STORE_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct StoreHeader {
    pub store_version: u32,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

/// Encrypted single-file store.
///
/// The file is a fixed 128-byte header followed by the XChaCha20-Poly1305
/// ciphertext of the JSON-encoded [`Tables`]. The header is authenticated as
/// associated data. Every write re-encrypts under a fresh nonce and replaces
/// the file atomically.
pub struct SealedStore {
    path: PathBuf,
    header: StoreHeader,
    key: Zeroizing<[u8; DERIVED_KEY_LEN]>,
    tables: RwLock<Tables>,
}

impl SealedStore {
    /// Create an empty store at `path`, replacing any file already there.
    pub fn create<P: AsRef<Path>>(
        path: P,
        passphrase: &Passphrase,
        kdf: KdfParams,
    ) -> Result<Self, StoreError> {
        let salt = generate_salt();
        let key = derive_key(&passphrase.engine_bytes(), &salt, &kdf)?;
        let store = SealedStore {
            path: path.as_ref().to_path_buf(),
            header: StoreHeader {
                store_version: STORE_VERSION,
                kdf,
                salt,
                nonce: [0u8; NONCE_LEN],
            },
            key,
            tables: RwLock::new(Tables::default()),
        };
        store.persist(&Tables::default())?;
        debug!(path = %store.path.display(), "sealed store created");
        Ok(store)
    }

    pub fn open<P: AsRef<Path>>(path: P, passphrase: &Passphrase) -> Result<Self, StoreError> {
        let mut file = File::open(path.as_ref())?;
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => StoreError::Corrupt("truncated header".into()),
            _ => StoreError::Io(e),
        })?;
        let header = StoreHeader::from_bytes(&header_buf)?;
        let mut ciphertext = Vec::new();
        file.read_to_end(&mut ciphertext)?;

        let key = derive_key(&passphrase.engine_bytes(), &header.salt, &header.kdf)?;
        let plaintext = decrypt(&key, &header.nonce, &ciphertext, &header_buf)
            .map_err(|_| StoreError::Unreadable)?;
        let tables: Tables = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(format!("payload: {e}")))?;
        debug!(path = %path.as_ref().display(), rows = tables.row_count(), "sealed store opened");
        Ok(SealedStore {
            path: path.as_ref().to_path_buf(),
            header,
            key,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Apply `f` to a copy of the tables and commit the copy only if `f`
    /// succeeds and the result reaches disk. Writers are serialized.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tables) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.tables.write();
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        self.persist(&staged)?;
        *guard = staged;
        Ok(out)
    }

    /// Read-only view of the current tables.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Tables) -> T,
    {
        f(&self.tables.read())
    }

    pub fn count_accounts(&self) -> usize {
        self.tables.read().accounts.len()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.tables.read().accounts.values().cloned().collect()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.tables.read().categories.values().cloned().collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables.read().transactions.values().cloned().collect()
    }

    pub fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        self.transaction(|t| t.upsert_account(account))
    }

    pub fn insert_category(&self, category: Category) -> Result<(), StoreError> {
        self.transaction(|t| t.upsert_category(category))
    }

    pub fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        self.transaction(|t| t.upsert_transaction(transaction))
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(tables)?);
        // Fresh nonce for every save; XChaCha20-Poly1305 must never reuse one under a key.
        let header = StoreHeader {
            nonce: generate_nonce(),
            ..self.header.clone()
        };
        let header_bytes = header.to_bytes();
        let ciphertext = encrypt(&self.key, &header.nonce, &plaintext, &header_bytes)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        // Side file shares the store's name prefix so a prefix sweep removes leftovers.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tmp.write_all(&header_bytes)?;
        tmp.write_all(&ciphertext)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for SealedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedStore")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl StoreHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..STORE_MAGIC.len()].copy_from_slice(STORE_MAGIC);
        buf[8..12].copy_from_slice(&self.store_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kdf.memory_cost.to_le_bytes());
        buf[20..24].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        buf[24..56].copy_from_slice(&self.salt);
        buf[56..80].copy_from_slice(&self.nonce);
        // remaining bytes stay zero
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, StoreError> {
        if buf.len() != HEADER_SIZE {
            return Err(StoreError::Corrupt("invalid header size".into()));
        }
        if &buf[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(StoreError::Corrupt("invalid magic".into()));
        }
        let store_version = read_u32(buf, 8);
        if store_version != STORE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported store version {store_version}"
            )));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[24..56]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[56..80]);
        // Costs are read before anything is authenticated; bound them first.
        let kdf = KdfParams {
            time_cost: read_u32(buf, 12),
            memory_cost: read_u32(buf, 16),
            parallelism: read_u32(buf, 20),
        };
        if !kdf.within_limits() {
            return Err(StoreError::Corrupt(format!(
                "kdf parameters out of range: t={} m={} p={}",
                kdf.time_cost, kdf.memory_cost, kdf.parallelism
            )));
        }
        Ok(Self {
            store_version,
            kdf,
            salt,
            nonce,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

/// Remove a store file if present. Missing files are not an error.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::DEFAULT_ACCOUNT_ID;
    use tempfile::tempdir;

    fn passphrase(seed: u8) -> Passphrase {
        Passphrase::from_key_bytes(&[seed; 32])
    }

    #[test]
    fn create_and_open_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        let store = SealedStore::create(&path, &passphrase(1), KdfParams::insecure_fast()).unwrap();
        store.insert_account(Account::default_account()).unwrap();
        drop(store);

        let opened = SealedStore::open(&path, &passphrase(1)).unwrap();
        assert_eq!(opened.count_accounts(), 1);
        assert_eq!(opened.accounts()[0].id, DEFAULT_ACCOUNT_ID);
        assert_eq!(opened.header().kdf, KdfParams::insecure_fast());
    }

    #[test]
    fn wrong_passphrase_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        SealedStore::create(&path, &passphrase(1), KdfParams::insecure_fast()).unwrap();
        assert!(matches!(
            SealedStore::open(&path, &passphrase(2)),
            Err(StoreError::Unreadable)
        ));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        fs::write(&path, b"SQLite format 3\0 not ours").unwrap();
        assert!(matches!(
            SealedStore::open(&path, &passphrase(1)),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn tampered_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        SealedStore::create(&path, &passphrase(1), KdfParams::insecure_fast()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[100] ^= 0xFF; // reserved header byte, covered by the AAD
        fs::write(&path, bytes).unwrap();
        assert!(SealedStore::open(&path, &passphrase(1)).is_err());
    }

    #[test]
    fn oversized_kdf_costs_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        SealedStore::create(&path, &passphrase(1), KdfParams::insecure_fast()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            SealedStore::open(&path, &passphrase(1)),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn failed_transaction_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        let store = SealedStore::create(&path, &passphrase(3), KdfParams::insecure_fast()).unwrap();
        store.insert_account(Account::default_account()).unwrap();

        let result: Result<(), StoreError> = store.transaction(|t| {
            t.upsert_account(Account {
                id: 5,
                name: "Savings".into(),
            })?;
            Err(StoreError::Constraint("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.count_accounts(), 1);

        let reopened = SealedStore::open(&path, &passphrase(3)).unwrap();
        assert_eq!(reopened.count_accounts(), 1);
    }

    #[test]
    fn saves_leave_no_side_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("encryptedDB");
        let store = SealedStore::create(&path, &passphrase(4), KdfParams::insecure_fast()).unwrap();
        store.insert_account(Account::default_account()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("encryptedDB")]);
    }
}
