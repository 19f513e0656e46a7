//! Database passphrase: the in-memory plaintext form and the store that
//! persists its wrapped form.

use parking_lot::Mutex;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::ConfigError;
use crate::preferences::ConfigStore;

/// Preferences key holding the wrapped passphrase (base64).
pub const PASSPHRASE_KEY: &str = "db.passphrase";

/// Number of random bytes behind a freshly generated passphrase.
pub const PASSPHRASE_LEN: usize = 32;

/// Plaintext database passphrase. Zeroized on drop, never persisted.
pub struct Passphrase(Zeroizing<Vec<char>>);

impl Passphrase {
    /// Map each byte to the char with the same code point (U+0000..=U+00FF).
    ///
    /// The bytes are never decoded as text: the mapping keeps every bit of
    /// entropy and is what the storage engine expects. Do not replace it with
    /// a UTF-8 decode.
    pub fn from_key_bytes(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.iter().map(|&b| char::from(b)).collect()))
    }

    pub fn chars(&self) -> &[char] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The char sequence as the storage engine consumes it (UTF-8).
    pub(crate) fn engine_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.0.len() * 2));
        let mut buf = [0u8; 4];
        for c in self.0.iter() {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        out
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passphrase(<{} chars redacted>)", self.0.len())
    }
}

/// Persistence for the wrapped passphrase. No validation happens here.
pub trait PassphraseStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, ConfigError>;
    fn set(&self, value: &str) -> Result<(), ConfigError>;
    fn remove(&self) -> Result<(), ConfigError>;
}

/// Wrapped passphrase kept in the preferences file under [`PASSPHRASE_KEY`].
pub struct ConfigPassphraseStore {
    config: Arc<ConfigStore>,
}

impl ConfigPassphraseStore {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl PassphraseStore for ConfigPassphraseStore {
    fn get(&self) -> Result<Option<String>, ConfigError> {
        self.config.get(PASSPHRASE_KEY)
    }

    fn set(&self, value: &str) -> Result<(), ConfigError> {
        self.config.set(PASSPHRASE_KEY, value)
    }

    fn remove(&self) -> Result<(), ConfigError> {
        self.config.remove(PASSPHRASE_KEY)
    }
}

#[derive(Default)]
pub struct MemoryPassphraseStore {
    value: Mutex<Option<String>>,
}

impl MemoryPassphraseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
        }
    }
}

impl PassphraseStore for MemoryPassphraseStore {
    fn get(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.value.lock().clone())
    }

    fn set(&self, value: &str) -> Result<(), ConfigError> {
        *self.value.lock() = Some(value.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), ConfigError> {
        *self.value.lock() = None;
        Ok(())
    }
}
