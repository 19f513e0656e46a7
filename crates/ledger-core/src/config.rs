use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crypto::KdfParams;
use crate::error::ConfigError;
use crate::key_broker::{KeyBroker, KEY_ALIAS};
use crate::key_file::FileKeyBroker;
use crate::preferences::ConfigStore;
use crate::secure_storage::KeyringKeyBroker;

pub const DB_NAME: &str = "encryptedDB";
pub const LEGACY_DB_NAME: &str = "financeDB";
pub const PREFERENCES_FILE: &str = "preferences.json";
pub const CONFIG_FILE: &str = "ledger.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    /// Platform credential store.
    Keyring,
    /// Owner-only key file under `<data_dir>/keys`.
    File,
}

impl std::str::FromStr for KeyBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyring" => Ok(KeyBackend::Keyring),
            "file" => Ok(KeyBackend::File),
            other => Err(format!("unknown key backend {other:?} (expected keyring or file)")),
        }
    }
}

/// Everything the bootstrap needs to locate its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub data_dir: PathBuf,
    pub db_name: String,
    pub legacy_db_name: String,
    pub key_alias: String,
    pub preferences_file: String,
    pub key_backend: KeyBackend,
    pub kdf: KdfParams,
}

/// Optional settings read from `ledger.json`. Absent fields keep defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub legacy_db_name: Option<String>,
    #[serde(default)]
    pub key_alias: Option<String>,
    #[serde(default)]
    pub preferences_file: Option<String>,
    #[serde(default)]
    pub key_backend: Option<KeyBackend>,
    #[serde(default)]
    pub kdf: Option<KdfParams>,
}

impl BootstrapConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            db_name: DB_NAME.to_string(),
            legacy_db_name: LEGACY_DB_NAME.to_string(),
            key_alias: KEY_ALIAS.to_string(),
            preferences_file: PREFERENCES_FILE.to_string(),
            key_backend: KeyBackend::Keyring,
            kdf: KdfParams::default(),
        }
    }

    /// Read overrides from a JSON file. A missing file yields no overrides.
    pub fn load_overrides(path: &Path) -> Result<ConfigOverrides, ConfigError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigOverrides::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(v) = overrides.db_name {
            self.db_name = v;
        }
        if let Some(v) = overrides.legacy_db_name {
            self.legacy_db_name = v;
        }
        if let Some(v) = overrides.key_alias {
            self.key_alias = v;
        }
        if let Some(v) = overrides.preferences_file {
            self.preferences_file = v;
        }
        if let Some(v) = overrides.key_backend {
            self.key_backend = v;
        }
        if let Some(v) = overrides.kdf {
            self.kdf = v;
        }
        self
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.data_dir.join("databases")
    }

    pub fn database_path(&self) -> PathBuf {
        self.databases_dir().join(&self.db_name)
    }

    pub fn legacy_database_path(&self) -> PathBuf {
        self.databases_dir().join(&self.legacy_db_name)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(&self.preferences_file)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn config_store(&self) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(self.preferences_path()))
    }

    /// Key broker for the configured backend.
    pub fn key_broker(&self) -> Arc<dyn KeyBroker> {
        match self.key_backend {
            KeyBackend::Keyring => Arc::new(KeyringKeyBroker::new(&self.key_alias)),
            KeyBackend::File => Arc::new(FileKeyBroker::new(&self.keys_dir(), &self.key_alias)),
        }
    }
}
