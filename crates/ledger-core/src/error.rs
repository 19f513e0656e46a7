use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secure key facility unavailable: {0}")]
    Unavailable(String),

    #[error("wrapping key unusable: {0}")]
    Unusable(String),

    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config store unreadable: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config store write failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("database creation failed: {0}")]
    Create(#[source] StoreError),

    #[error("database unopenable after destructive recreate: {0}")]
    Recreate(#[source] StoreError),

    #[error("database I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("default account seeding failed: {0}")]
    Seed(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("legacy store read failed: {0}")]
    Legacy(#[from] rusqlite::Error),

    #[error("encrypted store write failed: {0}")]
    Store(#[from] StoreError),

    #[error("legacy store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("legacy row invalid in {table} (id {id}): {reason}")]
    InvalidRow {
        table: &'static str,
        id: i64,
        reason: String,
    },
}

/// Terminal failure of a bootstrap run. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not open secure storage: {0}")]
    Key(#[from] KeyError),

    #[error("could not open secure storage: {0}")]
    Config(#[from] ConfigError),

    #[error("could not open secure storage: {0}")]
    Open(#[from] OpenError),

    #[error("could not open secure storage: migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("could not open secure storage: bootstrap worker aborted: {0}")]
    Aborted(String),
}
