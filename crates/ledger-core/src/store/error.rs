use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file corrupt: {0}")]
    Corrupt(String),

    #[error("store unreadable with this passphrase")]
    Unreadable,

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("write failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("constraint violated: {0}")]
    Constraint(String),
}
