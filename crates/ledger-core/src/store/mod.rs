//! Encrypted storage engine behind the storage handle.
//!
//! One file per store: an authenticated header followed by the sealed table
//! payload. See [`sealed::SealedStore`] for the format.

pub mod error;
pub mod models;
pub mod sealed;

pub use error::StoreError;
pub use models::{Account, Category, Tables, Transaction, DEFAULT_ACCOUNT_ID};
pub use sealed::SealedStore;
