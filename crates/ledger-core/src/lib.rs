//! Secure bootstrap for the encrypted ledger store.
//!
//! A device-bound wrapping key protects a random database passphrase kept in
//! the preferences file. The bootstrap recovers (or creates) that passphrase,
//! opens the sealed store with it and imports the legacy unencrypted store
//! exactly once.

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod database;
pub mod error;
pub mod key_broker;
pub mod key_file;
pub mod legacy;
pub mod passphrase;
pub mod paths;
pub mod preferences;
pub mod progress;
pub mod secure_storage;
pub mod store;
pub mod task;

pub use config::{BootstrapConfig, ConfigOverrides, KeyBackend};
pub use coordinator::{BootstrapCoordinator, CoordinatorState};
pub use database::{DatabaseFiles, StorageHandle, StorageOpener};
pub use error::{BootstrapError, ConfigError, KeyError, MigrationError, OpenError};
pub use key_broker::{KeyBroker, MemoryKeyBroker, KEY_ALIAS};
pub use legacy::LegacyMigrator;
pub use passphrase::{
    ConfigPassphraseStore, MemoryPassphraseStore, Passphrase, PassphraseStore, PASSPHRASE_KEY,
};
pub use progress::{Progress, ProgressSink, Stage};
pub use task::{
    BootstrapHandle, BootstrapListener, BootstrapOutcome, BootstrapRegistry, BootstrapTask,
};
