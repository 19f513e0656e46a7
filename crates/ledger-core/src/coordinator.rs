//! Turns the wrapping key and the stored wrapped passphrase into a usable
//! plaintext passphrase, repairing whatever state it finds on the way.

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto;
use crate::database::DatabaseFiles;
use crate::error::{BootstrapError, KeyError, OpenError};
use crate::key_broker::KeyBroker;
use crate::passphrase::{Passphrase, PassphraseStore, PASSPHRASE_LEN};
use crate::progress::{ProgressSink, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Start,
    KeyChecked,
    PassphraseResolved,
    PassphraseDecrypted,
    Done,
    Failed(String),
}

pub struct BootstrapCoordinator {
    broker: Arc<dyn KeyBroker>,
    passphrases: Arc<dyn PassphraseStore>,
    database: DatabaseFiles,
    state: Mutex<CoordinatorState>,
}

impl BootstrapCoordinator {
    pub fn new(
        broker: Arc<dyn KeyBroker>,
        passphrases: Arc<dyn PassphraseStore>,
        database: DatabaseFiles,
    ) -> Self {
        Self {
            broker,
            passphrases,
            database,
            state: Mutex::new(CoordinatorState::Start),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.lock().clone()
    }

    fn transition(&self, next: CoordinatorState) {
        info!(state = ?next, "coordinator");
        *self.state.lock() = next;
    }

    /// Produce the plaintext passphrase for the database.
    ///
    /// A missing wrapping key orphans any stored wrapped passphrase, which is
    /// removed before a new key is generated. A missing wrapped passphrase is generated after the old
    /// database files are destroyed, since nothing could open them anymore.
    /// Every failure is fatal for the run and leaves the state `Failed`.
    pub fn resolve_passphrase(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<Passphrase, BootstrapError> {
        match self.resolve(progress) {
            Ok(passphrase) => {
                self.transition(CoordinatorState::Done);
                Ok(passphrase)
            }
            Err(e) => {
                warn!(error = %e, "passphrase resolution failed");
                self.transition(CoordinatorState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn resolve(&self, progress: &dyn ProgressSink) -> Result<Passphrase, BootstrapError> {
        progress.report(Stage::InitKeyStore);
        if !self.broker.key_exists()? {
            // Drop the orphan before the new key exists, so an interrupted run
            // never leaves a key beside a passphrase it cannot unwrap.
            if self.passphrases.get()?.is_some() {
                warn!(
                    alias = self.broker.alias(),
                    "wrapping key missing; discarding unrecoverable wrapped passphrase"
                );
                self.passphrases.remove()?;
            }
            self.broker.generate_key()?;
        }
        self.transition(CoordinatorState::KeyChecked);

        let wrapped = match self.passphrases.get()? {
            Some(wrapped) => {
                progress.report(Stage::PassphraseFound);
                wrapped
            }
            None => {
                progress.report(Stage::CreatePassphrase);
                // Old files were sealed under a passphrase that no longer exists.
                self.database.destroy().map_err(OpenError::Io)?;
                let plain = crypto::random_bytes(PASSPHRASE_LEN);
                let encoded = general_purpose::STANDARD.encode(self.broker.encrypt(&plain)?);
                self.passphrases.set(&encoded)?;
                info!("created new database passphrase");
                encoded
            }
        };
        self.transition(CoordinatorState::PassphraseResolved);

        progress.report(Stage::DecryptPassphrase);
        let blob = general_purpose::STANDARD
            .decode(wrapped.trim().as_bytes())
            .map_err(|e| KeyError::Unusable(format!("wrapped passphrase is not base64: {e}")))?;
        let plain = self.broker.decrypt(&blob)?;
        let passphrase = Passphrase::from_key_bytes(&plain);
        self.transition(CoordinatorState::PassphraseDecrypted);
        Ok(passphrase)
    }

    /// Explicit recovery: drop the wrapping key, the wrapped passphrase and
    /// every database file. The next run starts from scratch.
    pub fn reset_secure_storage(&self) -> Result<(), BootstrapError> {
        self.broker.delete_key()?;
        self.passphrases.remove()?;
        let removed = self.database.destroy().map_err(OpenError::Io)?;
        warn!(files = removed, "secure storage reset");
        self.transition(CoordinatorState::Start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_broker::MemoryKeyBroker;
    use crate::passphrase::MemoryPassphraseStore;
    use crate::progress::NoProgress;
    use std::fs;
    use tempfile::tempdir;

    struct Fixture {
        broker: Arc<MemoryKeyBroker>,
        passphrases: Arc<MemoryPassphraseStore>,
        coordinator: BootstrapCoordinator,
        _dir: tempfile::TempDir,
        db_dir: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("databases");
        fs::create_dir_all(&db_dir).unwrap();
        let broker = Arc::new(MemoryKeyBroker::new());
        let passphrases = Arc::new(MemoryPassphraseStore::new());
        let coordinator = BootstrapCoordinator::new(
            broker.clone(),
            passphrases.clone(),
            DatabaseFiles::new(&db_dir, "encryptedDB"),
        );
        Fixture {
            broker,
            passphrases,
            coordinator,
            _dir: dir,
            db_dir,
        }
    }

    #[test]
    fn first_run_creates_key_and_passphrase() {
        let fx = fixture();
        assert_eq!(fx.coordinator.state(), CoordinatorState::Start);
        let stages = Mutex::new(Vec::new());
        let sink = |stage: Stage| stages.lock().push(stage);

        let passphrase = fx.coordinator.resolve_passphrase(&sink).unwrap();
        assert_eq!(passphrase.len(), PASSPHRASE_LEN);
        assert!(fx.broker.key_exists().unwrap());
        assert!(fx.passphrases.get().unwrap().is_some());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Done);
        assert_eq!(
            *stages.lock(),
            vec![
                Stage::InitKeyStore,
                Stage::CreatePassphrase,
                Stage::DecryptPassphrase
            ]
        );
    }

    #[test]
    fn second_run_returns_same_passphrase() {
        let fx = fixture();
        let first = fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        let second = fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        assert_eq!(first.chars(), second.chars());
    }

    #[test]
    fn lost_key_discards_wrapped_passphrase_and_database() {
        let fx = fixture();
        let first = fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        let old_wrapped = fx.passphrases.get().unwrap();
        fs::write(fx.db_dir.join("encryptedDB"), b"sealed under old passphrase").unwrap();
        fs::write(fx.db_dir.join("encryptedDB-journal"), b"x").unwrap();

        fx.broker.delete_key().unwrap();
        let second = fx.coordinator.resolve_passphrase(&NoProgress).unwrap();

        assert_ne!(first.chars(), second.chars());
        assert_ne!(fx.passphrases.get().unwrap(), old_wrapped);
        assert!(!fx.db_dir.join("encryptedDB").exists());
        assert!(!fx.db_dir.join("encryptedDB-journal").exists());
    }

    #[test]
    fn existing_passphrase_still_reports_resolution() {
        let fx = fixture();
        fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        let stages = Mutex::new(Vec::new());
        let sink = |stage: Stage| stages.lock().push(stage);

        fx.coordinator.resolve_passphrase(&sink).unwrap();
        assert_eq!(
            *stages.lock(),
            vec![
                Stage::InitKeyStore,
                Stage::PassphraseFound,
                Stage::DecryptPassphrase
            ]
        );
    }

    #[test]
    fn foreign_wrapped_passphrase_is_fatal_and_kept() {
        let fx = fixture();
        fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        let other = MemoryKeyBroker::new();
        other.generate_key().unwrap();
        let foreign = general_purpose::STANDARD.encode(other.encrypt(&[1u8; 32]).unwrap());
        fx.passphrases.set(&foreign).unwrap();

        let err = fx.coordinator.resolve_passphrase(&NoProgress).unwrap_err();
        assert!(matches!(err, BootstrapError::Key(KeyError::Unusable(_))));
        assert!(err.to_string().starts_with("could not open secure storage"));
        assert_eq!(fx.passphrases.get().unwrap().as_deref(), Some(foreign.as_str()));
        assert!(matches!(fx.coordinator.state(), CoordinatorState::Failed(_)));
    }

    #[test]
    fn non_base64_wrapped_passphrase_is_unusable() {
        let fx = fixture();
        fx.broker.generate_key().unwrap();
        fx.passphrases.set("%%% not base64 %%%").unwrap();
        let err = fx.coordinator.resolve_passphrase(&NoProgress).unwrap_err();
        assert!(matches!(err, BootstrapError::Key(KeyError::Unusable(_))));
    }

    #[test]
    fn reset_clears_everything() {
        let fx = fixture();
        fx.coordinator.resolve_passphrase(&NoProgress).unwrap();
        fs::write(fx.db_dir.join("encryptedDB"), b"x").unwrap();

        fx.coordinator.reset_secure_storage().unwrap();
        assert!(!fx.broker.key_exists().unwrap());
        assert!(fx.passphrases.get().unwrap().is_none());
        assert!(!fx.db_dir.join("encryptedDB").exists());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Start);
    }
}
