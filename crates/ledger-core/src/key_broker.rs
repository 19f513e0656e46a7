//! Device-bound wrapping key.
//!
//! The wrapping key is an X25519 keypair kept in a device keystore under a
//! fixed alias. It is only ever used to seal and open the database
//! passphrase; it never touches row data. The secret half lives in a
//! [`SecretSlot`] (OS keyring, protected key file, or memory) and is loaded
//! only for the duration of a single decrypt.

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::KeyError;

/// Alias of the wrapping key in the device keystore.
pub const KEY_ALIAS: &str = "financeDatabaseKey";

const SECRET_LEN: usize = 32;

/// Encrypt/decrypt capability over the wrapping key.
pub trait KeyBroker: Send + Sync {
    fn alias(&self) -> &str;

    fn key_exists(&self) -> Result<bool, KeyError>;

    /// Create a new keypair under the alias, replacing any previous one.
    /// Irreversible: anything sealed to the old key becomes unrecoverable.
    fn generate_key(&self) -> Result<(), KeyError>;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError>;

    /// Fails with [`KeyError::Unusable`] if the key was invalidated or the
    /// blob was sealed to a different key.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError>;

    /// Remove the keypair. Deleting an absent key is not an error.
    fn delete_key(&self) -> Result<(), KeyError>;
}

/// Raw storage for the secret half of the wrapping key.
pub trait SecretSlot: Send + Sync {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError>;
    fn store(&self, secret: &[u8]) -> Result<(), KeyError>;
    fn clear(&self) -> Result<(), KeyError>;
}

/// [`KeyBroker`] over any [`SecretSlot`].
pub struct DeviceKeyBroker<S> {
    alias: String,
    slot: S,
}

impl<S: SecretSlot> DeviceKeyBroker<S> {
    pub fn with_slot(alias: &str, slot: S) -> Self {
        Self {
            alias: alias.to_string(),
            slot,
        }
    }

    fn load_secret(&self) -> Result<StaticSecret, KeyError> {
        let bytes = self
            .slot
            .load()?
            .ok_or_else(|| KeyError::Unavailable(format!("no wrapping key under {}", self.alias)))?;
        if bytes.len() != SECRET_LEN {
            return Err(KeyError::Unusable(format!(
                "stored key for {} has invalid length",
                self.alias
            )));
        }
        let mut raw = [0u8; SECRET_LEN];
        raw.copy_from_slice(&bytes);
        Ok(StaticSecret::from(raw))
    }
}

impl<S: SecretSlot> KeyBroker for DeviceKeyBroker<S> {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn key_exists(&self) -> Result<bool, KeyError> {
        Ok(self.slot.load()?.is_some())
    }

    fn generate_key(&self) -> Result<(), KeyError> {
        let secret = crypto::generate_key_pair();
        self.slot.store(&secret.to_bytes())?;
        info!(alias = %self.alias, "generated wrapping key");
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let secret = self.load_secret()?;
        let public = PublicKey::from(&secret);
        Ok(crypto::seal(&public, plaintext)?)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let secret = self.load_secret()?;
        crypto::open_sealed(&secret, ciphertext).map_err(|e| {
            debug!(alias = %self.alias, error = %e, "unwrap failed");
            KeyError::Unusable(format!("cannot unwrap with {}: {e}", self.alias))
        })
    }

    fn delete_key(&self) -> Result<(), KeyError> {
        self.slot.clear()?;
        warn!(alias = %self.alias, "wrapping key deleted");
        Ok(())
    }
}

/// In-process slot. The key dies with the process.
#[derive(Default)]
pub struct MemorySlot {
    secret: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl SecretSlot for MemorySlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        Ok(self.secret.lock().clone())
    }

    fn store(&self, secret: &[u8]) -> Result<(), KeyError> {
        *self.secret.lock() = Some(Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn clear(&self) -> Result<(), KeyError> {
        *self.secret.lock() = None;
        Ok(())
    }
}

pub type MemoryKeyBroker = DeviceKeyBroker<MemorySlot>;

impl MemoryKeyBroker {
    pub fn new() -> Self {
        Self::with_slot(KEY_ALIAS, MemorySlot::default())
    }
}

impl Default for MemoryKeyBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_until_generated() {
        let broker = MemoryKeyBroker::new();
        assert!(!broker.key_exists().unwrap());
        assert!(matches!(
            broker.encrypt(b"x"),
            Err(KeyError::Unavailable(_))
        ));
        broker.generate_key().unwrap();
        assert!(broker.key_exists().unwrap());
        assert_eq!(broker.alias(), KEY_ALIAS);
    }

    #[test]
    fn wrap_roundtrip_random_passphrases() {
        let broker = MemoryKeyBroker::new();
        broker.generate_key().unwrap();
        for len in [1usize, 16, 32, 64] {
            let p = crypto::random_bytes(len);
            let wrapped = broker.encrypt(&p).unwrap();
            assert_ne!(wrapped.as_slice(), p.as_slice());
            assert_eq!(broker.decrypt(&wrapped).unwrap().as_slice(), p.as_slice());
        }
    }

    #[test]
    fn regenerated_key_cannot_unwrap_old_blob() {
        let broker = MemoryKeyBroker::new();
        broker.generate_key().unwrap();
        let wrapped = broker.encrypt(b"old passphrase").unwrap();
        broker.generate_key().unwrap();
        assert!(matches!(
            broker.decrypt(&wrapped),
            Err(KeyError::Unusable(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let broker = MemoryKeyBroker::new();
        broker.delete_key().unwrap();
        broker.generate_key().unwrap();
        broker.delete_key().unwrap();
        assert!(!broker.key_exists().unwrap());
    }

    #[test]
    fn malformed_stored_key_is_unusable() {
        let slot = MemorySlot::default();
        slot.store(&[1, 2, 3]).unwrap();
        let broker = DeviceKeyBroker::with_slot(KEY_ALIAS, slot);
        assert!(matches!(
            broker.decrypt(&[0u8; 80]),
            Err(KeyError::Unusable(_))
        ));
    }
}
