use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use zeroize::Zeroizing;

use crate::error::KeyError;
use crate::key_broker::{DeviceKeyBroker, SecretSlot};

const SERVICE_NAME: &str = "LedgerVault";

/// Wrapping key secret held by the platform credential store
/// (Secret Service, Keychain, Credential Manager).
pub struct KeyringSlot {
    service: String,
    account: String,
}

impl KeyringSlot {
    pub fn new(alias: &str) -> Self {
        Self::with_service(SERVICE_NAME, alias)
    }

    pub fn with_service(service: &str, alias: &str) -> Self {
        Self {
            service: service.to_string(),
            account: alias.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, KeyError> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Unavailable(format!("keyring init: {e}")))
    }
}

impl SecretSlot for KeyringSlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        let encoded = match self.entry()?.get_password() {
            Ok(encoded) => Zeroizing::new(encoded),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(KeyError::Unavailable(format!("load key: {e}"))),
        };
        let decoded = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| KeyError::Unusable(format!("decode key: {e}")))?;
        Ok(Some(Zeroizing::new(decoded)))
    }

    fn store(&self, secret: &[u8]) -> Result<(), KeyError> {
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(secret));
        self.entry()?
            .set_password(&encoded)
            .map_err(|e| KeyError::Unavailable(format!("store key: {e}")))
    }

    fn clear(&self) -> Result<(), KeyError> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyError::Unavailable(format!("delete key: {e}"))),
        }
    }
}

pub type KeyringKeyBroker = DeviceKeyBroker<KeyringSlot>;

impl KeyringKeyBroker {
    pub fn new(alias: &str) -> Self {
        Self::with_slot(alias, KeyringSlot::new(alias))
    }
}
