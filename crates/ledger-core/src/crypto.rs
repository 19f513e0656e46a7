//! Cryptographic primitives shared by the key broker and the sealed store.
//!
//! `derive_key`: Argon2id, turns the database passphrase into the 32-byte
//!   store key.
//!
//! `seal` / `open_sealed`: X25519 + HKDF-SHA256 + XChaCha20-Poly1305 sealed
//!   box, used to wrap the passphrase to the device key.
//!
//! Sealed box wire format (v1):
//!   [ version (1) | ephemeral public (32) | nonce (24) | ciphertext + tag ]

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const KDF_MAX_TIME_COST: u32 = 16;
pub const KDF_MAX_MEMORY_COST: u32 = 1 << 20; // 1GiB
pub const KDF_MAX_PARALLELISM: u32 = 16;
pub const DERIVED_KEY_LEN: usize = 32;

pub const NONCE_LEN: usize = 24;
pub const SALT_LEN: usize = 32;

const SEAL_VERSION: u8 = 1;
const SEAL_HEADER_LEN: usize = 1 + 32 + NONCE_LEN;
const SEAL_INFO: &[u8] = b"ledger-passphrase-wrap-v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (authentication tag mismatch)")]
    Decrypt,

    #[error("sealed blob malformed: {0}")]
    Malformed(&'static str),
}

/// Argon2id cost parameters. Stored in the sealed store header so a file is
/// always reopened with the parameters it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: KDF_TIME_COST,
            memory_cost: KDF_MEMORY_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. For tests only; the passphrase is
    /// already 256 bits of randomness so the KDF is not what protects it.
    pub fn insecure_fast() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 8,
            parallelism: 1,
        }
    }

    /// Whether Argon2 accepts these costs and they stay under the ceilings a
    /// stored header may ask for.
    pub fn within_limits(&self) -> bool {
        (1..=KDF_MAX_TIME_COST).contains(&self.time_cost)
            && (1..=KDF_MAX_PARALLELISM).contains(&self.parallelism)
            && self.memory_cost <= KDF_MAX_MEMORY_COST
            && self.memory_cost >= 8 * self.parallelism
    }
}

pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, CryptoError> {
    let params = Params::new(
        kdf.memory_cost,
        kdf.time_cost,
        kdf.parallelism,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(key)
}

pub fn encrypt(
    key: &[u8; DERIVED_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encrypt)
}

pub fn decrypt(
    key: &[u8; DERIVED_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Decrypt)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn generate_key_pair() -> StaticSecret {
    StaticSecret::random_from_rng(OsRng)
}

fn wrap_key(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(SEAL_INFO, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` so that only the holder of `recipient`'s secret can open it.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = wrap_key(shared.as_bytes(), &ephemeral_public, recipient)?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|_| CryptoError::Encrypt)?;
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: recipient.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(SEAL_HEADER_LEN + ciphertext.len());
    out.push(SEAL_VERSION);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a blob produced by [`seal`].
pub fn open_sealed(secret: &StaticSecret, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEAL_HEADER_LEN {
        return Err(CryptoError::Malformed("too short"));
    }
    if sealed[0] != SEAL_VERSION {
        return Err(CryptoError::Malformed("unknown version"));
    }
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&sealed[1..33]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let nonce = XNonce::from_slice(&sealed[33..SEAL_HEADER_LEN]);

    let recipient = PublicKey::from(secret);
    let shared = secret.diffie_hellman(&ephemeral_public);
    let key = wrap_key(shared.as_bytes(), &ephemeral_public, &recipient)?;

    let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|_| CryptoError::Decrypt)?;
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed[SEAL_HEADER_LEN..],
                aad: recipient.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}
