//! Symmetric sealing of request/result payloads.
//!
//! Two interchangeable implementations of the same [`Sealer`] trait: an
//! `enclave`-mode [`KeyRing`] that keeps a rotating set of in-memory keys,
//! and a `standalone`-mode [`OsKeystoreSealer`] that keeps one key in the
//! platform credential store. The rest of the worker only ever depends on
//! the trait.

mod keyring_seal;
mod ring;
mod standalone;

pub use keyring_seal::RsaKeyDistributor;
pub use ring::{KeyEntry, KeyRing, MAX_KEYS_IN_RING};
pub use standalone::OsKeystoreSealer;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("no key available to seal with")]
    NoKey,

    #[error("ciphertext could not be decrypted with any known key")]
    DecryptFailed,

    #[error("malformed ciphertext")]
    Malformed,

    #[error("crypto backend error: {0}")]
    Backend(String),
}

/// Interface the rest of the worker sees; enclave and standalone modes
/// both implement it.
pub trait Sealer: Send + Sync {
    /// Encrypt `plaintext` under the current key, deriving the effective
    /// key from `salt` when non-empty. Returns base64-encoded ciphertext.
    fn seal(&self, salt: &[u8], plaintext: &[u8]) -> Result<String, SealError>;

    /// Decrypt base64-encoded `ciphertext`, trying every known key.
    fn unseal(&self, salt: &[u8], ciphertext: &str) -> Result<Vec<u8>, SealError>;
}

/// `HMAC-SHA256(root_key, salt)`, truncated to the root key's length.
/// Empty salt is a no-op: the root key is used directly.
fn derive_key(root_key: &[u8], salt: &[u8]) -> Vec<u8> {
    if salt.is_empty() {
        return root_key.to_vec();
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(root_key).expect("HMAC accepts any key length");
    mac.update(salt);
    let digest = mac.finalize().into_bytes();
    digest[..root_key.len().min(digest.len())].to_vec()
}

/// Seal `plaintext` with `root_key`, producing `nonce || ciphertext+tag`
/// base64-encoded for transport.
fn seal_with_key(root_key: &[u8], salt: &[u8], plaintext: &[u8]) -> Result<String, SealError> {
    let effective = derive_key(root_key, salt);
    let cipher = Aes256Gcm::new_from_slice(&effective)
        .map_err(|e| SealError::Backend(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    rand::Rng::fill(&mut rand::thread_rng(), &mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SealError::Backend(e.to_string()))?;

    let mut packed = Vec::with_capacity(12 + ciphertext.len());
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(packed))
}

/// Try to decrypt `ciphertext` with `root_key`. Returns `None` on any
/// failure so callers can try the next key in the ring without treating
/// a wrong-key attempt as fatal.
fn try_unseal_with_key(root_key: &[u8], salt: &[u8], ciphertext: &str) -> Option<Vec<u8>> {
    let packed = base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .ok()?;
    if packed.len() < 12 {
        return None;
    }
    let (nonce_bytes, ct) = packed.split_at(12);

    let effective = derive_key(root_key, salt);
    let cipher = Aes256Gcm::new_from_slice(&effective).ok()?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ct).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_salt() {
        let key = [7u8; 32];
        let ct = seal_with_key(&key, b"salt-1", b"hello").unwrap();
        let pt = try_unseal_with_key(&key, b"salt-1", &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn round_trip_without_salt() {
        let key = [9u8; 32];
        let ct = seal_with_key(&key, b"", b"world").unwrap();
        let pt = try_unseal_with_key(&key, b"", &ct).unwrap();
        assert_eq!(pt, b"world");
    }

    #[test]
    fn wrong_salt_fails() {
        let key = [1u8; 32];
        let ct = seal_with_key(&key, b"salt-a", b"secret").unwrap();
        assert!(try_unseal_with_key(&key, b"salt-b", &ct).is_none());
    }
}
