use super::{seal_with_key, try_unseal_with_key, SealError, Sealer};
use std::sync::RwLock;
use std::time::SystemTime;

pub const MAX_KEYS_IN_RING: usize = 3;

/// A root key plus when it was installed. The ring keeps at most
/// [`MAX_KEYS_IN_RING`] entries, newest at index 0.
#[derive(Clone)]
pub struct KeyEntry {
    pub key: Vec<u8>,
    pub installed_at: SystemTime,
}

/// The "enclave" mode sealer: a rolling set of keys, sealing always with
/// the newest, unsealing by trying each newest-first.
pub struct KeyRing {
    entries: RwLock<Vec<KeyEntry>>,
}

impl KeyRing {
    /// Starts with a single freshly generated key.
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed);
        KeyRing {
            entries: RwLock::new(vec![KeyEntry {
                key: seed.to_vec(),
                installed_at: SystemTime::now(),
            }]),
        }
    }

    /// Prepend `key` as the new active signing key. No-op if it's already
    /// present (by byte equality) anywhere in the ring. Drops the oldest
    /// entry once the ring exceeds [`MAX_KEYS_IN_RING`].
    pub fn add(&self, key: Vec<u8>) -> bool {
        let mut entries = self.entries.write().expect("key ring lock poisoned");
        if entries.iter().any(|e| e.key == key) {
            return false;
        }
        entries.insert(
            0,
            KeyEntry {
                key,
                installed_at: SystemTime::now(),
            },
        );
        entries.truncate(MAX_KEYS_IN_RING);
        true
    }

    pub fn latest(&self) -> Option<Vec<u8>> {
        self.entries
            .read()
            .expect("key ring lock poisoned")
            .first()
            .map(|e| e.key.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("key ring lock poisoned").len()
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Sealer for KeyRing {
    fn seal(&self, salt: &[u8], plaintext: &[u8]) -> Result<String, SealError> {
        let key = self.latest().ok_or(SealError::NoKey)?;
        seal_with_key(&key, salt, plaintext)
    }

    fn unseal(&self, salt: &[u8], ciphertext: &str) -> Result<Vec<u8>, SealError> {
        let entries = self.entries.read().expect("key ring lock poisoned").clone();
        for entry in entries {
            if let Some(pt) = try_unseal_with_key(&entry.key, salt, ciphertext) {
                return Ok(pt);
            }
        }
        Err(SealError::DecryptFailed)
    }
}

impl Clone for KeyEntry {
    fn clone(&self) -> Self {
        KeyEntry {
            key: self.key.clone(),
            installed_at: self.installed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let ring = KeyRing::new();
        let key = vec![5u8; 32];
        assert!(ring.add(key.clone()));
        assert!(!ring.add(key));
    }

    #[test]
    fn rotation_keeps_old_key_decryptable() {
        let ring = KeyRing::new();
        let ct = ring.seal(b"salt", b"payload").unwrap();

        ring.add(vec![2u8; 32]);
        assert_eq!(ring.unseal(b"salt", &ct).unwrap(), b"payload");
    }

    #[test]
    fn rotation_evicts_beyond_capacity() {
        let ring = KeyRing::new();
        let ct = ring.seal(b"salt", b"payload").unwrap();

        for i in 0..MAX_KEYS_IN_RING {
            ring.add(vec![(10 + i) as u8; 32]);
        }
        assert!(ring.unseal(b"salt", &ct).is_err());
    }
}
