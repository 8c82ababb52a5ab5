use super::{seal_with_key, try_unseal_with_key, SealError, Sealer};
use base64::Engine;

const SERVICE: &str = "tee-worker";
const USER: &str = "sealing-key";

/// The "standalone" mode sealer: a single key stored in the OS credential
/// store, created on first use, surviving process restarts without ever
/// touching disk in plaintext. There is no rotation and no `/setkey` route
/// in this mode.
pub struct OsKeystoreSealer {
    key: Vec<u8>,
}

impl OsKeystoreSealer {
    pub fn load_or_create() -> Result<Self, SealError> {
        let entry = keyring::Entry::new(SERVICE, USER)
            .map_err(|e| SealError::Backend(e.to_string()))?;

        let key = match entry.get_password() {
            Ok(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| SealError::Malformed)?,
            Err(keyring::Error::NoEntry) => {
                let mut fresh = [0u8; 32];
                rand::Rng::fill(&mut rand::thread_rng(), &mut fresh);
                let encoded = base64::engine::general_purpose::STANDARD.encode(fresh);
                entry
                    .set_password(&encoded)
                    .map_err(|e| SealError::Backend(e.to_string()))?;
                fresh.to_vec()
            }
            Err(e) => return Err(SealError::Backend(e.to_string())),
        };

        Ok(OsKeystoreSealer { key })
    }
}

impl Sealer for OsKeystoreSealer {
    fn seal(&self, salt: &[u8], plaintext: &[u8]) -> Result<String, SealError> {
        seal_with_key(&self.key, salt, plaintext)
    }

    fn unseal(&self, salt: &[u8], ciphertext: &str) -> Result<Vec<u8>, SealError> {
        try_unseal_with_key(&self.key, salt, ciphertext).ok_or(SealError::DecryptFailed)
    }
}
