//! Signature verification for the operator-only `/setkey` route.
//!
//! Named apart from the `keyring` crate used by [`super::standalone`] to
//! avoid shadowing it.

use rsa::pkcs8::DecodePublicKey;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    #[error("invalid public key material: {0}")]
    InvalidKey(String),

    #[error("signature did not verify")]
    BadSignature,

    #[error("malformed signature")]
    MalformedSignature,
}

/// Holds the operator's configured public key and checks `/setkey`
/// submissions against it before a new root key is installed.
pub struct RsaKeyDistributor {
    verifying_key: VerifyingKey<Sha256>,
}

impl RsaKeyDistributor {
    pub fn from_public_key_pem(pem: &str) -> Result<Self, DistributorError> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| DistributorError::InvalidKey(e.to_string()))?;
        Ok(RsaKeyDistributor {
            verifying_key: VerifyingKey::new(public_key),
        })
    }

    /// Verifies `signature` over `key_material` (the raw 32-byte key being
    /// installed). Rejects anything that doesn't verify; never installs a
    /// key as a side effect of verification.
    pub fn verify(&self, key_material: &[u8], signature: &[u8]) -> Result<(), DistributorError> {
        let signature =
            Signature::try_from(signature).map_err(|_| DistributorError::MalformedSignature)?;
        self.verifying_key
            .verify(key_material, &signature)
            .map_err(|_| DistributorError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::pss::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;

    #[test]
    fn verifies_a_correctly_signed_key() {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let signing_key = SigningKey::<Sha256>::new(private);
        let material = [42u8; 32];
        let signature = signing_key.sign_with_rng(&mut rng, &material).to_vec();

        let distributor = RsaKeyDistributor::from_public_key_pem(&public_pem).unwrap();
        assert!(distributor.verify(&material, &signature).is_ok());
    }

    #[test]
    fn rejects_tampered_material() {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let signing_key = SigningKey::<Sha256>::new(private);
        let material = [42u8; 32];
        let signature = signing_key.sign_with_rng(&mut rng, &material).to_vec();

        let distributor = RsaKeyDistributor::from_public_key_pem(&public_pem).unwrap();
        let mut tampered = material;
        tampered[0] ^= 0xff;
        assert!(distributor.verify(&tampered, &signature).is_err());
    }
}
