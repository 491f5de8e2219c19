use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};

use crate::hash::{AddressHash, Hash};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("malformed key bytes")]
    Malformed,
    #[error("signature verification failed")]
    SignatureInvalid,
}

/// A recalled or announced public identity: the X25519 encryption key and
/// Ed25519 verifying key pair that together derive a stable identity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub encryption_key: [u8; PUBLIC_KEY_LENGTH],
    pub verifying_key: [u8; PUBLIC_KEY_LENGTH],
}

impl Identity {
    pub fn from_public_keys(
        encryption_key: [u8; PUBLIC_KEY_LENGTH],
        verifying_key: [u8; PUBLIC_KEY_LENGTH],
    ) -> Self {
        Self { encryption_key, verifying_key }
    }

    /// Truncated SHA-256 over the concatenated public key material; this is
    /// the "identity hash" combined with a destination's name hash to form a
    /// full destination hash (see `hash::destination_hash`).
    pub fn hash(&self) -> AddressHash {
        Hash::new_from_parts(&[&self.encryption_key, &self.verifying_key]).truncated()
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        VerifyingKey::from_bytes(&self.verifying_key).map_err(|_| IdentityError::Malformed)
    }

    pub fn encryption_public_key(&self) -> XPublicKey {
        XPublicKey::from(self.encryption_key)
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), IdentityError> {
        let sig = Signature::from_slice(signature).map_err(|_| IdentityError::Malformed)?;
        self.verifying_key()?
            .verify(message, &sig)
            .map_err(|_| IdentityError::SignatureInvalid)
    }
}

/// A locally held keypair able to sign and decrypt.
pub struct PrivateIdentity {
    signing_key: SigningKey,
    encryption_secret: XStaticSecret,
}

impl PrivateIdentity {
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);
        let encryption_secret = XStaticSecret::from(secret_bytes);
        Self { signing_key, encryption_secret }
    }

    pub fn public(&self) -> Identity {
        Identity {
            encryption_key: XPublicKey::from(&self.encryption_secret).to_bytes(),
            verifying_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn encryption_secret(&self) -> &XStaticSecret {
        &self.encryption_secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn sign_and_verify_round_trips() {
        let mut rng = OsRng;
        let id = PrivateIdentity::generate(&mut rng);
        let public = id.public();
        let msg = b"lxmf signed region";
        let sig = id.sign(msg);
        public.verify(msg, &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let mut rng = OsRng;
        let id = PrivateIdentity::generate(&mut rng);
        let public = id.public();
        let sig = id.sign(b"hello");
        assert!(public.verify(b"goodbye", &sig).is_err());
    }

    #[test]
    fn identity_hash_is_stable() {
        let mut rng = OsRng;
        let id = PrivateIdentity::generate(&mut rng);
        let public = id.public();
        assert_eq!(public.hash(), public.hash());
    }
}
