use rand_core::CryptoRngCore;
use reticulum::crypt::{DerivedKey, Fernet};
use reticulum::identity::{Identity, PrivateIdentity, SIGNATURE_LENGTH};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as XPublicKey};

use super::payload::Payload;
use crate::error::LxmfError;

/// The bit-exact wire format (spec §6): pack/unpack, hash, and detached
/// signature over the signed region. This type owns no delivery state — it
/// is the codec `Message` (message/mod.rs) packs into and unpacks from.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub destination_hash: [u8; 16],
    pub source_hash: [u8; 16],
    pub signature: Option<[u8; SIGNATURE_LENGTH]>,
    pub payload: Payload,
}

impl WireMessage {
    pub fn new(destination_hash: [u8; 16], source_hash: [u8; 16], payload: Payload) -> Self {
        Self { destination_hash, source_hash, signature: None, payload }
    }

    fn signed_region(&self) -> Result<Vec<u8>, LxmfError> {
        let packed_payload = self.payload.to_msgpack()?;
        let mut region = Vec::with_capacity(16 + 16 + packed_payload.len());
        region.extend_from_slice(&self.destination_hash);
        region.extend_from_slice(&self.source_hash);
        region.extend_from_slice(&packed_payload);
        Ok(region)
    }

    /// `hash = SHA-256(destination_hash ‖ source_hash ‖ packed_payload)`.
    /// Invariant 1: a pure function of those three inputs, never changes
    /// after first pack.
    pub fn hash(&self) -> Result<[u8; 32], LxmfError> {
        let region = self.signed_region()?;
        let digest = Sha256::digest(&region);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    /// Signs `signed_region ‖ hash` (the hash is appended before signing to
    /// bind it, spec §4.1).
    pub fn sign(&mut self, signer: &PrivateIdentity) -> Result<(), LxmfError> {
        let region = self.signed_region()?;
        let hash = self.hash()?;
        let mut data = Vec::with_capacity(region.len() + hash.len());
        data.extend_from_slice(&region);
        data.extend_from_slice(&hash);
        self.signature = Some(signer.sign(&data));
        Ok(())
    }

    /// `Ok(true)` if the signature verifies against `identity`. Does not
    /// distinguish "no signature" from "bad signature" — callers check
    /// `self.signature.is_some()` first if that distinction matters.
    pub fn verify(&self, identity: &Identity) -> Result<bool, LxmfError> {
        let Some(signature) = self.signature else { return Ok(false) };
        let region = self.signed_region()?;
        let hash = self.hash()?;
        let mut data = Vec::with_capacity(region.len() + hash.len());
        data.extend_from_slice(&region);
        data.extend_from_slice(&hash);
        Ok(identity.verify(&data, &signature).is_ok())
    }

    /// `destination_hash(16) ‖ source_hash(16) ‖ signature(64) ‖
    /// packed_payload(var)` (spec §6).
    pub fn pack(&self) -> Result<Vec<u8>, LxmfError> {
        let signature =
            self.signature.ok_or_else(|| LxmfError::Encode("message is unsigned".into()))?;
        let packed_payload = self.payload.to_msgpack()?;
        let mut out = Vec::with_capacity(16 + 16 + SIGNATURE_LENGTH + packed_payload.len());
        out.extend_from_slice(&self.destination_hash);
        out.extend_from_slice(&self.source_hash);
        out.extend_from_slice(&signature);
        out.extend_from_slice(&packed_payload);
        Ok(out)
    }

    /// Unpack contract (spec §4.1): minimum length 96, structural parse
    /// failures are reported distinct from (absent) signature validation —
    /// callers validate the signature themselves via `verify` once the
    /// source identity is recalled.
    pub fn unpack(bytes: &[u8]) -> Result<Self, LxmfError> {
        const MIN_LEN: usize = 16 + 16 + SIGNATURE_LENGTH;
        if bytes.len() < MIN_LEN {
            return Err(LxmfError::StructuralDecode(format!(
                "packed message is {} bytes, minimum is {MIN_LEN}",
                bytes.len()
            )));
        }
        let mut destination_hash = [0u8; 16];
        let mut source_hash = [0u8; 16];
        let mut signature = [0u8; SIGNATURE_LENGTH];
        destination_hash.copy_from_slice(&bytes[0..16]);
        source_hash.copy_from_slice(&bytes[16..32]);
        signature.copy_from_slice(&bytes[32..32 + SIGNATURE_LENGTH]);
        let payload = Payload::from_msgpack(&bytes[32 + SIGNATURE_LENGTH..])?;
        Ok(Self { destination_hash, source_hash, signature: Some(signature), payload })
    }

    /// Bytes fed to the representation-threshold calculation: the packed
    /// payload's `content_size` is `len(packed_payload) - TIMESTAMP_SIZE -
    /// STRUCT_OVERHEAD` (spec §4.1).
    pub fn packed_payload_len(&self) -> Result<usize, LxmfError> {
        Ok(self.payload.to_msgpack()?.len())
    }

    /// Everything after the destination hash in the full packed message:
    /// `source_hash ‖ signature ‖ packed_payload`. This is what gets
    /// recipient-encrypted for PROPAGATED/paper delivery (spec §3
    /// invariant 5, §4.3 "pack_for_propagation").
    pub fn packed_payload_without_destination(&self) -> Result<Vec<u8>, LxmfError> {
        let packed = self.pack()?;
        Ok(packed[16..].to_vec())
    }
}

/// Encrypts `plaintext` for `destination`'s recall-able identity, binding
/// the derivation to `context` (the destination hash, so a compromised key
/// for one destination cannot decrypt traffic for another). The ephemeral
/// public key is prepended so the recipient can redo the ECDH.
pub fn encrypt_for_identity<R: CryptoRngCore + Copy>(
    destination: &Identity,
    context: &[u8],
    plaintext: &[u8],
    rng: R,
) -> Result<Vec<u8>, LxmfError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(rng);
    let ephemeral_public = XPublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&destination.encryption_public_key());
    let derived = DerivedKey::new(shared.as_bytes(), Some(context));
    let fernet = Fernet::new(&derived, rng);
    let token = fernet.encrypt_to_vec(plaintext).map_err(|e| LxmfError::Encode(e.to_string()))?;

    let mut out = Vec::with_capacity(32 + token.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&token);
    Ok(out)
}

/// Inverse of `encrypt_for_identity`, run by the holder of `private`.
pub fn decrypt_for_identity(
    private: &PrivateIdentity,
    context: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, LxmfError> {
    if ciphertext.len() < 32 {
        return Err(LxmfError::StructuralDecode("ciphertext shorter than ephemeral key".into()));
    }
    let (ephemeral_public_bytes, token) = ciphertext.split_at(32);
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(ephemeral_public_bytes);
    let ephemeral_public = XPublicKey::from(ephemeral_public);
    let shared = private.encryption_secret().diffie_hellman(&ephemeral_public);
    let derived = DerivedKey::new(shared.as_bytes(), Some(context));
    Fernet::decrypt(&derived, token).map_err(|e| LxmfError::StructuralDecode(e.to_string()))
}
