//! Destination-encryption primitives: an HKDF key schedule feeding a
//! Fernet-style authenticated token (AES-128-CBC + HMAC-SHA256), matching
//! the shape of the reference ecosystem's destination encryption without
//! depending on its exact byte layout (neither the PN wire formats nor the
//! stamp subsystem depend on this token's internal framing — only on its
//! being a correct AEAD over the plaintext).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::CryptoRngCore;
use sha2::Sha256;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

pub const IV_SIZE: usize = 16;
pub const HMAC_SIZE: usize = 32;
pub const KEY_SIZE: usize = 32;
pub const SIGNING_KEY_SIZE: usize = 16;
pub const ENCRYPTION_KEY_SIZE: usize = 16;
/// IV + up to one block of PKCS7 padding + HMAC.
pub const TOKEN_OVERHEAD: usize = IV_SIZE + HMAC_SIZE;
pub const TOKEN_MAX_PADDING: usize = 16;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token shorter than minimum framing")]
    Truncated,
    #[error("HMAC authentication failed")]
    AuthenticationFailed,
    #[error("ciphertext padding invalid")]
    InvalidPadding,
    #[error("output buffer too small")]
    BufferTooSmall,
}

/// 32 bytes of key material derived from an ECDH shared secret, split into a
/// signing half and an encryption half.
pub struct DerivedKey {
    signing_key: [u8; SIGNING_KEY_SIZE],
    encryption_key: [u8; ENCRYPTION_KEY_SIZE],
}

impl DerivedKey {
    pub fn new(shared_secret: &[u8], context: Option<&[u8]>) -> Self {
        let hk = Hkdf::<Sha256>::new(context, shared_secret);
        let mut okm = [0u8; KEY_SIZE];
        hk.expand(&[], &mut okm)
            .expect("32-byte okm is within HKDF-SHA256's output range");
        let mut signing_key = [0u8; SIGNING_KEY_SIZE];
        let mut encryption_key = [0u8; ENCRYPTION_KEY_SIZE];
        signing_key.copy_from_slice(&okm[..SIGNING_KEY_SIZE]);
        encryption_key.copy_from_slice(&okm[SIGNING_KEY_SIZE..]);
        Self { signing_key, encryption_key }
    }

    pub fn signing_key(&self) -> &[u8; SIGNING_KEY_SIZE] {
        &self.signing_key
    }

    pub fn encryption_key(&self) -> &[u8; ENCRYPTION_KEY_SIZE] {
        &self.encryption_key
    }
}

/// AES-128-CBC + HMAC-SHA256 authenticated token, keyed by a `DerivedKey`.
pub struct Fernet {
    signing_key: [u8; SIGNING_KEY_SIZE],
    encryption_key: [u8; ENCRYPTION_KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl Fernet {
    pub fn new<R: CryptoRngCore>(derived: &DerivedKey, mut rng: R) -> Self {
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);
        Self {
            signing_key: *derived.signing_key(),
            encryption_key: *derived.encryption_key(),
            iv,
        }
    }

    /// Encrypts `plaintext` into `out`, returning the number of bytes
    /// written. `out` must be at least
    /// `plaintext.len() + TOKEN_OVERHEAD + TOKEN_MAX_PADDING` long.
    pub fn encrypt(&self, plaintext: &[u8], out: &mut [u8]) -> Result<usize, TokenError> {
        let cipher_capacity = plaintext.len() + TOKEN_MAX_PADDING;
        if out.len() < IV_SIZE + cipher_capacity + HMAC_SIZE {
            return Err(TokenError::BufferTooSmall);
        }
        out[..IV_SIZE].copy_from_slice(&self.iv);

        let mut buf = vec![0u8; cipher_capacity];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &self.iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .map_err(|_| TokenError::BufferTooSmall)?;
        let cipher_len = ciphertext.len();
        out[IV_SIZE..IV_SIZE + cipher_len].copy_from_slice(ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC accepts any key length");
        mac.update(&out[..IV_SIZE + cipher_len]);
        let tag = mac.finalize().into_bytes();
        out[IV_SIZE + cipher_len..IV_SIZE + cipher_len + HMAC_SIZE].copy_from_slice(&tag);

        Ok(IV_SIZE + cipher_len + HMAC_SIZE)
    }

    pub fn encrypt_to_vec(&self, plaintext: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut out = vec![0u8; plaintext.len() + TOKEN_OVERHEAD + TOKEN_MAX_PADDING];
        let n = self.encrypt(plaintext, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    pub fn decrypt(derived: &DerivedKey, token: &[u8]) -> Result<Vec<u8>, TokenError> {
        if token.len() < IV_SIZE + HMAC_SIZE {
            return Err(TokenError::Truncated);
        }
        let (framed, tag) = token.split_at(token.len() - HMAC_SIZE);
        let mut mac = HmacSha256::new_from_slice(derived.signing_key())
            .expect("HMAC accepts any key length");
        mac.update(framed);
        mac.verify_slice(tag).map_err(|_| TokenError::AuthenticationFailed)?;

        let (iv, ciphertext) = framed.split_at(IV_SIZE);
        let mut buf = ciphertext.to_vec();
        let plaintext = Aes128CbcDec::new(derived.encryption_key().into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| TokenError::InvalidPadding)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let derived = DerivedKey::new(b"shared secret material", Some(b"ctx"));
        let fernet = Fernet::new(&derived, OsRng);
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let token = fernet.encrypt_to_vec(plaintext).unwrap();
        let recovered = Fernet::decrypt(&derived, &token).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tampered_token_fails_authentication() {
        let derived = DerivedKey::new(b"shared secret material", None);
        let fernet = Fernet::new(&derived, OsRng);
        let mut token = fernet.encrypt_to_vec(b"hello").unwrap();
        let last = token.len() - 1;
        token[last] ^= 0xFF;
        assert!(matches!(Fernet::decrypt(&derived, &token), Err(TokenError::AuthenticationFailed)));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let derived_a = DerivedKey::new(b"secret a", None);
        let derived_b = DerivedKey::new(b"secret b", None);
        let fernet = Fernet::new(&derived_a, OsRng);
        let token = fernet.encrypt_to_vec(b"hello").unwrap();
        assert!(Fernet::decrypt(&derived_b, &token).is_err());
    }
}
