//! Native backend: XChaCha20-Poly1305 AEAD with BLAKE3 hashing and key derivation
//!
//! Seal output: ciphertext (same length as plaintext) + detached 16-byte
//! Poly1305 tag. No associated data; keys are already tenant- and
//! file-separated by the KDF.

use chacha20poly1305::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::backend::{check_context, check_nonce, Algorithm, CipherBackend};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::DerivedKey;
use crate::{HASH_SIZE, KEY_SIZE, TAG_SIZE};

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    /// Seal and open a fixed message, and check that a flipped tag is rejected.
    pub fn self_test(&self) -> CryptoResult<()> {
        let key = self.derive_key(b"docseal-self-test", b"probe", "self-test")?;
        let nonce = [7u8; 24];
        let message = b"native backend self test";

        let (ciphertext, mut tag) = self.seal(message, &key, &nonce)?;
        if ciphertext.as_slice() == message.as_slice() {
            return Err(CryptoError::Seal("ciphertext equals plaintext".into()));
        }
        let opened = self.open(&ciphertext, &tag, &key, &nonce)?;
        if opened.as_slice() != message.as_slice() {
            return Err(CryptoError::Seal("round trip mismatch".into()));
        }

        tag[0] ^= 0x01;
        match self.open(&ciphertext, &tag, &key, &nonce) {
            Err(CryptoError::AuthenticationFailure) => Ok(()),
            _ => Err(CryptoError::Seal("tampered tag was accepted".into())),
        }
    }

    fn cipher(key: &DerivedKey) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(key.as_bytes().into())
    }
}

impl CipherBackend for NativeBackend {
    fn algorithm(&self) -> Algorithm {
        Algorithm::XChaCha20Poly1305
    }

    fn generate_nonce(&self) -> Vec<u8> {
        XChaCha20Poly1305::generate_nonce(&mut OsRng).to_vec()
    }

    fn seal(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        nonce: &[u8],
    ) -> CryptoResult<(Vec<u8>, [u8; TAG_SIZE])> {
        check_nonce(self.algorithm(), nonce)?;
        let nonce = XNonce::from_slice(nonce);

        let mut buffer = plaintext.to_vec();
        let tag = Self::cipher(key)
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|e| CryptoError::Seal(format!("XChaCha20-Poly1305: {e}")))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);
        Ok((buffer, tag_bytes))
    }

    fn open(
        &self,
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
        key: &DerivedKey,
        nonce: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        check_nonce(self.algorithm(), nonce)?;
        let nonce = XNonce::from_slice(nonce);

        let mut buffer = ciphertext.to_vec();
        if Self::cipher(key)
            .decrypt_in_place_detached(nonce, b"", &mut buffer, Tag::from_slice(tag))
            .is_err()
        {
            buffer.zeroize();
            return Err(CryptoError::AuthenticationFailure);
        }
        Ok(buffer)
    }

    fn hash(&self, data: &[u8]) -> [u8; HASH_SIZE] {
        *blake3::hash(data).as_bytes()
    }

    fn keyed_hash(&self, data: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; HASH_SIZE]> {
        Ok(*blake3::keyed_hash(key, data).as_bytes())
    }

    /// BLAKE3 `derive_key` mode with `context` as the context string.
    /// The salt is length-prefixed so `(salt, secret)` boundaries are unambiguous.
    fn derive_key(&self, secret: &[u8], salt: &[u8], context: &str) -> CryptoResult<DerivedKey> {
        check_context(context)?;
        let mut hasher = blake3::Hasher::new_derive_key(context);
        hasher.update(&(salt.len() as u64).to_be_bytes());
        hasher.update(salt);
        hasher.update(secret);
        Ok(DerivedKey::from_bytes(*hasher.finalize().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DerivedKey {
        DerivedKey::from_bytes([0x42u8; KEY_SIZE])
    }

    #[test]
    fn test_self_test_passes() {
        NativeBackend.self_test().unwrap();
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let backend = NativeBackend;
        let nonce = backend.generate_nonce();
        let plaintext = b"hello, encrypted world!";

        let (ciphertext, tag) = backend.seal(plaintext, &key(), &nonce).unwrap();
        let opened = backend.open(&ciphertext, &tag, &key(), &nonce).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_ciphertext_same_length_as_plaintext() {
        let backend = NativeBackend;
        let nonce = backend.generate_nonce();
        let plaintext = vec![0u8; 1000];

        let (ciphertext, _) = backend.seal(&plaintext, &key(), &nonce).unwrap();
        assert_eq!(ciphertext.len(), 1000);
    }

    #[test]
    fn test_nonce_is_24_bytes() {
        assert_eq!(NativeBackend.generate_nonce().len(), 24);
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        let result = NativeBackend.seal(b"data", &key(), &[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn test_open_wrong_key() {
        let backend = NativeBackend;
        let nonce = backend.generate_nonce();
        let (ciphertext, tag) = backend.seal(b"secret data", &key(), &nonce).unwrap();

        let other = DerivedKey::from_bytes([0x43u8; KEY_SIZE]);
        let result = backend.open(&ciphertext, &tag, &other, &nonce);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let backend = NativeBackend;
        let nonce = backend.generate_nonce();
        let (mut ciphertext, tag) = backend.seal(b"secret data", &key(), &nonce).unwrap();
        ciphertext[3] ^= 0x80;

        let result = backend.open(&ciphertext, &tag, &key(), &nonce);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn test_hash_matches_blake3() {
        assert_eq!(
            NativeBackend.hash(b"Test data"),
            *blake3::hash(b"Test data").as_bytes()
        );
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let a = NativeBackend.keyed_hash(b"data", &[1u8; KEY_SIZE]).unwrap();
        let b = NativeBackend.keyed_hash(b"data", &[2u8; KEY_SIZE]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_domain_separation() {
        let a = NativeBackend.derive_key(b"secret", b"salt", "file-encryption").unwrap();
        let b = NativeBackend.derive_key(b"secret", b"salt", "company-encryption").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_key_salt_boundary() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = NativeBackend.derive_key(b"c", b"ab", "ctx").unwrap();
        let b = NativeBackend.derive_key(b"bc", b"a", "ctx").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
