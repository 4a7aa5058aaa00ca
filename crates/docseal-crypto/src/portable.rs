//! Portable backend: AES-256-GCM, SHA-256, HMAC-SHA256, PBKDF2-HMAC-SHA256
//!
//! AES-GCM runs with a 128-bit IV so stored metadata keeps the 16-byte
//! `encryptionIv` shape. The KDF context label is length-prefixed into the
//! PBKDF2 salt, which gives the portable KDF the same domain separation as
//! BLAKE3's `derive_key` mode.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::backend::{check_context, check_nonce, Algorithm, CipherBackend};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::DerivedKey;
use crate::{HASH_SIZE, KEY_SIZE, TAG_SIZE};

/// AES-256-GCM with a 16-byte nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// PBKDF2 parameters for the portable KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 iterations (default: 100 000)
    pub pbkdf2_iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortableBackend {
    params: KdfParams,
}

impl PortableBackend {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    fn cipher(key: &DerivedKey) -> Aes256Gcm16 {
        Aes256Gcm16::new(key.as_bytes().into())
    }
}

impl CipherBackend for PortableBackend {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    fn generate_nonce(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; Algorithm::Aes256Gcm.nonce_len()];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn seal(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        nonce: &[u8],
    ) -> CryptoResult<(Vec<u8>, [u8; TAG_SIZE])> {
        check_nonce(self.algorithm(), nonce)?;
        let nonce = Nonce::<U16>::from_slice(nonce);

        let mut buffer = plaintext.to_vec();
        let tag = Self::cipher(key)
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|e| CryptoError::Seal(format!("AES-256-GCM: {e}")))?;

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
        let nonce = Nonce::<U16>::from_slice(nonce);

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
        Sha256::digest(data).into()
    }

    fn keyed_hash(&self, data: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; HASH_SIZE]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidInput(format!("HMAC key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    fn derive_key(&self, secret: &[u8], salt: &[u8], context: &str) -> CryptoResult<DerivedKey> {
        check_context(context)?;
        if self.params.pbkdf2_iterations == 0 {
            return Err(CryptoError::KeyDerivation(
                "PBKDF2 iteration count must be at least 1".into(),
            ));
        }

        let mut bound_salt = Vec::with_capacity(8 + context.len() + salt.len());
        bound_salt.extend_from_slice(&(context.len() as u64).to_be_bytes());
        bound_salt.extend_from_slice(context.as_bytes());
        bound_salt.extend_from_slice(salt);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(secret, &bound_salt, self.params.pbkdf2_iterations, key.as_mut());
        Ok(DerivedKey::from_bytes(*key))
    }
}
