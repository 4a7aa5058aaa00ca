//! File encryption service: the contract collaborators call with a buffer and a tenant id
//!
//! The service persists nothing. Callers store the ciphertext and its
//! [`EncryptionMetadata`] and pass both back on decrypt.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Algorithm, CipherBackend, SelectedBackend, FINGERPRINT_CONTEXT};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{derive_file_key, derive_tenant_key, generate_salt, MasterSecret};
use crate::{HASH_SIZE, KEY_SIZE, SALT_SIZE, TAG_SIZE};

/// Everything besides the key needed to decrypt a ciphertext.
/// Immutable once written alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMetadata {
    /// AEAD nonce / IV (16 bytes for AES-256-GCM, 24 for XChaCha20-Poly1305)
    pub nonce: Vec<u8>,
    /// Detached authentication tag
    pub auth_tag: [u8; TAG_SIZE],
    /// Random per-file KDF salt
    pub salt: [u8; SALT_SIZE],
    /// Cipher that produced the ciphertext
    pub algorithm: Algorithm,
}

impl EncryptionMetadata {
    /// Check field lengths against the named algorithm.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.nonce.len() != self.algorithm.nonce_len() {
            return Err(CryptoError::InvalidMetadata(format!(
                "{} nonce must be {} bytes, got {}",
                self.algorithm,
                self.algorithm.nonce_len(),
                self.nonce.len()
            )));
        }
        Ok(())
    }
}

/// Ciphertext (same length as the plaintext) plus its metadata.
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    pub ciphertext: Vec<u8>,
    pub metadata: EncryptionMetadata,
}

/// Per-tenant document encryption over a single, fixed backend.
#[derive(Debug, Clone)]
pub struct FileEncryptionService {
    backend: Arc<dyn CipherBackend>,
    master: Arc<MasterSecret>,
}

impl FileEncryptionService {
    pub fn new(backend: Arc<dyn CipherBackend>, master: MasterSecret) -> Self {
        Self {
            backend,
            master: Arc::new(master),
        }
    }

    pub fn with_selected(selected: &SelectedBackend, master: MasterSecret) -> Self {
        Self::new(Arc::clone(&selected.backend), master)
    }

    /// Algorithm this service seals with and accepts on decrypt.
    pub fn algorithm(&self) -> Algorithm {
        self.backend.algorithm()
    }

    pub fn backend(&self) -> &Arc<dyn CipherBackend> {
        &self.backend
    }

    /// Encrypt `plaintext` for `tenant_id` under a fresh salt and nonce.
    pub fn encrypt(&self, plaintext: &[u8], tenant_id: &str) -> CryptoResult<EncryptedFile> {
        self.master.validate()?;

        let salt = generate_salt();
        let tenant_key = derive_tenant_key(self.backend.as_ref(), &self.master, tenant_id)?;
        let file_key = derive_file_key(self.backend.as_ref(), &tenant_key, &salt)?;
        let nonce = self.backend.generate_nonce();

        let (ciphertext, auth_tag) = self.backend.seal(plaintext, &file_key, &nonce)?;

        debug!(
            tenant = %tenant_id,
            bytes = plaintext.len(),
            algorithm = %self.algorithm(),
            "encrypted document"
        );

        Ok(EncryptedFile {
            ciphertext,
            metadata: EncryptionMetadata {
                nonce,
                auth_tag,
                salt,
                algorithm: self.algorithm(),
            },
        })
    }

    /// Decrypt `ciphertext` for `tenant_id` using exactly the metadata
    /// produced at encryption time.
    ///
    /// A metadata algorithm other than the active backend's is rejected with
    /// `UnsupportedAlgorithm`; no cross-algorithm attempt is made.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        tenant_id: &str,
        metadata: &EncryptionMetadata,
    ) -> CryptoResult<Vec<u8>> {
        if metadata.algorithm != self.algorithm() {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "{} (active backend uses {})",
                metadata.algorithm,
                self.algorithm()
            )));
        }
        metadata.validate()?;

        let tenant_key = derive_tenant_key(self.backend.as_ref(), &self.master, tenant_id)?;
        let file_key = derive_file_key(self.backend.as_ref(), &tenant_key, &metadata.salt)?;

        match self
            .backend
            .open(ciphertext, &metadata.auth_tag, &file_key, &metadata.nonce)
        {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                if e.is_authentication_failure() {
                    warn!(tenant = %tenant_id, bytes = ciphertext.len(), "document failed authentication");
                }
                Err(e)
            }
        }
    }

    /// Backend digest of `data` (BLAKE3 or SHA-256).
    pub fn checksum(&self, data: &[u8]) -> [u8; HASH_SIZE] {
        self.backend.hash(data)
    }

    /// Backend MAC of `data` (keyed BLAKE3 or HMAC-SHA256).
    pub fn keyed_checksum(&self, data: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; HASH_SIZE]> {
        self.backend.keyed_hash(data, key)
    }

    /// Tenant-keyed MAC of `data`, bound to a file salt.
    ///
    /// Lets a caller recognise the exact plaintext later without storing an
    /// unkeyed digest of it. The key is derived under its own context label,
    /// never the file encryption key.
    pub fn fingerprint(
        &self,
        data: &[u8],
        tenant_id: &str,
        salt: &[u8; SALT_SIZE],
    ) -> CryptoResult<[u8; HASH_SIZE]> {
        let tenant_key = derive_tenant_key(self.backend.as_ref(), &self.master, tenant_id)?;
        let key = self
            .backend
            .derive_key(tenant_key.as_bytes(), salt, FINGERPRINT_CONTEXT)?;
        self.backend.keyed_hash(data, key.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::keys::DerivedKey;
    use crate::portable::{KdfParams, PortableBackend};

    fn master() -> MasterSecret {
        MasterSecret::new(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    fn service() -> FileEncryptionService {
        let backend = PortableBackend::new(KdfParams {
            pbkdf2_iterations: 1_000,
        });
        FileEncryptionService::new(Arc::new(backend), master())
    }

    /// Records every KDF call; seals by copying with an all-zero tag.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        derivations: Mutex<Vec<(Vec<u8>, String)>>,
    }

    impl CipherBackend for RecordingBackend {
        fn algorithm(&self) -> Algorithm {
            Algorithm::Aes256Gcm
        }

        fn generate_nonce(&self) -> Vec<u8> {
            vec![0u8; 16]
        }

        fn seal(
            &self,
            plaintext: &[u8],
            _key: &DerivedKey,
            _nonce: &[u8],
        ) -> CryptoResult<(Vec<u8>, [u8; TAG_SIZE])> {
            Ok((plaintext.to_vec(), [0u8; TAG_SIZE]))
        }

        fn open(
            &self,
            ciphertext: &[u8],
            _tag: &[u8; TAG_SIZE],
            _key: &DerivedKey,
            _nonce: &[u8],
        ) -> CryptoResult<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }

        fn hash(&self, _data: &[u8]) -> [u8; HASH_SIZE] {
            [0u8; HASH_SIZE]
        }

        fn keyed_hash(&self, _data: &[u8], _key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; HASH_SIZE]> {
            Ok([0u8; HASH_SIZE])
        }

        fn derive_key(&self, _secret: &[u8], salt: &[u8], context: &str) -> CryptoResult<DerivedKey> {
            self.derivations
                .lock()
                .unwrap()
                .push((salt.to_vec(), context.to_string()));
            Ok(DerivedKey::from_bytes([1u8; KEY_SIZE]))
        }
    }

    #[test]
    fn test_roundtrip() {
        let service = service();
        let encrypted = service.encrypt(b"quarterly report", "acme").unwrap();
        let plaintext = service
            .decrypt(&encrypted.ciphertext, "acme", &encrypted.metadata)
            .unwrap();
        assert_eq!(plaintext, b"quarterly report");
    }

    #[test]
    fn test_metadata_shape() {
        let encrypted = service().encrypt(b"payload", "acme").unwrap();
        assert_eq!(encrypted.metadata.nonce.len(), 16);
        assert_eq!(encrypted.metadata.algorithm, Algorithm::Aes256Gcm);
        assert_eq!(encrypted.ciphertext.len(), b"payload".len());
    }

    #[test]
    fn test_wrong_tenant_fails_authentication() {
        let service = service();
        let encrypted = service.encrypt(b"payload", "acme").unwrap();
        let result = service.decrypt(&encrypted.ciphertext, "globex", &encrypted.metadata);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let service = service();
        let encrypted = service.encrypt(b"payload", "acme").unwrap();

        let mut metadata = encrypted.metadata.clone();
        metadata.algorithm = Algorithm::XChaCha20Poly1305;
        let result = service.decrypt(&encrypted.ciphertext, "acme", &metadata);
        assert!(matches!(result, Err(CryptoError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_truncated_nonce_rejected() {
        let service = service();
        let encrypted = service.encrypt(b"payload", "acme").unwrap();

        let mut metadata = encrypted.metadata.clone();
        metadata.nonce.truncate(12);
        let result = service.decrypt(&encrypted.ciphertext, "acme", &metadata);
        assert!(matches!(result, Err(CryptoError::InvalidMetadata(_))));
    }

    #[test]
    fn test_unconfigured_master_secret() {
        let backend = Arc::new(PortableBackend::default());
        let service = FileEncryptionService::new(backend, MasterSecret::new(Vec::new()));
        let result = service.encrypt(b"payload", "acme");
        assert!(matches!(result, Err(CryptoError::Configuration(_))));
    }

    #[test]
    fn test_hierarchy_order_and_labels() {
        let backend = Arc::new(RecordingBackend::default());
        let service = FileEncryptionService::new(backend.clone(), master());

        let encrypted = service.encrypt(b"payload", "acme").unwrap();

        let calls = backend.derivations.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, b"company:acme:salt".to_vec());
        assert_eq!(calls[0].1, "company-encryption");
        assert_eq!(calls[1].0, encrypted.metadata.salt.to_vec());
        assert_eq!(calls[1].1, "file-encryption");
    }

    #[test]
    fn test_checksums_use_backend() {
        let service = service();
        assert_eq!(service.checksum(b"abc"), service.backend().hash(b"abc"));
        assert_ne!(
            service.keyed_checksum(b"abc", &[1u8; KEY_SIZE]).unwrap(),
            service.checksum(b"abc")
        );
    }

    #[test]
    fn test_fingerprint_is_keyed_and_salt_bound() {
        let service = service();
        let salt = [3u8; SALT_SIZE];

        let a = service.fingerprint(b"contract", "acme", &salt).unwrap();
        assert_eq!(a, service.fingerprint(b"contract", "acme", &salt).unwrap());
        assert_ne!(a, service.checksum(b"contract"));
        assert_ne!(a, service.fingerprint(b"contract", "globex", &salt).unwrap());
        assert_ne!(a, service.fingerprint(b"contract", "acme", &[4u8; SALT_SIZE]).unwrap());
        assert_ne!(a, service.fingerprint(b"contrack", "acme", &salt).unwrap());
    }

    #[test]
    fn test_fingerprint_uses_its_own_context() {
        let backend = Arc::new(RecordingBackend::default());
        let service = FileEncryptionService::new(backend.clone(), master());

        service.fingerprint(b"payload", "acme", &[9u8; SALT_SIZE]).unwrap();

        let calls = backend.derivations.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, vec![9u8; SALT_SIZE]);
        assert_eq!(calls[1].1, "file-fingerprint");
    }
}
