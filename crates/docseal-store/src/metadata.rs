//! Text-safe persisted form of encryption metadata
//!
//! Field names match the document columns collaborators already store:
//! `encryptionIv`, `encryptionAuthTag`, `encryptionSalt`, `encryptionAlgorithm`.
//! All byte fields are standard base64.
//!
//! [`StagedEncryption`] is the migration journal entry: the same fields plus
//! `plaintextFingerprint`, a tenant-keyed MAC of the plaintext the staged
//! ciphertext replaces.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Serialize};

use docseal_crypto::{
    Algorithm, CryptoError, CryptoResult, EncryptionMetadata, HASH_SIZE, SALT_SIZE, TAG_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMetadata {
    pub encryption_iv: String,
    pub encryption_auth_tag: String,
    pub encryption_salt: String,
    pub encryption_algorithm: String,
}

impl StoredMetadata {
    pub fn encode(metadata: &EncryptionMetadata) -> Self {
        Self {
            encryption_iv: B64.encode(&metadata.nonce),
            encryption_auth_tag: B64.encode(metadata.auth_tag),
            encryption_salt: B64.encode(metadata.salt),
            encryption_algorithm: metadata.algorithm.name().to_string(),
        }
    }

    /// Parse back into raw metadata.
    ///
    /// An unknown algorithm name is `UnsupportedAlgorithm`; bad base64 or
    /// wrong field lengths are `InvalidMetadata`.
    pub fn decode(&self) -> CryptoResult<EncryptionMetadata> {
        let algorithm: Algorithm = self.encryption_algorithm.parse()?;
        let nonce = decode_field("encryptionIv", &self.encryption_iv)?;
        let auth_tag: [u8; TAG_SIZE] =
            fixed_field("encryptionAuthTag", &self.encryption_auth_tag)?;
        let salt: [u8; SALT_SIZE] = fixed_field("encryptionSalt", &self.encryption_salt)?;

        let metadata = EncryptionMetadata {
            nonce,
            auth_tag,
            salt,
            algorithm,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Written before a migration overwrites a file, cleared when the flag is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEncryption {
    #[serde(flatten)]
    pub metadata: StoredMetadata,
    pub plaintext_fingerprint: String,
}

impl StagedEncryption {
    pub fn new(metadata: &EncryptionMetadata, fingerprint: &[u8; HASH_SIZE]) -> Self {
        Self {
            metadata: StoredMetadata::encode(metadata),
            plaintext_fingerprint: B64.encode(fingerprint),
        }
    }

    pub fn fingerprint(&self) -> CryptoResult<[u8; HASH_SIZE]> {
        fixed_field("plaintextFingerprint", &self.plaintext_fingerprint)
    }
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    B64.decode(value)
        .map_err(|e| CryptoError::InvalidMetadata(format!("{name} is not valid base64: {e}")))
}

fn fixed_field<const N: usize>(name: &str, value: &str) -> CryptoResult<[u8; N]> {
    let bytes = decode_field(name, value)?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidMetadata(format!("{name} must be {N} bytes, got {}", bytes.len()))
    })
}

/// Metadata file written next to a standalone encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSidecar {
    pub is_encrypted: bool,
    pub tenant_id: String,
    #[serde(flatten)]
    pub metadata: StoredMetadata,
}

impl MetadataSidecar {
    pub fn new(tenant_id: &str, metadata: &EncryptionMetadata) -> Self {
        Self {
            is_encrypted: true,
            tenant_id: tenant_id.to_string(),
            metadata: StoredMetadata::encode(metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptionMetadata {
        EncryptionMetadata {
            nonce: vec![3u8; 16],
            auth_tag: [4u8; TAG_SIZE],
            salt: [5u8; SALT_SIZE],
            algorithm: Algorithm::Aes256Gcm,
        }
    }

    #[test]
    fn test_encode_decode() {
        let stored = StoredMetadata::encode(&sample());
        assert_eq!(stored.encryption_algorithm, "aes-256-gcm");
        assert_eq!(stored.decode().unwrap(), sample());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(StoredMetadata::encode(&sample())).unwrap();
        for field in [
            "encryptionIv",
            "encryptionAuthTag",
            "encryptionSalt",
            "encryptionAlgorithm",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let mut stored = StoredMetadata::encode(&sample());
        stored.encryption_algorithm = "rot13".into();
        assert!(matches!(
            stored.decode(),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_bad_base64() {
        let mut stored = StoredMetadata::encode(&sample());
        stored.encryption_salt = "not base64!!".into();
        assert!(matches!(stored.decode(), Err(CryptoError::InvalidMetadata(_))));
    }

    #[test]
    fn test_short_tag() {
        let mut stored = StoredMetadata::encode(&sample());
        stored.encryption_auth_tag = B64.encode([0u8; 8]);
        assert!(matches!(stored.decode(), Err(CryptoError::InvalidMetadata(_))));
    }

    #[test]
    fn test_nonce_length_checked_against_algorithm() {
        let mut stored = StoredMetadata::encode(&sample());
        stored.encryption_algorithm = "xchacha20-poly1305".into();
        assert!(matches!(stored.decode(), Err(CryptoError::InvalidMetadata(_))));
    }

    #[test]
    fn test_sidecar_is_flat() {
        let sidecar = MetadataSidecar::new("acme", &sample());
        let json = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(json["isEncrypted"], true);
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["encryptionAlgorithm"], "aes-256-gcm");

        let parsed: MetadataSidecar = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, sidecar);
    }

    #[test]
    fn test_staged_entry_is_flat() {
        let staged = StagedEncryption::new(&sample(), &[6u8; HASH_SIZE]);
        let json = serde_json::to_value(&staged).unwrap();
        assert_eq!(json["encryptionAlgorithm"], "aes-256-gcm");
        assert_eq!(json["plaintextFingerprint"], B64.encode([6u8; HASH_SIZE]));

        let parsed: StagedEncryption = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.metadata.decode().unwrap(), sample());
        assert_eq!(parsed.fingerprint().unwrap(), [6u8; HASH_SIZE]);
    }

    #[test]
    fn test_staged_fingerprint_length_checked() {
        let mut staged = StagedEncryption::new(&sample(), &[6u8; HASH_SIZE]);
        staged.plaintext_fingerprint = B64.encode([6u8; 16]);
        assert!(matches!(
            staged.fingerprint(),
            Err(CryptoError::InvalidMetadata(_))
        ));
    }
}
