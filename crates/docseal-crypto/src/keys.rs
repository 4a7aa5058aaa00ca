//! Key hierarchy: master secret → tenant key → per-file key
//!
//! Derived keys are never stored. Every encrypt/decrypt call recomputes them
//! from the master secret, the tenant id, and the per-file salt kept in
//! metadata.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use zeroize::{Zeroize, Zeroizing};

use crate::backend::{CipherBackend, FILE_CONTEXT, TENANT_CONTEXT};
use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, MIN_MASTER_SECRET_LEN, SALT_SIZE};

/// Operator-supplied master secret. Held only in memory, never logged.
pub struct MasterSecret {
    inner: SecretSlice<u8>,
}

impl MasterSecret {
    /// Wrap raw secret bytes. Length is checked by [`MasterSecret::validate`]
    /// at the start of every operation, not here.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: SecretSlice::from(bytes.into()),
        }
    }

    /// Read the secret from an environment variable.
    pub fn from_env(var: &str) -> CryptoResult<Self> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Self::new(value.into_bytes())),
            _ => Err(CryptoError::Configuration(format!(
                "{var} environment variable is not set"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The secret bytes, if the secret is long enough to use.
    pub fn validate(&self) -> CryptoResult<&[u8]> {
        let bytes = self.inner.expose_secret();
        if bytes.len() < MIN_MASTER_SECRET_LEN {
            return Err(CryptoError::Configuration(format!(
                "master secret must be at least {MIN_MASTER_SECRET_LEN} bytes (got {})",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit key produced by a backend KDF. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Deterministic tenant salt. Reproducible from the tenant id alone, so no
/// per-tenant state has to be stored.
fn tenant_salt(tenant_id: &str) -> Vec<u8> {
    format!("company:{tenant_id}:salt").into_bytes()
}

/// Derive the tenant-level key from the master secret and tenant id.
pub fn derive_tenant_key(
    backend: &dyn CipherBackend,
    master: &MasterSecret,
    tenant_id: &str,
) -> CryptoResult<DerivedKey> {
    let secret = master.validate()?;
    if tenant_id.is_empty() {
        return Err(CryptoError::InvalidInput("tenant id must not be empty".into()));
    }

    let mut material = Zeroizing::new(Vec::with_capacity(secret.len() + 1 + tenant_id.len()));
    material.extend_from_slice(secret);
    material.push(b':');
    material.extend_from_slice(tenant_id.as_bytes());

    backend.derive_key(&material, &tenant_salt(tenant_id), TENANT_CONTEXT)
}

/// Derive the per-file key from the tenant key and the file's random salt.
pub fn derive_file_key(
    backend: &dyn CipherBackend,
    tenant_key: &DerivedKey,
    salt: &[u8; SALT_SIZE],
) -> CryptoResult<DerivedKey> {
    backend.derive_key(tenant_key.as_bytes(), salt, FILE_CONTEXT)
}

/// A fresh random per-file salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a new master secret for provisioning a deployment: 32 random
/// bytes, base64-encoded.
pub fn generate_master_key() -> String {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(bytes.as_mut());
    B64.encode(bytes.as_ref())
}
