//! docseal-crypto: per-tenant encryption of documents at rest
//!
//! Two interchangeable AEAD backends sit behind [`CipherBackend`]:
//! the native backend (XChaCha20-Poly1305 + BLAKE3) and the portable
//! backend (AES-256-GCM + SHA-256/HMAC/PBKDF2). One is picked per process by
//! [`select_backend`] and handed to [`FileEncryptionService`].
//!
//! Key hierarchy:
//! ```text
//! Master secret (operator supplied, >= 32 bytes, never persisted)
//!   └── Tenant key = KDF(master ":" tenant, "company:" tenant ":salt", "company-encryption")
//!       └── File key = KDF(tenant key, random 64-byte salt, "file-encryption")
//!           └── AEAD seal/open, tag detached into EncryptionMetadata
//! ```
//!
//! Nothing here persists state. Callers store the ciphertext together with the
//! [`EncryptionMetadata`] returned by [`FileEncryptionService::encrypt`].

pub mod backend;
pub mod error;
pub mod keys;
#[cfg(feature = "native")]
pub mod native;
pub mod portable;
pub mod service;

pub use backend::{
    native_available, select_backend, Algorithm, BackendChoice, CipherBackend, SelectedBackend,
    FILE_CONTEXT, FINGERPRINT_CONTEXT, TENANT_CONTEXT,
};
pub use error::{CryptoError, CryptoResult};
pub use keys::{
    derive_file_key, derive_tenant_key, generate_master_key, generate_salt, DerivedKey,
    MasterSecret,
};
#[cfg(feature = "native")]
pub use native::NativeBackend;
pub use portable::{KdfParams, PortableBackend};
pub use service::{EncryptedFile, EncryptionMetadata, FileEncryptionService};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the detached authentication tag (both ciphers)
pub const TAG_SIZE: usize = 16;

/// Size of the random per-file KDF salt
pub const SALT_SIZE: usize = 64;

/// Digest size of `hash` and `keyed_hash`
pub const HASH_SIZE: usize = 32;

/// Minimum accepted length of the master secret in bytes
pub const MIN_MASTER_SECRET_LEN: usize = 32;
