//! Cipher backend contract, algorithm identifiers, and per-process backend selection
//!
//! Selection happens once at startup. The native probe runs at most once per
//! process (memoized behind a `OnceLock`); if it fails the process stays on
//! the portable backend for its whole lifetime.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use rand::RngCore;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::DerivedKey;
use crate::portable::{KdfParams, PortableBackend};
use crate::{HASH_SIZE, KEY_SIZE, TAG_SIZE};

/// KDF context label for tenant-level keys
pub const TENANT_CONTEXT: &str = "company-encryption";

/// KDF context label for file-level keys
pub const FILE_CONTEXT: &str = "file-encryption";

/// KDF context label for the key that fingerprints plaintext in the migration journal
pub const FINGERPRINT_CONTEXT: &str = "file-fingerprint";

/// AEAD cipher that produced a ciphertext. Persisted by name in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// AES-256-GCM with a 128-bit IV (portable backend)
    Aes256Gcm,
    /// XChaCha20-Poly1305 with a 192-bit nonce (native backend)
    XChaCha20Poly1305,
}

impl Algorithm {
    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }

    pub const fn nonce_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm => 16,
            Algorithm::XChaCha20Poly1305 => 24,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "xchacha20-poly1305" => Ok(Algorithm::XChaCha20Poly1305),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Low-level primitive provider. Implementations are stateless and re-entrant.
pub trait CipherBackend: Send + Sync + fmt::Debug {
    /// The AEAD this backend seals with.
    fn algorithm(&self) -> Algorithm;

    /// A fresh random 256-bit key.
    fn generate_key(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut());
        key
    }

    /// A fresh random nonce of `algorithm().nonce_len()` bytes.
    fn generate_nonce(&self) -> Vec<u8>;

    /// AEAD-encrypt `plaintext`. The ciphertext has the same length as the
    /// plaintext; the tag is returned separately.
    fn seal(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        nonce: &[u8],
    ) -> CryptoResult<(Vec<u8>, [u8; TAG_SIZE])>;

    /// Verify `tag` and decrypt. Returns `AuthenticationFailure` without any
    /// plaintext if verification fails.
    fn open(
        &self,
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
        key: &DerivedKey,
        nonce: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    fn hash(&self, data: &[u8]) -> [u8; HASH_SIZE];

    fn keyed_hash(&self, data: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<[u8; HASH_SIZE]>;

    /// Derive a 256-bit key. `context` separates use-sites: the same
    /// `(secret, salt)` under two labels never yields the same key.
    fn derive_key(&self, secret: &[u8], salt: &[u8], context: &str) -> CryptoResult<DerivedKey>;
}

/// Reject nonces of the wrong length before they reach a cipher constructor.
pub(crate) fn check_nonce(algorithm: Algorithm, nonce: &[u8]) -> CryptoResult<()> {
    if nonce.len() != algorithm.nonce_len() {
        return Err(CryptoError::InvalidInput(format!(
            "{algorithm} nonce must be {} bytes, got {}",
            algorithm.nonce_len(),
            nonce.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_context(context: &str) -> CryptoResult<()> {
    if context.is_empty() {
        return Err(CryptoError::InvalidInput(
            "key derivation context label must not be empty".into(),
        ));
    }
    Ok(())
}

/// Why the process ended up on its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    /// Native backend requested and the probe passed
    Native,
    /// Native backend not requested
    Portable,
    /// Native backend requested but unavailable
    PortableFallback { reason: String },
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Native => f.write_str("native"),
            BackendChoice::Portable => f.write_str("portable"),
            BackendChoice::PortableFallback { reason } => {
                write!(f, "portable (native unavailable: {reason})")
            }
        }
    }
}

/// The backend a process runs with. Built once and passed into the service.
#[derive(Debug, Clone)]
pub struct SelectedBackend {
    pub backend: Arc<dyn CipherBackend>,
    pub choice: BackendChoice,
}

impl SelectedBackend {
    pub fn algorithm(&self) -> Algorithm {
        self.backend.algorithm()
    }
}

static NATIVE_PROBE: OnceLock<Result<(), String>> = OnceLock::new();

/// Whether the native backend is usable in this process.
///
/// The first call runs the probe; every later call returns the memoized
/// result. A failed probe is logged exactly once.
pub fn native_available() -> Result<(), &'static str> {
    NATIVE_PROBE
        .get_or_init(|| {
            let result = probe_native();
            if let Err(reason) = &result {
                warn!(reason = %reason, "native crypto backend unavailable, using portable backend");
            }
            result
        })
        .as_ref()
        .map(|_| ())
        .map_err(String::as_str)
}

#[cfg(feature = "native")]
fn probe_native() -> Result<(), String> {
    crate::native::NativeBackend
        .self_test()
        .map_err(|e| format!("self test failed: {e}"))
}

#[cfg(not(feature = "native"))]
fn probe_native() -> Result<(), String> {
    Err("built without the `native` feature".into())
}

/// Pick the backend for this process.
///
/// `prefer_native` is the operator's feature flag. The portable backend is
/// used when the flag is off or the native probe fails.
pub fn select_backend(prefer_native: bool, params: KdfParams) -> SelectedBackend {
    let portable = || Arc::new(PortableBackend::new(params)) as Arc<dyn CipherBackend>;

    let selected = if !prefer_native {
        SelectedBackend {
            backend: portable(),
            choice: BackendChoice::Portable,
        }
    } else {
        match native_available() {
            Ok(()) => SelectedBackend {
                backend: native_backend(),
                choice: BackendChoice::Native,
            },
            Err(reason) => SelectedBackend {
                backend: portable(),
                choice: BackendChoice::PortableFallback {
                    reason: reason.to_string(),
                },
            },
        }
    };

    info!(
        algorithm = %selected.algorithm(),
        choice = %selected.choice,
        "crypto backend selected"
    );
    selected
}

#[cfg(feature = "native")]
fn native_backend() -> Arc<dyn CipherBackend> {
    Arc::new(crate::native::NativeBackend)
}

// Unreachable in practice: the probe always fails without the feature.
#[cfg(not(feature = "native"))]
fn native_backend() -> Arc<dyn CipherBackend> {
    Arc::new(PortableBackend::new(KdfParams::default()))
}
