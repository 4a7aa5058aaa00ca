use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the encryption subsystem.
///
/// Display strings never include key material or plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Master secret missing or too short. Raised before any data is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metadata names a cipher the active backend cannot honour.
    #[error("unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Tag verification failed: tampered data, wrong tenant, wrong key or nonce.
    #[error("authentication failed: data was tampered with or the key does not match")]
    AuthenticationFailure,

    /// Stored metadata is malformed (bad encoding or wrong field lengths).
    #[error("invalid encryption metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Seal(String),
}

impl CryptoError {
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::AuthenticationFailure)
    }
}
