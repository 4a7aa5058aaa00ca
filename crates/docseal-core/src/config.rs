use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DocsealError, DocsealResult};

/// Top-level configuration (loaded from docseal.toml)
///
/// The master secret is deliberately not a config field: only the name of
/// the environment variable that carries it lives here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsealConfig {
    pub crypto: CryptoConfig,
    pub storage: StorageConfig,
    pub records: RecordsConfig,
    pub migration: MigrationConfig,
    pub log: LogConfig,
}

impl DocsealConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> DocsealResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DocsealError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Prefer the native XChaCha20-Poly1305/BLAKE3 backend (default: false)
    pub prefer_native: bool,
    /// Environment variable holding the master secret
    pub master_key_env: String,
    /// PBKDF2 iterations for the portable backend (default: 100000)
    pub pbkdf2_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            prefer_native: false,
            master_key_env: "DOCSEAL_ENCRYPTION_KEY".into(),
            pbkdf2_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding document files; record paths are relative to it
    pub upload_dir: PathBuf,
    /// Scratch directory for atomic overwrites (temp file + rename).
    /// Must be on the same filesystem as `upload_dir`. Defaults to
    /// `.docseal-tmp` under `upload_dir`.
    pub atomic_write_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Scratch directory writes actually go through.
    pub fn scratch_dir(&self) -> PathBuf {
        self.atomic_write_dir
            .clone()
            .unwrap_or_else(|| self.upload_dir.join(".docseal-tmp"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            atomic_write_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// JSON document record store
    pub path: PathBuf,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./docseal-records.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Re-read each written file and compare checksums before setting the flag
    pub verify_writes: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            verify_writes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
