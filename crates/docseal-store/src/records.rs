//! Document records and the JSON record store.
//!
//! A record points at one stored file and carries the `isEncrypted` flag plus
//! the metadata needed to decrypt it. Records are kept in memory as a
//! `BTreeMap` keyed by id and persisted as a single JSON file, flushed
//! atomically via temp file + fsync + rename.
//!
//! `stage_encryption` and `mark_encrypted` flush before returning, so a flag
//! (or a staged journal entry) is durable before the next file is touched.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use docseal_core::{DocsealError, DocsealResult};

use crate::metadata::{StagedEncryption, StoredMetadata};

/// One stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    /// Display name
    pub name: String,
    /// Path relative to the upload directory
    pub path: String,
    pub tenant_id: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Unix timestamp (milliseconds) of creation
    pub created_at: u64,
    #[serde(default)]
    pub is_encrypted: bool,
    /// Metadata of the ciphertext currently on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<StoredMetadata>,
    /// Journal entry written ahead of a migration overwrite. Present only
    /// while a migration of this record is in flight or was interrupted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_encryption: Option<StagedEncryption>,
}

impl DocumentRecord {
    /// A new plaintext record created now.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        tenant_id: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            tenant_id: tenant_id.into(),
            size,
            created_at: now_millis(),
            is_encrypted: false,
            encryption: None,
            pending_encryption: None,
        }
    }
}

/// True only when the flag is set and complete, decodable metadata is present.
pub fn is_document_encrypted(record: &DocumentRecord) -> bool {
    record.is_encrypted
        && record
            .encryption
            .as_ref()
            .is_some_and(|metadata| metadata.decode().is_ok())
}

/// Record totals for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub total: usize,
    pub encrypted: usize,
    pub unencrypted: usize,
    /// Unencrypted records carrying a staged migration entry
    pub pending: usize,
}

/// Storage for document records.
pub trait RecordStore {
    /// All records with `isEncrypted = false`, oldest first (ties by id).
    fn unencrypted(&self) -> Vec<DocumentRecord>;
    fn get(&self, id: &str) -> Option<&DocumentRecord>;
    /// Insert or replace a record.
    fn insert(&mut self, record: DocumentRecord) -> DocsealResult<()>;
    /// Durably record the journal entry for an overwrite about to happen,
    /// leaving the flag false.
    fn stage_encryption(&mut self, id: &str, staged: StagedEncryption) -> DocsealResult<()>;
    /// Durably set the flag and metadata, clearing any staged entry.
    fn mark_encrypted(&mut self, id: &str, metadata: StoredMetadata) -> DocsealResult<()>;
    fn counts(&self) -> RecordCounts;
    /// Persist pending changes.
    fn flush(&mut self) -> DocsealResult<()>;
}

/// Record store persisted to a single JSON file
pub struct JsonRecordStore {
    path: PathBuf,
    records: BTreeMap<String, DocumentRecord>,
    dirty: bool,
}

impl JsonRecordStore {
    /// Load or create a store at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> DocsealResult<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading record store: {}", path.display()))?;
            let list: Vec<DocumentRecord> = serde_json::from_str(&content)
                .map_err(|e| DocsealError::Records(format!("parsing {}: {e}", path.display())))?;
            list.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_mut(&mut self, id: &str) -> DocsealResult<&mut DocumentRecord> {
        self.records
            .get_mut(id)
            .ok_or_else(|| DocsealError::RecordNotFound(id.to_string()))
    }

    fn write_atomic(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating record dir: {}", parent.display()))?;
        }

        let list: Vec<&DocumentRecord> = self.records.values().collect();
        let json = serde_json::to_vec_pretty(&list).context("serializing record store")?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating record store temp: {}", tmp_path.display()))?;
        file.write_all(&json)
            .with_context(|| format!("writing record store temp: {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing record store temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming record store: {}", self.path.display()))?;
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    fn unencrypted(&self) -> Vec<DocumentRecord> {
        let mut list: Vec<DocumentRecord> = self
            .records
            .values()
            .filter(|r| !r.is_encrypted)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.records.get(id)
    }

    fn insert(&mut self, record: DocumentRecord) -> DocsealResult<()> {
        if record.id.is_empty() {
            return Err(DocsealError::Records("record id must not be empty".into()));
        }
        self.records.insert(record.id.clone(), record);
        self.dirty = true;
        Ok(())
    }

    fn stage_encryption(&mut self, id: &str, staged: StagedEncryption) -> DocsealResult<()> {
        let record = self.record_mut(id)?;
        record.pending_encryption = Some(staged);
        self.dirty = true;
        self.flush()
    }

    fn mark_encrypted(&mut self, id: &str, metadata: StoredMetadata) -> DocsealResult<()> {
        let record = self.record_mut(id)?;
        record.is_encrypted = true;
        record.encryption = Some(metadata);
        record.pending_encryption = None;
        self.dirty = true;
        self.flush()
    }

    fn counts(&self) -> RecordCounts {
        let mut counts = RecordCounts {
            total: self.records.len(),
            ..RecordCounts::default()
        };
        for record in self.records.values() {
            if record.is_encrypted {
                counts.encrypted += 1;
            } else {
                counts.unencrypted += 1;
                if record.pending_encryption.is_some() {
                    counts.pending += 1;
                }
            }
        }
        counts
    }

    fn flush(&mut self) -> DocsealResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.write_atomic()?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for JsonRecordStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush record store on drop: {e}");
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
