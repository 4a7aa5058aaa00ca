//! docseal-store: the persistence edge around docseal-crypto
//!
//! - `metadata`: base64 text-safe form of `EncryptionMetadata`
//! - `records`: document records and the JSON record store
//! - `operator`: OpenDAL operator over the upload directory
//! - `migrate`: one-time, re-runnable encryption of plaintext documents

pub mod metadata;
pub mod migrate;
pub mod operator;
pub mod records;

pub use metadata::{MetadataSidecar, StagedEncryption, StoredMetadata};
pub use migrate::{migrate, MigrationOptions, MigrationReport, ProgressFn, RecordOutcome, Stage};
pub use operator::build_fs_operator;
pub use records::{is_document_encrypted, DocumentRecord, JsonRecordStore, RecordCounts, RecordStore};
