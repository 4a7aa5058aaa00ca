//! One-time encryption of documents stored before encryption was enabled
//!
//! Records are processed one at a time, oldest first:
//!   - `Reading`: load the plaintext through the operator (missing → skipped)
//!   - `Recovering`: only for records with a staged entry from an interrupted run
//!   - `Encrypting`: `FileEncryptionService::encrypt` under the record's tenant,
//!     plus a tenant-keyed fingerprint of the plaintext
//!   - `Staging`: persist metadata and fingerprint as `pendingEncryption`, flag still false
//!   - `Writing`: overwrite the file with the ciphertext
//!   - `Verifying`: re-read and compare checksums (optional)
//!   - `FlagSet`: persist `isEncrypted = true` with the metadata
//!
//! A record's flag is set only after its ciphertext write succeeded. On the
//! next run a staged entry is resolved against the file on disk:
//!   - decrypts under the staged metadata: the write finished, set the flag
//!   - matches the staged plaintext fingerprint: the write never happened,
//!     encrypt normally
//!   - neither: the write was torn, fail at `Recovering` and leave the file alone
//!
//! Two migrations must never run over the same record store at once. Nothing
//! here enforces that.

use anyhow::{Context, Result};
use opendal::Operator;
use std::fmt;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use docseal_core::config::MigrationConfig;
use docseal_crypto::{CryptoError, FileEncryptionService};

use crate::metadata::StagedEncryption;
use crate::records::{DocumentRecord, RecordStore};

/// Progress callback type (records_done, records_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Re-read each written file and compare checksums before setting the flag
    pub verify_writes: bool,
    /// List eligible records without reading or writing anything
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            verify_writes: true,
            dry_run: false,
        }
    }
}

impl From<&MigrationConfig> for MigrationOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            verify_writes: config.verify_writes,
            dry_run: false,
        }
    }
}

/// Per-record migration stage, used to report where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reading,
    Recovering,
    Encrypting,
    Staging,
    Writing,
    Verifying,
    FlagSet,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reading => "reading",
            Stage::Recovering => "recovering",
            Stage::Encrypting => "encrypting",
            Stage::Staging => "staging",
            Stage::Writing => "writing",
            Stage::Verifying => "verifying",
            Stage::FlagSet => "flag-set",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// File overwritten with ciphertext and flag set
    Encrypted,
    /// File was already ciphertext from an interrupted run; only the flag was set
    Recovered,
    /// File missing from storage
    Skipped { reason: String },
    Failed { stage: Stage, error: String },
    /// Dry run: would be migrated
    Pending,
}

#[derive(Debug, Clone)]
pub struct RecordReport {
    pub id: String,
    pub path: String,
    pub outcome: RecordOutcome,
}

/// Result of a migration run
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Records flagged unencrypted at scan time
    pub eligible: usize,
    /// Records that reached `isEncrypted = true` (includes `recovered`)
    pub succeeded: usize,
    pub recovered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<RecordReport>,
}

impl MigrationReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, record: &DocumentRecord, outcome: RecordOutcome) {
        match &outcome {
            RecordOutcome::Encrypted => self.succeeded += 1,
            RecordOutcome::Recovered => {
                self.succeeded += 1;
                self.recovered += 1;
            }
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed { .. } => self.failed += 1,
            RecordOutcome::Pending => {}
        }
        self.outcomes.push(RecordReport {
            id: record.id.clone(),
            path: record.path.clone(),
            outcome,
        });
    }
}

struct StageFailure {
    stage: Stage,
    error: String,
}

fn fail<E: fmt::Display>(stage: Stage) -> impl FnOnce(E) -> StageFailure {
    move |e| StageFailure {
        stage,
        error: e.to_string(),
    }
}

/// Encrypt every record still flagged unencrypted.
///
/// Per-record failures are isolated and reported; they never abort the run.
/// The returned error covers only failures of the run itself.
pub async fn migrate<S: RecordStore + ?Sized>(
    op: &Operator,
    store: &mut S,
    service: &FileEncryptionService,
    options: &MigrationOptions,
    progress: Option<&ProgressFn>,
) -> Result<MigrationReport> {
    let records = store.unencrypted();
    let total = records.len();
    let mut report = MigrationReport {
        eligible: total,
        ..MigrationReport::default()
    };

    info!(
        eligible = total,
        dry_run = options.dry_run,
        algorithm = %service.algorithm(),
        "starting document encryption migration"
    );

    for (i, record) in records.iter().enumerate() {
        let msg = format!("[{}/{}] {}", i + 1, total, record.path);
        if let Some(cb) = progress {
            cb(i as u64, total as u64, &msg);
        }

        if options.dry_run {
            report.record(record, RecordOutcome::Pending);
            continue;
        }

        let outcome = match migrate_record(op, store, service, options, record).await {
            Ok(outcome) => outcome,
            Err(failure) => RecordOutcome::Failed {
                stage: failure.stage,
                error: failure.error,
            },
        };

        match &outcome {
            RecordOutcome::Encrypted => {
                info!(id = %record.id, tenant = %record.tenant_id, path = %record.path, "encrypted document")
            }
            RecordOutcome::Recovered => {
                info!(id = %record.id, path = %record.path, "completed interrupted migration")
            }
            RecordOutcome::Skipped { reason } => {
                warn!(id = %record.id, path = %record.path, "skipped: {reason}")
            }
            RecordOutcome::Failed { stage, error } => {
                warn!(id = %record.id, path = %record.path, %stage, "migration failed: {error}")
            }
            RecordOutcome::Pending => {}
        }
        report.record(record, outcome);
    }

    if let Some(cb) = progress {
        cb(total as u64, total as u64, "done");
    }

    store.flush().context("flushing record store after migration")?;

    info!(
        eligible = report.eligible,
        succeeded = report.succeeded,
        recovered = report.recovered,
        failed = report.failed,
        skipped = report.skipped,
        "migration finished"
    );

    Ok(report)
}

async fn migrate_record<S: RecordStore + ?Sized>(
    op: &Operator,
    store: &mut S,
    service: &FileEncryptionService,
    options: &MigrationOptions,
    record: &DocumentRecord,
) -> std::result::Result<RecordOutcome, StageFailure> {
    let data = match op.read(&record.path).await {
        Ok(buffer) => Zeroizing::new(buffer.to_vec()),
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
            return Ok(RecordOutcome::Skipped {
                reason: format!("file not found: {}", record.path),
            });
        }
        Err(e) => return Err(fail(Stage::Reading)(e)),
    };

    if let Some(staged) = &record.pending_encryption {
        if recover(store, service, record, staged, &data)? {
            return Ok(RecordOutcome::Recovered);
        }
    }

    let encrypted = service
        .encrypt(&data, &record.tenant_id)
        .map_err(fail(Stage::Encrypting))?;
    let fingerprint = service
        .fingerprint(&data, &record.tenant_id, &encrypted.metadata.salt)
        .map_err(fail(Stage::Encrypting))?;
    drop(data);

    let staged = StagedEncryption::new(&encrypted.metadata, &fingerprint);
    store
        .stage_encryption(&record.id, staged.clone())
        .map_err(fail(Stage::Staging))?;

    let expected = service.checksum(&encrypted.ciphertext);
    op.write(&record.path, encrypted.ciphertext)
        .await
        .map_err(fail(Stage::Writing))?;

    if options.verify_writes {
        let written = op
            .read(&record.path)
            .await
            .map_err(fail(Stage::Verifying))?;
        if service.checksum(&written.to_vec()) != expected {
            return Err(StageFailure {
                stage: Stage::Verifying,
                error: "stored file does not match the written ciphertext".into(),
            });
        }
    }

    store
        .mark_encrypted(&record.id, staged.metadata)
        .map_err(fail(Stage::FlagSet))?;

    Ok(RecordOutcome::Encrypted)
}

/// Resolve a staged journal entry against the file on disk.
///
/// Returns `Ok(true)` once the flag has been set because the file already
/// decrypts under the staged metadata, `Ok(false)` when the file is still the
/// fingerprinted plaintext and needs the normal path. Any other file content
/// is a `Recovering` failure and nothing is written.
fn recover<S: RecordStore + ?Sized>(
    store: &mut S,
    service: &FileEncryptionService,
    record: &DocumentRecord,
    staged: &StagedEncryption,
    data: &[u8],
) -> std::result::Result<bool, StageFailure> {
    let staged_algorithm = &staged.metadata.encryption_algorithm;
    let active = service.algorithm();
    if staged_algorithm != active.name() {
        return Err(StageFailure {
            stage: Stage::Recovering,
            error: format!(
                "interrupted migration staged {staged_algorithm} but the active backend is {active}; \
                 select the {staged_algorithm} backend to finish this record"
            ),
        });
    }

    let metadata = staged.metadata.decode().map_err(fail(Stage::Recovering))?;

    match service.decrypt(data, &record.tenant_id, &metadata) {
        Ok(plaintext) => {
            drop(Zeroizing::new(plaintext));
            store
                .mark_encrypted(&record.id, staged.metadata.clone())
                .map_err(fail(Stage::FlagSet))?;
            Ok(true)
        }
        Err(CryptoError::AuthenticationFailure) => {
            let expected = staged.fingerprint().map_err(fail(Stage::Recovering))?;
            let actual = service
                .fingerprint(data, &record.tenant_id, &metadata.salt)
                .map_err(fail(Stage::Recovering))?;
            if actual != expected {
                return Err(StageFailure {
                    stage: Stage::Recovering,
                    error: "file matches neither the staged ciphertext nor the plaintext it \
                            replaced (torn write); restore it from backup"
                        .into(),
                });
            }
            debug!(id = %record.id, "staged write never landed, file is still plaintext");
            Ok(false)
        }
        Err(e) => Err(fail(Stage::Recovering)(e)),
    }
}
