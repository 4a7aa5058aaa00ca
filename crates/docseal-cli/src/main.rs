//! docseal: per-tenant document encryption CLI
//!
//! Commands:
//!   generate-key                    - print a fresh master secret
//!   encrypt <input> --tenant T      - encrypt a file, write ciphertext + metadata sidecar
//!   decrypt <input> [--tenant T]    - decrypt a file using its metadata sidecar
//!   migrate [--dry-run]             - encrypt every stored document still flagged unencrypted
//!   status                          - active backend and record counts
//!   config show                     - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use docseal_core::DocsealConfig;
use docseal_crypto::{
    generate_master_key, select_backend, FileEncryptionService, KdfParams, MasterSecret,
    SelectedBackend,
};
use docseal_store::{
    build_fs_operator, JsonRecordStore, MetadataSidecar, MigrationOptions, ProgressFn,
    RecordOutcome, RecordStore,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "docseal",
    version,
    about = "Per-tenant encryption for stored documents",
    long_about = "docseal: encrypt documents at rest under per-tenant keys and migrate existing plaintext uploads"
)]
struct Cli {
    /// Path to docseal.toml configuration file
    #[arg(long, short = 'c', env = "DOCSEAL_CONFIG", default_value = "docseal.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "DOCSEAL_LOG")]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Prefer the native XChaCha20-Poly1305/BLAKE3 backend
    #[arg(
        long,
        env = "DOCSEAL_USE_NATIVE_CRYPTO",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    native: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new master secret for a deployment
    GenerateKey,

    /// Encrypt a file for a tenant
    Encrypt {
        /// Plaintext input file
        input: PathBuf,
        /// Tenant (company) id
        #[arg(long, short = 't')]
        tenant: String,
        /// Ciphertext output (default: <input>.enc)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Metadata sidecar output (default: <output>.docseal.json)
        #[arg(long, short = 'm')]
        metadata: Option<PathBuf>,
    },

    /// Decrypt a file for a tenant
    Decrypt {
        /// Ciphertext input file
        input: PathBuf,
        /// Tenant (company) id (default: the tenant named in the sidecar)
        #[arg(long, short = 't')]
        tenant: Option<String>,
        /// Metadata sidecar (default: <input>.docseal.json)
        #[arg(long, short = 'm')]
        metadata: Option<PathBuf>,
        /// Plaintext output (default: <input> without .enc, or <input>.dec)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Encrypt every stored document still flagged unencrypted
    ///
    /// Safe to run repeatedly. Never run two migrations over the same
    /// record store at the same time.
    Migrate {
        /// List eligible records without reading or writing anything
        #[arg(long)]
        dry_run: bool,
        /// Skip re-reading written files before setting the flag
        #[arg(long)]
        no_verify: bool,
    },

    /// Show the active backend and record counts
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DocsealConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("invalid log.format {:?}: {e}", config.log.format))?,
    };
    init_logging(&level, &format);

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "docseal starting"
    );

    let prefer_native = cli.native || config.crypto.prefer_native;

    match cli.command {
        Commands::GenerateKey => cmd_generate_key(&config),
        Commands::Encrypt { input, tenant, output, metadata } => {
            cmd_encrypt(&config, prefer_native, &input, &tenant, output, metadata).await
        }
        Commands::Decrypt { input, tenant, metadata, output } => {
            cmd_decrypt(&config, prefer_native, &input, tenant.as_deref(), metadata, output).await
        }
        Commands::Migrate { dry_run, no_verify } => {
            cmd_migrate(&config, prefer_native, dry_run, no_verify).await
        }
        Commands::Status => cmd_status(&config, prefer_native),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Service construction ──────────────────────────────────────────────────────

fn kdf_params(config: &DocsealConfig) -> KdfParams {
    KdfParams {
        pbkdf2_iterations: config.crypto.pbkdf2_iterations,
    }
}

/// Select the backend once and bind it to the master secret from the environment.
fn build_service(config: &DocsealConfig, prefer_native: bool) -> Result<FileEncryptionService> {
    let env_var = &config.crypto.master_key_env;
    let master = MasterSecret::from_env(env_var).with_context(|| {
        format!("master secret not configured\nRun `docseal generate-key` and export {env_var}.")
    })?;
    master
        .validate()
        .with_context(|| format!("{env_var} is unusable"))?;

    let selected = select_backend(prefer_native, kdf_params(config));
    Ok(FileEncryptionService::with_selected(&selected, master))
}

// ── Path defaults ─────────────────────────────────────────────────────────────

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn default_encrypted_path(input: &Path) -> PathBuf {
    append_extension(input, "enc")
}

fn default_sidecar_path(file: &Path) -> PathBuf {
    append_extension(file, "docseal.json")
}

fn default_decrypted_path(input: &Path) -> PathBuf {
    if input.extension().is_some_and(|ext| ext == "enc") {
        input.with_extension("")
    } else {
        append_extension(input, "dec")
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

// ── `docseal generate-key` ────────────────────────────────────────────────────

fn cmd_generate_key(config: &DocsealConfig) -> Result<()> {
    let key = generate_master_key();
    println!("{}={}", config.crypto.master_key_env, key);
    println!();
    println!("# Store this value in your secret manager and never commit it.");
    println!("# Losing it makes every encrypted document unrecoverable.");
    println!("# Changing it requires re-encrypting all documents.");
    Ok(())
}

// ── `docseal encrypt` ─────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &DocsealConfig,
    prefer_native: bool,
    input: &Path,
    tenant: &str,
    output: Option<PathBuf>,
    metadata: Option<PathBuf>,
) -> Result<()> {
    let service = build_service(config, prefer_native)?;

    let plaintext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let encrypted = service
        .encrypt(&plaintext, tenant)
        .with_context(|| format!("encrypting {}", input.display()))?;
    drop(plaintext);

    let output = output.unwrap_or_else(|| default_encrypted_path(input));
    let sidecar_path = metadata.unwrap_or_else(|| default_sidecar_path(&output));

    tokio::fs::write(&output, &encrypted.ciphertext)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    let sidecar = MetadataSidecar::new(tenant, &encrypted.metadata);
    let json = serde_json::to_vec_pretty(&sidecar).context("serializing metadata sidecar")?;
    tokio::fs::write(&sidecar_path, json)
        .await
        .with_context(|| format!("writing {}", sidecar_path.display()))?;

    info!(tenant = %tenant, output = %output.display(), "encrypted file");

    println!("Encrypted {} → {}", input.display(), output.display());
    println!("  tenant:    {tenant}");
    println!("  algorithm: {}", encrypted.metadata.algorithm);
    println!("  bytes:     {}", fmt_bytes(encrypted.ciphertext.len() as u64));
    println!("  metadata:  {}", sidecar_path.display());
    Ok(())
}

// ── `docseal decrypt` ─────────────────────────────────────────────────────────

/// Tenant to decrypt as: `--tenant` when given, otherwise the sidecar's.
fn decrypt_tenant<'a>(requested: Option<&'a str>, sidecar: &'a MetadataSidecar) -> Result<&'a str> {
    if !sidecar.is_encrypted {
        anyhow::bail!("metadata sidecar marks the file as not encrypted");
    }
    let tenant = requested.unwrap_or(&sidecar.tenant_id);
    if tenant.is_empty() {
        anyhow::bail!("no tenant: pass --tenant or use a sidecar that names one");
    }
    Ok(tenant)
}

async fn cmd_decrypt(
    config: &DocsealConfig,
    prefer_native: bool,
    input: &Path,
    tenant: Option<&str>,
    metadata: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let service = build_service(config, prefer_native)?;

    let sidecar_path = metadata.unwrap_or_else(|| default_sidecar_path(input));
    let sidecar_json = tokio::fs::read(&sidecar_path)
        .await
        .with_context(|| format!("reading {}", sidecar_path.display()))?;
    let sidecar: MetadataSidecar = serde_json::from_slice(&sidecar_json)
        .with_context(|| format!("parsing {}", sidecar_path.display()))?;
    let tenant = decrypt_tenant(tenant, &sidecar)
        .with_context(|| format!("checking {}", sidecar_path.display()))?;

    let ciphertext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let plaintext = match sidecar
        .metadata
        .decode()
        .and_then(|meta| service.decrypt(&ciphertext, tenant, &meta))
    {
        Ok(plaintext) => plaintext,
        Err(e) => {
            debug!(input = %input.display(), "decrypt error: {e}");
            eprintln!("decryption failed");
            std::process::exit(1);
        }
    };

    let output = output.unwrap_or_else(|| default_decrypted_path(input));
    tokio::fs::write(&output, &plaintext)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Decrypted {} → {}", input.display(), output.display());
    println!("  bytes: {}", fmt_bytes(plaintext.len() as u64));
    Ok(())
}

// ── `docseal migrate` ─────────────────────────────────────────────────────────

async fn cmd_migrate(
    config: &DocsealConfig,
    prefer_native: bool,
    dry_run: bool,
    no_verify: bool,
) -> Result<()> {
    let service = build_service(config, prefer_native)?;
    let op = build_fs_operator(&config.storage).context("building storage operator")?;
    let mut store = JsonRecordStore::open(&config.records.path)
        .with_context(|| format!("opening record store: {}", config.records.path.display()))?;

    let mut options = MigrationOptions::from(&config.migration);
    options.dry_run = dry_run;
    if no_verify {
        options.verify_writes = false;
    }

    println!(
        "Migrating {} (records: {}, algorithm: {}){}",
        config.storage.upload_dir.display(),
        config.records.path.display(),
        service.algorithm(),
        if dry_run { " [dry run]" } else { "" },
    );

    let pb = make_progress_bar(0, "migrate")?;
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let report = docseal_store::migrate(&op, &mut store, &service, &options, Some(&progress))
        .await
        .context("running migration")?;
    pb.finish_with_message("done".to_string());

    println!();
    if dry_run {
        println!("Dry run: {} record(s) would be encrypted", report.eligible);
        for entry in &report.outcomes {
            println!("  {}  {}", entry.id, entry.path);
        }
        return Ok(());
    }

    println!("Migration complete:");
    println!("  eligible:  {}", report.eligible);
    println!("  succeeded: {}", report.succeeded);
    if report.recovered > 0 {
        println!("  recovered: {} (interrupted earlier, flag now set)", report.recovered);
    }
    println!("  skipped:   {} (file missing)", report.skipped);
    println!("  failed:    {}", report.failed);

    for entry in &report.outcomes {
        match &entry.outcome {
            RecordOutcome::Failed { stage, error } => {
                println!("  FAILED  {} ({}) at {stage}: {error}", entry.id, entry.path);
            }
            RecordOutcome::Skipped { reason } => {
                println!("  skipped {}: {reason}", entry.id);
            }
            _ => {}
        }
    }

    if report.has_failures() {
        eprintln!("{} record(s) failed; re-run `docseal migrate` after fixing the cause", report.failed);
        drop(store);
        std::process::exit(1);
    }
    Ok(())
}

// ── `docseal status` ──────────────────────────────────────────────────────────

fn cmd_status(config: &DocsealConfig, prefer_native: bool) -> Result<()> {
    let SelectedBackend { choice, backend } = select_backend(prefer_native, kdf_params(config));
    println!("docseal {}", env!("CARGO_PKG_VERSION"));
    println!("  backend:       {choice}");
    println!("  algorithm:     {}", backend.algorithm());

    let env_var = &config.crypto.master_key_env;
    let secret_state = match MasterSecret::from_env(env_var) {
        Err(_) => "not set".to_string(),
        Ok(secret) => match secret.validate() {
            Ok(_) => "configured".to_string(),
            Err(_) => format!("too short ({} bytes)", secret.len()),
        },
    };
    println!("  master secret: {secret_state} ({env_var})");
    println!("  upload dir:    {}", config.storage.upload_dir.display());

    let records_path = &config.records.path;
    if records_path.exists() {
        let store = JsonRecordStore::open(records_path)
            .with_context(|| format!("opening record store: {}", records_path.display()))?;
        let counts = store.counts();
        println!("  records:       {}", records_path.display());
        println!("    total:       {}", counts.total);
        println!("    encrypted:   {}", counts.encrypted);
        println!("    unencrypted: {}", counts.unencrypted);
        if counts.pending > 0 {
            println!("    interrupted: {} (re-run `docseal migrate`)", counts.pending);
        }
    } else {
        println!("  records:       none ({} not found)", records_path.display());
    }
    Ok(())
}

// ── `docseal config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &DocsealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
