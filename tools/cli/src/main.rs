//! FileVault CLI - Command line interface for vault operations.
//!
//! This tool drives a local vault: upload, list, download and delete files
//! on behalf of an owner, and reconcile the blob and metadata stores. The
//! passphrase is read from the `ENCRYPTION_SECRET` environment variable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use filevault_common::{Error, FileId, OwnerId};
use filevault_vault::{FileVault, UploadRequest, VaultConfig};

#[derive(Parser)]
#[command(name = "filevault")]
#[command(about = "FileVault - Encrypted file storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding blobs, staging area and metadata database.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file; overrides --data-dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and store a file.
    Upload {
        /// Owner of the file.
        #[arg(short, long)]
        owner: String,

        /// Source file to upload.
        #[arg(short, long)]
        source: PathBuf,

        /// Declared file name (default: source file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Declared MIME type.
        #[arg(short, long, default_value = "")]
        mime: String,

        /// Remove the source file after the upload attempt.
        #[arg(long)]
        remove_source: bool,
    },

    /// List an owner's files.
    List {
        /// Owner of the files.
        #[arg(short, long)]
        owner: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decrypt a file to disk.
    Download {
        /// Owner of the file.
        #[arg(short, long)]
        owner: String,

        /// File id.
        #[arg(short, long)]
        id: String,

        /// Destination file path.
        #[arg(long)]
        dest: PathBuf,
    },

    /// Delete a file.
    Delete {
        /// Owner of the file.
        #[arg(short, long)]
        owner: String,

        /// File id.
        #[arg(short, long)]
        id: String,
    },

    /// Report orphan blobs and records.
    Reconcile {
        /// Delete orphan blobs older than the grace period.
        #[arg(long)]
        prune: bool,

        /// Grace period in seconds for pruning.
        #[arg(long, default_value_t = 3600)]
        grace_secs: i64,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Upload {
            owner,
            source,
            name,
            mime,
            remove_source,
        } => cmd_upload(&config, &owner, &source, name, mime, remove_source).await,

        Commands::List { owner, json } => cmd_list(&config, &owner, json).await,

        Commands::Download { owner, id, dest } => cmd_download(&config, &owner, &id, &dest).await,

        Commands::Delete { owner, id } => cmd_delete(&config, &owner, &id).await,

        Commands::Reconcile { prune, grace_secs } => cmd_reconcile(&config, prune, grace_secs).await,

        Commands::Config => cmd_config(&config),
    }
}

/// Resolve configuration from a file, a data directory or the default.
fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<VaultConfig> {
    if let Some(path) = path {
        return VaultConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let data_dir = match data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No data directory on this platform; pass --data-dir")?
            .join("filevault"),
    };
    Ok(VaultConfig::with_data_dir(data_dir))
}

/// Open the vault with the passphrase from the environment.
async fn open_vault(config: &VaultConfig) -> Result<FileVault> {
    let passphrase = VaultConfig::passphrase_from_env()?;
    FileVault::open(config, &passphrase)
        .await
        .context("Failed to open vault")
}

fn parse_owner(owner: &str) -> Result<OwnerId> {
    OwnerId::new(owner).context("Invalid owner")
}

fn parse_id(id: &str) -> Result<FileId> {
    FileId::parse(id).context("Invalid file id")
}

/// Upload a file.
async fn cmd_upload(
    config: &VaultConfig,
    owner: &str,
    source: &Path,
    name: Option<String>,
    mime: String,
    remove_source: bool,
) -> Result<()> {
    let owner = parse_owner(owner)?;
    let file_name = match name {
        Some(name) => name,
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Source has no file name; pass --name")?,
    };
    info!("Uploading {} as {}", source.display(), file_name);

    let vault = open_vault(config).await?;
    let request = UploadRequest::new(file_name, mime);

    let id = if remove_source {
        vault.upload_file(&owner, source, request).await
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .context("Failed to open source file")?;
        let content = ReaderStream::new(file)
            .map_ok(|chunk| chunk.to_vec())
            .map_err(Error::Io)
            .boxed();
        vault.upload(&owner, content, request).await
    }
    .context("Upload failed")?;

    println!("File uploaded: {}", id);

    Ok(())
}

/// List an owner's files.
async fn cmd_list(config: &VaultConfig, owner: &str, json: bool) -> Result<()> {
    let owner = parse_owner(owner)?;
    let vault = open_vault(config).await?;

    let files = vault.list(&owner).await.context("Failed to list files")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else if files.is_empty() {
        println!("No files.");
    } else {
        for file in files {
            println!(
                "  {}  {:>12} bytes  {}  {} ({})",
                file.id,
                file.size_bytes,
                file.created_at.format("%Y-%m-%d %H:%M:%S"),
                file.file_name,
                file.mime_type
            );
        }
    }

    Ok(())
}

/// Decrypt a file to disk.
async fn cmd_download(config: &VaultConfig, owner: &str, id: &str, dest: &Path) -> Result<()> {
    let owner = parse_owner(owner)?;
    let id = parse_id(id)?;
    info!("Downloading {} to {}", id, dest.display());

    let vault = open_vault(config).await?;
    let mut download = vault
        .download(&owner, &id)
        .await
        .context("Download failed")?;

    let mut out = tokio::fs::File::create(dest)
        .await
        .context("Failed to create output file")?;
    let mut written: u64 = 0;
    while let Some(chunk) = download.next().await {
        let chunk = chunk.context("Download failed")?;
        out.write_all(&chunk)
            .await
            .context("Failed to write output file")?;
        written += chunk.len() as u64;
    }
    out.flush().await.context("Failed to write output file")?;

    println!(
        "File downloaded: {} -> {} ({} bytes)",
        download.summary().file_name,
        dest.display(),
        written
    );

    Ok(())
}

/// Delete a file.
async fn cmd_delete(config: &VaultConfig, owner: &str, id: &str) -> Result<()> {
    let owner = parse_owner(owner)?;
    let id = parse_id(id)?;
    info!("Deleting {}", id);

    let vault = open_vault(config).await?;
    vault.delete(&owner, &id).await.context("Delete failed")?;

    println!("File deleted: {}", id);

    Ok(())
}

/// Scan for orphans and optionally prune orphan blobs.
async fn cmd_reconcile(config: &VaultConfig, prune: bool, grace_secs: i64) -> Result<()> {
    let vault = open_vault(config).await?;
    let reconciler = vault.reconciler();

    let report = reconciler.scan().await.context("Reconciliation scan failed")?;

    if report.is_clean() {
        println!("No orphans found.");
        return Ok(());
    }

    println!("Orphan blobs: {}", report.orphan_blobs.len());
    for blob in &report.orphan_blobs {
        println!("  {} ({} bytes, modified {})", blob.path, blob.size, blob.modified);
    }
    println!("Orphan records: {}", report.orphan_records.len());
    for record in &report.orphan_records {
        println!("  {} (owner {}, blob {})", record.id, record.owner_id, record.storage_path);
    }

    if prune {
        let grace = chrono::Duration::seconds(grace_secs.max(0));
        let pruned = reconciler
            .prune_orphan_blobs(&report, grace)
            .await
            .context("Pruning failed")?;
        println!("Pruned {} orphan blob(s).", pruned);
    }

    Ok(())
}

/// Print the effective configuration.
fn cmd_config(config: &VaultConfig) -> Result<()> {
    println!("{}", config.to_json()?);
    Ok(())
}
