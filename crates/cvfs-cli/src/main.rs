//! cvfs: encrypted chunked storage client
//!
//! Commands:
//!   put <local> <remote>          - encrypt and upload a local file
//!   get <remote> [<local>]        - download and decrypt a file (or byte range)
//!   ls / stat / mkdir / mv / rm   - namespace operations on remote paths
//!   config show                   - display current configuration
//!   health                        - check that the storage backend is reachable

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use cvfs_core::config::{CvfsConfig, StorageBackend};
use cvfs_core::NamespaceItem;
use cvfs_crypto::MetadataKey;
use cvfs_namespace::Filesystem;
use cvfs_storage::{OpendalRemote, S3Credentials};
use cvfs_transfer::{ProgressFn, RetryPolicy, TransferLimits};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cvfs",
    version,
    about = "Encrypted chunked storage client",
    long_about = "cvfs: upload, download and organize files that are encrypted before they leave this machine"
)]
struct Cli {
    /// Path to cvfs.toml configuration file
    #[arg(long, short = 'c', env = "CVFS_CONFIG", default_value = "~/.config/cvfs/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, env = "CVFS_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "CVFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

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
    /// Encrypt and upload a local file
    Put {
        /// Local file to upload
        local: PathBuf,
        /// Remote destination path (an existing file there is replaced)
        remote: String,
    },

    /// Download and decrypt a remote file
    ///
    /// Writes to stdout when no local path is given.
    Get {
        /// Remote file path
        remote: String,
        /// Local destination file
        local: Option<PathBuf>,
        /// First byte to read (inclusive)
        #[arg(long)]
        start: Option<u64>,
        /// Byte to stop before (exclusive)
        #[arg(long)]
        end: Option<u64>,
    },

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show the decrypted metadata of a remote item
    Stat { path: String },

    /// Create a remote directory
    Mkdir { path: String },

    /// Rename or move a remote item
    Mv { from: String, to: String },

    /// Move a remote item to the trash
    Rm { path: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check that the storage backend is reachable
    Health,
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
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None if config.daemon.log_format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);
    if config_path.exists() {
        debug!(config = %config_path.display(), "configuration loaded");
    } else {
        warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Health => cmd_health(&config).await,
        Commands::Put { local, remote } => {
            let fs = open_filesystem(&config).await?;
            cmd_put(&fs, &local, &remote).await
        }
        Commands::Get { remote, local, start, end } => {
            let fs = open_filesystem(&config).await?;
            cmd_get(&fs, &remote, local.as_deref(), start, end).await
        }
        Commands::Ls { path } => cmd_ls(&open_filesystem(&config).await?, &path).await,
        Commands::Stat { path } => cmd_stat(&open_filesystem(&config).await?, &path).await,
        Commands::Mkdir { path } => {
            let fs = open_filesystem(&config).await?;
            let id = fs.mkdir(&path).await.with_context(|| format!("mkdir {path}"))?;
            println!("{id}");
            Ok(())
        }
        Commands::Mv { from, to } => {
            let fs = open_filesystem(&config).await?;
            fs.rename(&from, &to)
                .await
                .with_context(|| format!("moving {from} to {to}"))
        }
        Commands::Rm { path } => {
            let fs = open_filesystem(&config).await?;
            fs.remove(&path).await.with_context(|| format!("removing {path}"))
        }
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

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<CvfsConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CvfsConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(format!("{home}/{rest}"))
        }
        None => path.to_path_buf(),
    }
}

// ── Remote and key setup ──────────────────────────────────────────────────────

/// Read S3 credentials from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY.
fn credentials_from_env() -> Result<S3Credentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("CVFS_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("CVFS_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
    Ok(S3Credentials {
        access_key_id,
        secret_access_key,
    })
}

fn open_remote(config: &CvfsConfig) -> Result<OpendalRemote> {
    let creds = match config.storage.backend {
        StorageBackend::S3 => Some(credentials_from_env()?),
        StorageBackend::Fs | StorageBackend::Memory => None,
    };
    let op = cvfs_storage::build_from_core_config(&config.storage, creds.as_ref())
        .context("building storage operator")?;
    Ok(OpendalRemote::new(
        op,
        config.storage.bucket.clone(),
        config.storage.region.clone(),
    ))
}

/// Metadata key: CVFS_METADATA_KEY first, then `crypto.metadata_key_file`.
async fn load_metadata_key(config: &CvfsConfig) -> Result<MetadataKey> {
    let hex = match std::env::var("CVFS_METADATA_KEY") {
        Ok(hex) => hex,
        Err(_) => {
            let path = config.crypto.metadata_key_file.as_deref().context(
                "no metadata key: set CVFS_METADATA_KEY or crypto.metadata_key_file in config",
            )?;
            let path = expand_tilde(path);
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading metadata key: {}", path.display()))?
        }
    };
    MetadataKey::from_hex(hex.trim()).context("decoding metadata key")
}

async fn open_filesystem(config: &CvfsConfig) -> Result<Filesystem> {
    let remote = open_remote(config)?;
    let key = load_metadata_key(config).await?;
    let root = match config.namespace.root_id {
        Some(id) => id,
        None => remote.ensure_root().await.context("locating root directory")?,
    };
    debug!(%root, bucket = %config.storage.bucket, "filesystem ready");

    Ok(Filesystem::new(Arc::new(remote), key, root)
        .with_limits(TransferLimits::from_config(&config.transfer))
        .with_retry(RetryPolicy::from_config(&config.transfer)))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Arc::new(move |n| pb.inc(n))
}

// ── `cvfs put` ────────────────────────────────────────────────────────────────

async fn cmd_put(fs: &Filesystem, local: &Path, remote: &str) -> Result<()> {
    let size = tokio::fs::metadata(local)
        .await
        .with_context(|| format!("reading {}", local.display()))?
        .len();
    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("opening {}", local.display()))?;

    let pb = make_progress_bar(size, "put");
    let result = fs
        .write_reader(remote, &mut file, Some(progress_callback(&pb)))
        .await;
    let entry = match result {
        Ok(entry) => entry,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).with_context(|| format!("uploading {} to {remote}", local.display()));
        }
    };
    pb.finish_with_message("done");

    info!(id = %entry.id, chunks = entry.chunk_count, "upload complete");
    println!(
        "{} → {remote} ({}, {} chunks, id {})",
        local.display(),
        fmt_bytes(entry.metadata.size),
        entry.chunk_count,
        entry.id
    );
    Ok(())
}

// ── `cvfs get` ────────────────────────────────────────────────────────────────

/// Bytes a `[start, end)` read of a `size`-byte file yields.
fn range_len(size: u64, start: Option<u64>, end: Option<u64>) -> u64 {
    let start = start.unwrap_or(0).min(size);
    let end = end.unwrap_or(size).min(size);
    end.saturating_sub(start)
}

async fn cmd_get(
    fs: &Filesystem,
    remote: &str,
    local: Option<&Path>,
    start: Option<u64>,
    end: Option<u64>,
) -> Result<()> {
    let size = match fs.stat(remote).await.with_context(|| format!("stat {remote}"))? {
        NamespaceItem::File(entry) => entry.metadata.size,
        NamespaceItem::Directory(_) => anyhow::bail!("{remote} is a directory"),
    };
    let options = fs.download_options().range(start, end);

    match local {
        Some(local) => {
            let pb = make_progress_bar(range_len(size, start, end), "get");
            let options = options.with_progress(progress_callback(&pb));
            let mut file = tokio::fs::File::create(local)
                .await
                .with_context(|| format!("creating {}", local.display()))?;
            let written = match fs.read_file_to(remote, &mut file, &options).await {
                Ok(n) => n,
                Err(e) => {
                    pb.abandon_with_message("failed");
                    drop(file);
                    // chunks already written are not trustworthy on their own
                    let _ = tokio::fs::remove_file(local).await;
                    return Err(e).with_context(|| format!("downloading {remote}"));
                }
            };
            pb.finish_with_message("done");
            println!("{remote} → {} ({})", local.display(), fmt_bytes(written));
        }
        None => {
            let mut stdout = tokio::io::stdout();
            fs.read_file_to(remote, &mut stdout, &options)
                .await
                .with_context(|| format!("downloading {remote}"))?;
        }
    }
    Ok(())
}

// ── `cvfs ls` / `cvfs stat` ───────────────────────────────────────────────────

async fn cmd_ls(fs: &Filesystem, path: &str) -> Result<()> {
    let mut items = fs.read_dir(path).await.with_context(|| format!("listing {path}"))?;
    items.sort_by(|a, b| a.name().cmp(b.name()));
    for item in items {
        match item {
            NamespaceItem::Directory(d) => println!("{:>10}  {}/", "-", d.metadata.name),
            NamespaceItem::File(f) => {
                println!("{:>10}  {}", fmt_bytes(f.metadata.size), f.metadata.name)
            }
        }
    }
    Ok(())
}

async fn cmd_stat(fs: &Filesystem, path: &str) -> Result<()> {
    let item = fs.stat(path).await.with_context(|| format!("stat {path}"))?;
    println!("path:      {path}");
    println!("id:        {}", item.id());
    println!("parent:    {}", item.parent());
    match item {
        NamespaceItem::Directory(_) => println!("type:      directory"),
        NamespaceItem::File(f) => {
            println!("type:      file");
            println!("size:      {} ({} bytes)", fmt_bytes(f.metadata.size), f.metadata.size);
            println!("mime:      {}", f.metadata.mime);
            println!("chunks:    {}", f.chunk_count);
            println!("version:   {:?}", f.version);
            println!("modified:  {}", f.metadata.last_modified);
            if let Some(hash) = &f.metadata.hash {
                println!("sha512:    {hash}");
            }
            println!("location:  {}/{}", f.locator.region, f.locator.bucket);
        }
    }
    Ok(())
}

// ── `cvfs config show` / `cvfs health` ────────────────────────────────────────

fn cmd_config_show(config: &CvfsConfig, config_path: &Path) -> Result<()> {
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

async fn cmd_health(config: &CvfsConfig) -> Result<()> {
    let remote = open_remote(config)?;
    let backend = format!("{:?}", config.storage.backend).to_lowercase();
    match cvfs_storage::check_health(remote.operator()).await {
        Ok(()) => {
            println!("storage: {backend} [ok]");
            Ok(())
        }
        Err(e) => {
            println!("storage: {backend} [UNREACHABLE]");
            Err(e)
        }
    }
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
