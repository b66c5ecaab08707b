//! xcryptfs - Mirror filesystem with transparent per-file encryption
//!
//! Usage:
//!   xcryptfs [OPTIONS] <PASSPHRASE> <BACKING_DIR> <MOUNT_POINT>
//!
//! A passphrase of `-` is read from the terminal instead.

use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xcryptfs::{
    config::{Config, LoggingConfig},
    context::{resolve_directory_arg, MountContext, Passphrase},
    crypto::AesGcmGateway,
    fs::{MirrorLayer, XcryptFs},
    mount::mount_options,
    Error, Result,
};

/// Passphrase argument that requests an interactive prompt
const PROMPT_PASSPHRASE: &str = "-";

#[derive(Parser)]
#[command(name = "xcryptfs")]
#[command(author = "xcryptfs Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mirror a directory, encrypting files created through the mount")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Extra FUSE mount options (comma separated, repeatable)
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Mount read-only
    #[arg(long)]
    read_only: bool,

    /// Encryption passphrase ("-" to prompt)
    passphrase: String,

    /// Directory to mirror
    #[arg(allow_hyphen_values = true)]
    backing_dir: String,

    /// Where to mount the mirror
    #[arg(allow_hyphen_values = true)]
    mount_point: String,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(cli.verbose, &config.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli, config) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load_or_default(&path)?;
    config.apply_env_overrides();

    if cli.allow_other {
        config.mount.allow_other = true;
    }
    if cli.read_only {
        config.mount.read_only = true;
    }
    config.mount.options.extend(cli.options.iter().cloned());

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Failed to open log file {:?}: {}", path, e)))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to install logger: {}", e)))
}

fn read_passphrase(arg: String) -> Result<Passphrase> {
    if arg == PROMPT_PASSPHRASE {
        let secret = rpassword::prompt_password("Enter encryption passphrase: ")
            .map_err(|e| Error::Usage(format!("Failed to read passphrase: {}", e)))?;
        return Passphrase::new(secret);
    }
    Passphrase::new(arg)
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let backing_root = resolve_directory_arg(&cli.backing_dir, "mirror directory")?;
    let mount_point = resolve_directory_arg(&cli.mount_point, "mount point")?;

    let passphrase = read_passphrase(cli.passphrase)?;

    info!("Deriving encryption key...");
    let ctx = MountContext::new(backing_root, &passphrase, &config.encryption)?;
    drop(passphrase);

    info!(
        "Mirroring {:?} at {:?}",
        ctx.backing_root(),
        mount_point
    );

    let mirror = MirrorLayer::new(Arc::new(ctx), Arc::new(AesGcmGateway::new()));
    let fs = XcryptFs::new(mirror, Duration::from_millis(config.mount.attr_ttl_ms));
    let options = mount_options(&config.mount);

    fuser::mount2(fs, &mount_point, &options).map_err(Error::Io)?;

    info!("Unmounted {:?}", mount_point);
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
