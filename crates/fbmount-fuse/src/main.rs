#![deny(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fbmount_core::{FirebaseClient, FirebaseConfig, PumpError, RemoteStore, SyncCore, follow};
use fbmount_fuse::{AdapterLayer, FirebaseFS, MountConfig, RemoteBridge};

/// Mount a Firebase Realtime Database as a directory tree
#[derive(Parser)]
#[command(name = "fbmount")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Mount a database
    fbmount mount --database my-db --auth \"$SECRET\" /mnt/db

    # Print the mirrored tree after every change
    FBMOUNT_DATABASE=my-db fbmount watch
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the database at a directory
    Mount(MountArgs),

    /// Mirror the database without mounting and print the tree on each change
    Watch(DatabaseArgs),
}

#[derive(Args)]
struct DatabaseArgs {
    /// Database name (expanded to https://<name>.firebaseio.com) or base URL
    #[arg(long, env = "FBMOUNT_DATABASE")]
    database: String,

    /// Database secret or ID token
    #[arg(long, env = "FBMOUNT_AUTH", hide_env_values = true)]
    auth: Option<String>,
}

#[derive(Args)]
struct MountArgs {
    #[command(flatten)]
    database: DatabaseArgs,

    /// Directory to mount at
    mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Kernel attribute cache TTL in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    attr_ttl_ms: u64,

    /// Seconds a write waits for the database before failing
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    write_timeout_secs: u64,
}

/// Why a mount is shutting down.
enum Shutdown {
    Signal,
    Pump(PumpError),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match cli.command {
        Commands::Mount(args) => mount(&runtime, args),
        Commands::Watch(args) => watch(&runtime, &args),
    }
}

fn connect(args: &DatabaseArgs, request_timeout: Duration) -> Result<FirebaseClient> {
    let mut config = FirebaseConfig::new(&args.database)
        .with_context(|| format!("Invalid database {:?}", args.database))?
        .with_request_timeout(request_timeout);
    if let Some(auth) = &args.auth {
        config = config.with_auth(auth.clone());
    }
    FirebaseClient::new(config).context("Failed to create HTTP client")
}

fn mount(runtime: &tokio::runtime::Runtime, args: MountArgs) -> Result<()> {
    let config = MountConfig::default()
        .attr_ttl(Duration::from_millis(args.attr_ttl_ms))
        .write_timeout(Duration::from_secs(args.write_timeout_secs))
        .allow_other(args.allow_other);
    let remote: Arc<dyn RemoteStore> = Arc::new(connect(&args.database, config.write_timeout)?);
    let sync = Arc::new(SyncCore::new());

    let bridge = RemoteBridge::new(runtime.handle().clone(), config.write_timeout);
    let layer = AdapterLayer::new(Arc::clone(&sync), Arc::clone(&remote), bridge);
    let handle = fbmount_fuse::mount(FirebaseFS::new(layer, config.clone()), &args.mountpoint, &config)
        .with_context(|| format!("Failed to mount at {}", args.mountpoint.display()))?;

    let (tx, rx) = mpsc::channel();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Shutdown::Signal);
    })
    .context("Failed to install signal handler")?;

    let pump = runtime.spawn(async move {
        let Err(e) = follow(remote.as_ref(), sync, |_| {}).await;
        let _ = tx.send(Shutdown::Pump(e));
    });

    let reason = rx.recv().context("Shutdown channel closed")?;
    pump.abort();
    handle.unmount();

    match reason {
        Shutdown::Signal => {
            info!("interrupted");
            Ok(())
        }
        Shutdown::Pump(e) => Err(e).context("Lost the database subscription"),
    }
}

fn watch(runtime: &tokio::runtime::Runtime, args: &DatabaseArgs) -> Result<()> {
    let remote = connect(args, Duration::from_secs(30))?;
    let sync = Arc::new(SyncCore::new());
    let Err(e) = runtime.block_on(follow(&remote, sync, |core| {
        println!("{}", core.render());
    }));
    Err(e).context("Lost the database subscription")
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
