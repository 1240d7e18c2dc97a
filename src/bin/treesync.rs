//! treesync daemon
//!
//! Client mode watches the sync directory and keeps it in step with the git
//! remote. `--server` runs the relay that lets clients wake each other up.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use treesync::alerts::{HelperNotifier, LogNotifier, Notifier};
use treesync::checks::run_checks;
use treesync::config::{expand_path, Config};
use treesync::relay::{RelayServer, RemoteListener};
use treesync::storage::GitBackend;
use treesync::sync::{SchedulerConfig, SyncScheduler};
use treesync::watcher::{self, WatchOptions};

#[derive(Parser)]
#[command(name = "treesync")]
#[command(about = "Keep a directory in sync across machines through git")]
#[command(version)]
struct Cli {
    /// Directory to synchronise. Must already be a git repo with a remote
    /// (i.e. 'git pull' works)
    #[arg(long, env = "TREESYNC_DIR")]
    dir: Option<String>,

    /// address:port of the relay server (listen address with --server)
    #[arg(long, env = "TREESYNC_ADDRESS")]
    address: Option<String>,

    /// Be the relay server
    #[arg(long, conflicts_with = "check")]
    server: bool,

    /// Check we are set up correctly, then exit
    #[arg(long)]
    check: bool,

    /// Log directory
    #[arg(long, env = "TREESYNC_LOG_DIR")]
    log_dir: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    stdout: bool,

    /// Config file (TOML)
    #[arg(long, env = "TREESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Don't use UDP broadcast on the local network
    #[arg(long)]
    no_broadcast: bool,
}

impl Cli {
    /// Command-line flags override the config file
    fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.dir {
            config.sync_dir = expand_path(Path::new(dir));
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = expand_path(Path::new(log_dir));
        }
        if let Some(address) = &self.address {
            if self.server {
                config.listen_addr = address.clone();
            } else {
                config.server_addr = Some(address.clone());
            }
        }
        if self.no_broadcast {
            config.broadcast.enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.apply(Config::load(cli.config.as_deref())?);

    init_logging(&config, cli.stdout || cli.check)?;

    if cli.server {
        let server = RelayServer::bind(&config.listen_addr).await?;
        server.serve().await?;
        return Ok(());
    }

    let helpers = HelperNotifier::from_config(&config);

    let backend = match GitBackend::new(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            helpers.alert_now(&e.to_string()).await;
            return Err(e.into());
        }
    };

    if let Err(e) = run_checks(&config, backend.as_ref()).await {
        helpers.alert_now(&e.to_string()).await;
        return Err(e.into());
    }

    if cli.check {
        println!("{} is ready to sync", config.root().display());
        return Ok(());
    }

    let root = config.root();
    tracing::info!("Synchronising {}", root.display());

    let events = watcher::watch(&root, WatchOptions::from_config(&config))?;
    let (listener, wakeups) = RemoteListener::start(&config).await;

    let notifier: Arc<dyn Notifier> = if helpers.is_disabled() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(helpers)
    };

    let scheduler = SyncScheduler::new(
        backend,
        notifier,
        Arc::new(listener),
        SchedulerConfig::from_config(&config),
    );
    scheduler.run(events, wakeups).await;

    Ok(())
}

/// Log to `<log_dir>/treesync.log`, or to stderr. `RUST_LOG` controls the
/// level, `info` by default.
fn init_logging(config: &Config, to_stderr: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if to_stderr {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .with(filter)
            .init();
        return Ok(());
    }

    std::fs::create_dir_all(&config.log_dir)?;
    let path = config.log_dir.join("treesync.log");
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        )
        .with(filter)
        .init();

    eprintln!("Logging to {}", path.display());
    Ok(())
}
