//! twister-sync - companion display client for the Midi Fighter Twister
//!
//! Mirrors the backend's live state, bridges the controller's MIDI to it and
//! exposes mapping, learn and preset operations from a terminal REPL.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use twister_sync::backend::{Backend, HttpBackend};
use twister_sync::bridge::{MidiDevices, MidirDevices};
use twister_sync::cli::{self, ReplContext};
use twister_sync::config::{AppConfig, ConfigWatcher};
use twister_sync::connection::{ConnectionManager, ConnectionStatus, WsTransport};
use twister_sync::paths::AppPaths;
use twister_sync::state::{StateActor, StateActorHandle};

/// MIDI client name registered with the platform MIDI stack
const MIDI_CLIENT_NAME: &str = "twister-sync";

/// Twister Sync - live state, MIDI Learn and presets for the Midi Fighter Twister
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TWISTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rotated log files
    #[arg(long)]
    log_file: bool,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run without the interactive prompt
    #[arg(long)]
    no_repl: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect(args.config.clone());

    let logs_dir = if args.log_file {
        Some(paths.ensure_logs_dir().context("Failed to create logs directory")?)
    } else {
        None
    };
    let _log_guard = init_logging(&args.log_level, logs_dir)?;

    info!("Starting twister-sync v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());

    // Hot reload only makes sense for a file that exists
    let (config_watcher, config) = if paths.config.exists() {
        let (watcher, config) = ConfigWatcher::new(paths.config.clone()).await?;
        info!("Configuration loaded with hot-reload enabled");
        (Some(watcher), config)
    } else {
        (None, AppConfig::load(&paths.config).await?)
    };
    info!(
        "Backend: {} ({} local preferences)",
        config.backend.url,
        config.preferences.len()
    );

    let backend = HttpBackend::new(&config.backend.url, config.request_timeout())
        .context("Failed to create backend client")?;
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let devices =
        MidirDevices::new(MIDI_CLIENT_NAME).map(|d| Arc::new(d) as Arc<dyn MidiDevices>);
    let handle = StateActor::spawn(backend, devices, config.state_settings());

    if args.list_ports {
        match handle.list_ports().await {
            Some(report) => print!("{}", cli::render_ports(&report)),
            None => warn!("Port listing unavailable"),
        }
        handle.shutdown();
        return Ok(());
    }

    run_app(handle, config, config_watcher, paths, args.no_repl).await?;

    info!("twister-sync shutdown complete");
    Ok(())
}

async fn run_app(
    handle: StateActorHandle,
    mut config: AppConfig,
    mut config_watcher: Option<ConfigWatcher>,
    paths: AppPaths,
    no_repl: bool,
) -> Result<()> {
    let ws_url = config.ws_url().context("No push channel URL configured")?;
    info!("Push channel: {}", ws_url);

    let manager = ConnectionManager::new(
        Arc::new(WsTransport::new(ws_url)),
        Arc::new(handle.clone()),
        config.connection_settings(),
    )
    .with_status_callback(Arc::new(|status: ConnectionStatus| match status {
        ConnectionStatus::Disconnected { .. } => warn!("Push channel {}", status),
        _ => info!("Push channel {}", status),
    }));
    let status = manager.status();
    let connection_task = manager.spawn();

    let mut poll_task = spawn_port_poller(handle.clone(), config.port_poll_interval());

    let mut repl_done = if no_repl {
        None
    } else {
        let ctx = ReplContext {
            handle: handle.clone(),
            status,
            paths,
            runtime: tokio::runtime::Handle::current(),
        };
        Some(cli::spawn_repl(ctx).context("Failed to start REPL")?)
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = next_config(&mut config_watcher) => {
                info!("Configuration file changed, applying...");
                handle.reconfigure(new_config.state_settings());

                if new_config.port_poll_interval() != config.port_poll_interval() {
                    poll_task.abort();
                    poll_task = spawn_port_poller(handle.clone(), new_config.port_poll_interval());
                }
                if new_config.backend != config.backend
                    || new_config.connection != config.connection
                {
                    warn!("Backend and connection changes take effect after a restart");
                }
                config = new_config;
            }

            _ = repl_finished(&mut repl_done) => {
                info!("REPL closed, stopping");
                break;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    info!("Shutting down...");
    poll_task.abort();
    connection_task.abort();
    handle.shutdown();

    Ok(())
}

fn spawn_port_poller(handle: StateActorHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; devices were just selected
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !handle.is_alive() {
                break;
            }
            handle.poll_devices();
        }
    })
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

async fn repl_finished(done: &mut Option<oneshot::Receiver<()>>) {
    match done {
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str, logs_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {level}"))?;

    // Console output goes to stderr so it does not mix with REPL output
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file, guard) = match logs_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "twister-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
