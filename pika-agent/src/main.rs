use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pika_agent::config::{Config, SshLoginConfig, DEFAULT_CONFIG_PATH};
use pika_agent::config_broadcast::ConfigBroadcaster;
use pika_agent::hook::{client, HookManager};
use pika_agent::metrics;
use pika_agent::monitors::SshLoginMonitor;
use pika_agent::response::ResponseHandler;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pika-agent", version)]
#[command(about = "Host agent reporting SSH logins through a PAM exec hook")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Metrics/health endpoint address
    #[arg(long, default_value = "127.0.0.1:9090")]
    metrics_addr: SocketAddr,

    /// Disable metrics/health endpoint
    #[arg(long)]
    no_metrics: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the agent (default)
    Run,
    /// Report the current SSH session; executed by pam_exec
    SshLoginHook,
    /// Install the PAM hook and enable UsePAM in sshd (requires root)
    InstallHook,
    /// Remove the PAM hook
    UninstallHook,
    /// Show whether the PAM hook is in place
    HookStatus,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::SshLoginHook => {
            run_login_hook(&args.config);
            Ok(())
        }
        Command::Run => run_daemon(args),
        Command::InstallHook => {
            let config = load_config(&args);
            let manager = HookManager::from_config(&config.ssh_login);
            manager.install().context("failed to install PAM hook")?;
            println!("PAM hook installed in {}", manager.paths().pam_config.display());
            Ok(())
        }
        Command::UninstallHook => {
            let config = load_config(&args);
            let manager = HookManager::from_config(&config.ssh_login);
            manager.uninstall();
            println!("PAM hook removed from {}", manager.paths().pam_config.display());
            Ok(())
        }
        Command::HookStatus => {
            let config = load_config(&args);
            let status = HookManager::from_config(&config.ssh_login).status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

/// PAM entry point. Never fails: a login must not depend on the agent.
fn run_login_hook(config_path: &Path) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::WARN)
        .with_target(false)
        .try_init();

    let socket = Config::load(config_path)
        .map(|c| c.ssh_login.socket_path)
        .unwrap_or_else(|_| SshLoginConfig::default().socket_path);

    if let Err(e) = client::send_event_from(|name| std::env::var(name).ok(), &socket) {
        warn!(socket = %socket.display(), "Failed to report SSH login: {}", e);
    }
}

fn init_logging(args: &Args, log_level: &str) {
    let level = match args.verbose {
        0 => log_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }
}

/// Load the configuration and set up logging from it.
fn load_config(args: &Args) -> Config {
    match Config::load(&args.config) {
        Ok(config) => {
            init_logging(args, &config.general.log_level);
            config
        }
        Err(e) => {
            let config = Config::default();
            init_logging(args, &config.general.log_level);
            warn!(path = %args.config.display(), "Using default config: {:#}", e);
            config
        }
    }
}

#[tokio::main]
async fn run_daemon(args: Args) -> Result<()> {
    let config = load_config(&args);

    info!("Pika agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", args.config.display());
    info!("SSH login monitoring: {}", config.ssh_login.enabled);

    let (ready_tx, ready_rx) = watch::channel(false);

    if !args.no_metrics {
        let metrics_addr = args.metrics_addr;
        tokio::spawn(async move {
            metrics::start_server(metrics_addr, ready_rx).await;
        });
    }

    let monitor = Arc::new(SshLoginMonitor::new(config.ssh_login.queue_capacity));
    let events = monitor
        .take_events()
        .context("login event queue already has a consumer")?;

    let response_handler = ResponseHandler::new(config.general.log_format);
    let response_handle = tokio::spawn(async move {
        response_handler.run(events).await;
    });

    let shutdown = CancellationToken::new();
    let (broadcaster, config_rx) = ConfigBroadcaster::new(config.clone());

    apply_ssh_login(&monitor, config.ssh_login.clone(), &shutdown).await;

    let reconciler = tokio::spawn(reconcile(
        Arc::clone(&monitor),
        config_rx,
        shutdown.clone(),
    ));
    let reloader = tokio::spawn(reload_on_sighup(args.config.clone(), broadcaster));

    let _ = ready_tx.send(true);
    info!("Pika agent running. Press Ctrl+C to stop.");
    if !args.no_metrics {
        info!("Metrics available at http://{}/metrics", args.metrics_addr);
    }

    wait_for_shutdown().await?;

    info!("Shutting down...");
    let _ = ready_tx.send(false);
    shutdown.cancel();
    reloader.abort();
    if let Err(e) = reconciler.await {
        error!("Config reconciler failed: {}", e);
    }

    let stopping = Arc::clone(&monitor);
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("monitor shutdown panicked")?;
    response_handle.abort();

    info!("Pika agent stopped.");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl+C")?,
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

/// Start or stop the monitor for `config`. Socket binding and hook
/// installation block, so they run off the async workers.
async fn apply_ssh_login(
    monitor: &Arc<SshLoginMonitor>,
    config: SshLoginConfig,
    shutdown: &CancellationToken,
) {
    let monitor = Arc::clone(monitor);
    let token = shutdown.clone();
    match tokio::task::spawn_blocking(move || monitor.start(&config, &token)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to start SSH login monitor: {}", e),
        Err(e) => error!("SSH login monitor start panicked: {}", e),
    }
}

/// Restart the monitor whenever the `[ssh_login]` section changes.
async fn reconcile(
    monitor: Arc<SshLoginMonitor>,
    mut config_rx: watch::Receiver<Arc<Config>>,
    shutdown: CancellationToken,
) {
    let mut current = config_rx.borrow_and_update().ssh_login.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = config_rx.borrow_and_update().ssh_login.clone();
                if next == current {
                    continue;
                }
                if next.queue_capacity != current.queue_capacity {
                    warn!("queue_capacity changes take effect after an agent restart");
                }
                info!(enabled = next.enabled, "SSH login settings changed, applying");
                apply_ssh_login(&monitor, next.clone(), &shutdown).await;
                current = next;
            }
        }
    }
}

async fn reload_on_sighup(path: PathBuf, mut broadcaster: ConfigBroadcaster) {
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            error!("Failed to set up SIGHUP handler: {}", e);
            return;
        }
    };

    while sighup.recv().await.is_some() {
        info!("Received SIGHUP, reloading config...");
        match Config::load(&path) {
            Ok(config) => {
                if broadcaster.update(config) {
                    let current = broadcaster.current();
                    info!(
                        ssh_login = current.ssh_login.enabled,
                        "Config reloaded successfully"
                    );
                } else {
                    info!("Config unchanged");
                }
            }
            Err(e) => warn!("Failed to reload config: {:#}", e),
        }
    }
}
