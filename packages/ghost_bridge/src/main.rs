use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ghost_bridge::lifecycle::{self, ConnectedBadges};
use ghost_bridge::{Bridge, BridgeConfig, FileSettings, HeadlessEditor};
use ghost_session::MemoryEditor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "ghost-bridge")]
#[command(about = "Edit browser text fields in a local editor (GhostText server)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.ghost-bridge)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Port to listen on (overrides config.toml and GHOST_SERVER__PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML and exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BridgeConfig::new(cli.data_dir.clone())?;
    let settings = Arc::new(
        FileSettings::load(&config, cli.port)
            .with_context(|| format!("Failed to load {:?}", config.config_toml_path()))?,
    );

    match cli.command {
        Some(Commands::PrintConfig) => {
            let rendered = toml::to_string_pretty(&settings.snapshot())
                .context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
        None => run_server(cli.debug, config, settings).await,
    }
}

async fn run_server(debug: bool, config: BridgeConfig, settings: Arc<FileSettings>) -> Result<()> {
    // Setup logging
    let default_directive = if debug {
        "ghost_bridge=debug,ghost_session=debug,tower_http=debug,info"
    } else {
        "ghost_bridge=info,ghost_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting GhostText bridge (data dir {:?})", config.data_dir);

    let focus_settings = settings.clone();
    let editor = HeadlessEditor::new(MemoryEditor::new(), move || focus_settings.focus_app());
    let bridge = Bridge::new(Arc::new(editor), settings.clone(), settings.check_origin());

    let background = CancellationToken::new();
    let _badges = ConnectedBadges::attach(bridge.registry().clone());
    tokio::spawn(lifecycle::run_status_indicator(
        bridge.listener().state(),
        bridge.registry().clone(),
        background.clone(),
    ));
    tokio::spawn(lifecycle::log_registry_events(
        bridge.registry().clone(),
        background.clone(),
    ));

    // A busy port is not fatal: the status shows it and a reload may fix it.
    if let Err(e) = bridge.start().await {
        warn!("Listener not started: {}", e);
    }

    wait_for_signals(&bridge, &settings).await?;

    info!("Received shutdown signal, cleaning up...");
    bridge.shutdown().await;
    background.cancel();
    info!("Shutdown complete");
    Ok(())
}

/// Reload on SIGHUP until Ctrl-C.
#[cfg(unix)]
async fn wait_for_signals(bridge: &Bridge, settings: &FileSettings) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                return Ok(());
            }
            _ = hangup.recv() => reload(bridge, settings).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_bridge: &Bridge, _settings: &FileSettings) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")
}

#[cfg(unix)]
async fn reload(bridge: &Bridge, settings: &FileSettings) {
    info!("Reloading configuration");
    if let Err(e) = settings.reload() {
        warn!("Keeping previous configuration: {}", e);
        return;
    }
    bridge.listener().set_check_origin(settings.check_origin());
    match bridge.apply_settings().await {
        Ok(Some(port)) => info!(port, "listener moved"),
        Ok(None) => {}
        Err(e) => warn!("Listener not restarted: {}", e),
    }
}
