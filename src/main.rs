use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deskcast::capture::{BroadcastCapture, CaptureManager};
use deskcast::config::AppConfig;
use deskcast::desktop::{DesktopManager, HeadlessDesktop};
use deskcast::session::SessionManager;
use deskcast::state::AppState;
use deskcast::web;
use deskcast::webrtc::WebRtcManager;
use deskcast::websocket::WebSocketManager;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// deskcast command line arguments
#[derive(Parser, Debug)]
#[command(name = "deskcast")]
#[command(version, about = "Shared remote desktop transport server", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE", env = "DESKCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS", env = "DESKCAST_ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT", env = "DESKCAST_PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting deskcast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            AppConfig::load(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI argument overrides to config (only if explicitly specified)
    if let Some(addr) = args.address {
        config.server.bind_address = addr;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let bind_ip: IpAddr = config.server.bind_address.parse()?;
    let bind_addr = SocketAddr::new(bind_ip, config.server.port);

    let desktop: Arc<dyn DesktopManager> = Arc::new(HeadlessDesktop::new(&config.desktop));
    let capture: Arc<dyn CaptureManager> = Arc::new(BroadcastCapture::new(&config.capture)?);
    tracing::info!(
        audio = %config.capture.audio_codec,
        video = %config.capture.video_codec,
        streams = %config.capture.video_ids.join(","),
        "Capture pipeline ready"
    );

    let sessions = SessionManager::new(&config.session);
    tracing::info!("Loaded {} members", sessions.list().len());

    // A mux port that cannot be bound is fatal
    let webrtc = WebRtcManager::new(config.webrtc.clone(), desktop.clone(), capture.clone());
    webrtc.start().await?;

    let websocket = WebSocketManager::new(
        sessions.clone(),
        desktop,
        capture,
        webrtc.clone(),
        config.websocket.clone(),
    );
    websocket.start();

    let state = AppState::new(config, sessions, webrtc, websocket);
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        _ = shutdown_signal => {}
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "deskcast=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "deskcast=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "deskcast=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "deskcast=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "deskcast=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "deskcast=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
