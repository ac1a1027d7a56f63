//! Signaling relay binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Start the relay on the default port
//! cargo run --bin signaling_server
//!
//! # Custom bind address and timing policy
//! cargo run --bin signaling_server -- \
//!   --bind-address 0.0.0.0 \
//!   --port 9030 \
//!   --session-ttl-secs 1800 \
//!   --dedupe-window-ms 500
//! ```

use clap::Parser;
use remotedesk_signaling::{RelayConfig, SignalingServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RemoteDesk signaling relay
///
/// Pairs agent and viewer WebSocket connections under a session id and
/// relays offer/answer/ICE and remote-control input between them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address for the WebSocket listener
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_BIND_ADDRESS")]
    bind_address: String,

    /// Listener port (0 picks an ephemeral port)
    #[arg(long, default_value_t = 9030, env = "RELAY_PORT")]
    port: u16,

    /// Session time-to-live in seconds
    #[arg(long, default_value_t = 1800, env = "RELAY_SESSION_TTL_SECS")]
    session_ttl_secs: u64,

    /// Interval between expiry sweeps in seconds
    #[arg(long, default_value_t = 300, env = "RELAY_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Window for collapsing duplicate commit input events, in ms
    #[arg(long, default_value_t = 500, env = "RELAY_DEDUPE_WINDOW_MS")]
    dedupe_window_ms: u64,

    /// Length of generated session identifiers
    #[arg(long, default_value_t = 8, env = "RELAY_SESSION_ID_LENGTH")]
    session_id_length: usize,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, default_value_t = 0, env = "RELAY_MAX_SESSIONS")]
    max_sessions: usize,
}

fn build_config_from_args(args: &Args) -> RelayConfig {
    RelayConfig {
        bind_address: args.bind_address.clone(),
        port: args.port,
        session_ttl_secs: args.session_ttl_secs,
        sweep_interval_secs: args.sweep_interval_secs,
        dedupe_window_ms: args.dedupe_window_ms,
        session_id_length: args.session_id_length,
        max_sessions: args.max_sessions,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
        eprintln!("Ctrl+C received, shutting down...");
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = build_config_from_args(&args);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address,
        port = config.port,
        session_ttl_secs = config.session_ttl_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        dedupe_window_ms = config.dedupe_window_ms,
        max_sessions = config.max_sessions,
        "Signaling relay starting"
    );

    let server = SignalingServer::new(config)?;
    let router = server.router();
    let handle = server.start().await?;
    info!(addr = %handle.local_addr(), "Signaling relay running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!(
        sessions = router.session_count().await,
        connections = router.connection_count().await,
        "Shutdown signal received, cleaning up"
    );

    handle.shutdown().await;
    info!("Signaling relay shut down gracefully");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
