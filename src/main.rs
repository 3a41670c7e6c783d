//! # WAV Playback Server - Main Application Entry Point
//!
//! A small HTTP service that stores one uploaded WAV file and plays it out through an
//! I2S transmitter on request.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **storage**: the mounted directory holding the upload slot and the UI page
//! - **audio**: output interface, playback engine and the session coordinator
//! - **state**: shared state handed to every request handler
//! - **handlers**: upload, play, status, config and the UI page
//! - **health**: health check and metrics endpoints
//! - **middleware**: request logging and per-endpoint metrics
//! - **listener**: starts the HTTP listener and restarts it in listener-restart mode
//! - **error**: application error type and its HTTP mapping

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod listener;
mod middleware;
mod state;
mod storage;

use anyhow::{Context, Result};
use audio::{AudioSubsystem, I2sTransmitter};
use config::AppConfig;
use listener::ListenerControl;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use storage::Storage;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Mounts storage**; failing to do so ends the process
/// 3. **Installs the I2S transmitter** and builds the audio subsystem around it
/// 4. **Runs the HTTP listener** until a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        addr = %config.server.bind_addr(),
        exclusion = ?config.server.exclusion,
        "Configuration loaded"
    );

    let storage = Storage::mount(&config.storage.root_dir).context("Storage mount failed")?;

    let transmitter = I2sTransmitter::install(&config.audio);
    let audio = AudioSubsystem::new(
        storage.clone(),
        Box::new(transmitter),
        &config,
        Handle::current(),
    );

    let listener_control = ListenerControl::new(config.server.exclusion);
    let app_state = AppState::new(config, storage, audio, listener_control);

    setup_signal_handlers()?;

    if let Err(e) = listener::run(app_state.clone(), wait_for_shutdown()).await {
        error!("HTTP listener failed: {:#}", e);
        return Err(e);
    }

    if app_state.audio.is_playing() {
        info!("Waiting for the current playback session to finish");
        app_state.audio.wait_idle().await;
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout, filtered by `RUST_LOG`.
///
/// Defaults to `wav_playback_server=debug,actix_web=info` when `RUST_LOG` is not set.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wav_playback_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise tracing")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on either.
fn setup_signal_handlers() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });

    Ok(())
}

/// Resolves once the shutdown flag is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
