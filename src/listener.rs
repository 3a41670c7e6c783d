//! # HTTP Listener Supervisor
//!
//! Owns the lifetime of the actix-web listener.
//!
//! ## Exclusion modes:
//! - **lock**: the listener is started once and runs until shutdown. Uploads and playback
//!   are kept apart by the audio lock alone.
//! - **listener_restart**: an accepted `/play` asks the supervisor to stop the listener.
//!   The supervisor waits until the playback session is over, pauses for
//!   `restart_delay_ms` and binds again. Nobody can upload while the listener is down.
//!
//! Playback sessions run on the main runtime, not on the listener's workers, so stopping
//! the listener never cuts a session short.

use crate::config::ExclusionMode;
use crate::handlers;
use crate::middleware;
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

/// Seconds the listener waits for in-flight requests when it is stopped.
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Handle used by request handlers to reach the supervisor.
#[derive(Debug, Clone)]
pub struct ListenerControl {
    mode: ExclusionMode,
    suspend: Arc<Notify>,
    restarts: Arc<AtomicU64>,
}

impl ListenerControl {
    pub fn new(mode: ExclusionMode) -> Self {
        Self {
            mode,
            suspend: Arc::new(Notify::new()),
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mode(&self) -> ExclusionMode {
        self.mode
    }

    /// Ask for the listener to be taken down for the current playback session.
    ///
    /// Does nothing in lock mode.
    pub fn request_suspend(&self) {
        if self.mode == ExclusionMode::ListenerRestart {
            self.suspend.notify_one();
        }
    }

    /// Number of times the listener has been rebound after a playback session.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    async fn suspended(&self) {
        self.suspend.notified().await
    }
}

/// Create the HTTP server with all its middleware and routes, bound but not yet polled.
fn build_server(state: AppState) -> std::io::Result<Server> {
    let bind_addr = state.config.server.bind_addr();
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware runs in reverse registration order for responses
        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::routes)
    })
    // Signals are handled by main; the supervisor decides when the listener stops
    .disable_signals()
    .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
    .bind(&bind_addr)?
    .run();

    Ok(server)
}

/// Run the listener until `shutdown` resolves or the server exits on its own.
///
/// ## Errors:
/// Fails when the listener cannot bind, on the first start or on any restart.
pub async fn run(state: AppState, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);

    let control = state.listener.clone();
    let bind_addr = state.config.server.bind_addr();

    loop {
        let server = build_server(state.clone())
            .with_context(|| format!("Failed to bind HTTP listener on {}", bind_addr))?;
        let handle = server.handle();
        let mut server_task = tokio::spawn(server);

        info!(addr = %bind_addr, mode = ?control.mode(), "HTTP listener started");

        tokio::select! {
            result = &mut server_task => {
                match result {
                    Ok(Ok(())) => info!("HTTP listener exited"),
                    Ok(Err(e)) => error!("Server error: {}", e),
                    Err(e) => error!("Server task error: {}", e),
                }
                return Ok(());
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping server...");
                handle.stop(true).await;
                return Ok(());
            }
            _ = control.suspended() => {
                info!("Stopping HTTP listener for playback");
                handle.stop(true).await;
                // The socket is released once the server future has finished
                if let Err(e) = server_task.await {
                    error!("Server task error: {}", e);
                }
            }
        }

        tokio::select! {
            _ = state.audio.wait_idle() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received while the listener was down");
                return Ok(());
            }
        }

        tokio::time::sleep(state.config.server.restart_delay()).await;
        control.restarts.fetch_add(1, Ordering::Relaxed);
        info!(restarts = control.restarts(), "Restarting HTTP listener");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{app_state, test_config, RecordingOutput};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_suspend_is_ignored_in_lock_mode() {
        let control = ListenerControl::new(ExclusionMode::Lock);
        control.request_suspend();

        let woke = tokio::time::timeout(Duration::from_millis(20), control.suspended()).await;
        assert!(woke.is_err());
    }

    #[tokio::test]
    async fn test_suspend_wakes_supervisor_in_restart_mode() {
        let control = ListenerControl::new(ExclusionMode::ListenerRestart);
        // Requested before anyone waits: the wakeup is kept
        control.request_suspend();

        let woke = tokio::time::timeout(Duration::from_millis(20), control.suspended()).await;
        assert!(woke.is_ok());
    }

    #[actix_web::test]
    async fn test_listener_rebinds_after_suspend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.port = 0;
        config.server.exclusion = ExclusionMode::ListenerRestart;
        config.server.restart_delay_ms = 1;

        let (output, _tap) = RecordingOutput::new();
        let state = app_state(config, output);
        let control = state.listener.clone();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let supervisor = actix_web::rt::spawn(run(state, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        control.request_suspend();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while control.restarts() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(control.restarts(), 1);

        stop_tx.send(()).unwrap();
        supervisor.await.unwrap().unwrap();
    }

    #[actix_web::test]
    async fn test_shutdown_stops_listener() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.port = 0;

        let (output, _tap) = RecordingOutput::new();
        let state = app_state(config, output);

        let result = run(state, tokio::time::sleep(Duration::from_millis(50))).await;
        assert!(result.is_ok());
    }
}
