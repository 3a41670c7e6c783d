//! # HTTP Handlers
//!
//! The service front-end: a UI page, the upload endpoint, playback control and the
//! read-only status/config views. Health and metrics live in [`crate::health`].

pub mod config;
pub mod playback;
pub mod ui;
pub mod upload;

pub use config::get_config;
pub use playback::{play, status};
pub use ui::index;
pub use upload::upload;

use crate::health;
use actix_web::web;

/// Register every route of the service.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/upload", web::post().to(upload))
        .route("/play", web::get().to(play))
        .route("/status", web::get().to(status))
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(get_config)),
        );
}
