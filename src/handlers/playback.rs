use crate::audio::PlaybackAdmission;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /play`: start a playback session, or 409 if one is already running.
///
/// Answers as soon as the session is admitted; playback continues in the background.
pub async fn play(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    match state.audio.request_playback() {
        PlaybackAdmission::Accepted { session, .. } => {
            state.listener.request_suspend();

            Ok(HttpResponse::Ok().json(json!({
                "status": "accepted",
                "session_id": session.id,
                "file": session.file,
                "requested_at": session.requested_at.to_rfc3339()
            })))
        }
        PlaybackAdmission::Conflict { active } => Err(AppError::Conflict(format!(
            "Playback session {} is already active",
            active.id
        ))),
    }
}

/// `GET /status`: the active session, if any, and the report of the last finished one.
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    let audio = state.audio.status();
    let stored_bytes = state.storage.size(state.audio.upload_file()).await.ok().flatten();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "playing": audio.active.is_some(),
        "active_session": audio.active,
        "last_report": audio.last_report,
        "stored_file": {
            "name": state.audio.upload_file(),
            "bytes": stored_bytes
        },
        "counters": audio.counters
    }))
}
