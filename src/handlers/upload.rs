//! `POST /upload`: stream a request body into the single upload slot.
//!
//! Accepts either a `multipart/form-data` body (the first field carrying a file name is
//! stored, as sent by the UI form) or a raw body of any other content type. The audio
//! lock is held from before the first byte is written until the slot has been replaced
//! or the upload abandoned.

use crate::audio::UploadSession;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::debug;

pub async fn upload(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let mut session = state.audio.begin_upload().await?;

    let received = if is_multipart(&req) {
        receive_multipart(&req, payload, &mut session).await
    } else {
        receive_raw(payload, &mut session).await
    };

    if let Err(e) = received {
        session.abort().await;
        return Err(e);
    }

    let receipt = session.finish().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "uploaded",
        "file": receipt.file,
        "bytes": receipt.bytes,
        "sha256": receipt.sha256
    })))
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn receive_raw(mut payload: web::Payload, session: &mut UploadSession) -> AppResult<()> {
    while let Some(chunk) = payload.next().await {
        let chunk = chunk
            .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;
        session.write_chunk(&chunk).await?;
    }
    debug!(bytes = session.bytes_written(), "Raw upload body received");
    Ok(())
}

async fn receive_multipart(
    req: &HttpRequest,
    payload: web::Payload,
    session: &mut UploadSession,
) -> AppResult<()> {
    let mut multipart = Multipart::new(req.headers(), payload);

    while let Some(field) = multipart.next().await {
        let mut field = field?;

        let is_file = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .is_some();

        if !is_file {
            debug!(field = ?field.name(), "Skipping form field without a file");
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        }

        while let Some(chunk) = field.next().await {
            session.write_chunk(&chunk?).await?;
        }
        return Ok(());
    }

    Err(AppError::BadRequest("Multipart body has no file field".to_string()))
}
