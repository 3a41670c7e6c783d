use crate::{audio::OutputFormat, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. Read-only: it is fixed for the life of the process.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.config.as_ref();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config,
        "derived": {
            "output_format": OutputFormat::from(&config.audio),
            "bytes_per_frame": config.audio.bytes_per_frame(),
            "byte_rate": config.audio.byte_rate(),
            "dma_capacity_bytes": config.audio.dma_capacity_bytes(),
            "staging_file": config.storage.staging_file()
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{app_state, test_config, RecordingOutput};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config_reports_audio_setup() {
        let dir = tempfile::tempdir().unwrap();
        let (output, _tap) = RecordingOutput::new();
        let state = app_state(test_config(dir.path()), output);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["audio"]["sample_rate"], 11025);
        assert_eq!(body["config"]["server"]["exclusion"], "lock");
        assert_eq!(body["derived"]["dma_capacity_bytes"], 1024);
        assert_eq!(body["derived"]["staging_file"], "uploaded.wav.part");
    }
}
