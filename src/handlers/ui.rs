use crate::state::AppState;
use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use std::io;
use tracing::{debug, warn};

/// Page served when the storage root has no index document of its own.
const BUILTIN_INDEX: &str = include_str!("../../static/index.html");

/// The UI document: `<root_dir>/<index_file>` when present, the built-in page otherwise.
pub async fn index(state: web::Data<AppState>) -> HttpResponse {
    let page = match state.storage.read(&state.config.storage.index_file).await {
        Ok(page) => page,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No index document in storage, serving the built-in page");
            BUILTIN_INDEX.as_bytes().to_vec()
        }
        Err(e) => {
            warn!(error = %e, "Failed to read index document, serving the built-in page");
            BUILTIN_INDEX.as_bytes().to_vec()
        }
    };

    HttpResponse::Ok().content_type(ContentType::html()).body(page)
}
