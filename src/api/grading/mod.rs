mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::core::{config::Settings, state::AppState};

/// Multipart overhead on top of the image itself.
const MULTIPART_SLACK_BYTES: usize = 64 * 1024;

pub(crate) fn router(settings: &Settings) -> Router<AppState> {
    let upload = settings.upload();
    let grade_limit = upload.max_file_size_bytes().saturating_add(MULTIPART_SLACK_BYTES);

    Router::new()
        .route(
            "/grade",
            post(handlers::grade_single).layer(DefaultBodyLimit::max(grade_limit)),
        )
        .route(
            "/batch",
            post(handlers::grade_batch)
                .layer(DefaultBodyLimit::max(upload.max_batch_body_bytes())),
        )
        .route("/batch/status", get(handlers::batch_status))
        .route("/batch/pause", post(handlers::pause_batch))
        .route("/batch/resume", post(handlers::resume_batch))
        .route("/batch/cancel", post(handlers::cancel_batch))
        .route("/results", delete(handlers::clear_results))
        .route(
            "/results/:question_id",
            get(handlers::get_result).delete(handlers::delete_result),
        )
}
