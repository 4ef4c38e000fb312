use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::validation::{decode_base64_image, validate_image_bytes, validate_image_upload};
use crate::core::{config::UploadSettings, state::AppState};
use crate::schemas::grading::{
    BatchGradeRequest, BatchReport, BatchStatusResponse, GradingOptions, ItemOutcome,
    QuestionSpec, ScoreResult,
};
use crate::services::image_preprocess::ImageSource;
use crate::tasks::events::TracingObserver;

pub(super) async fn grade_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ItemOutcome>, ApiError> {
    let upload = state.settings().upload();
    let max_bytes = upload.max_file_size_bytes();

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut question: Option<QuestionSpec> = None;
    let mut options = GradingOptions::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                filename = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let mut bytes = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|_| ApiError::BadRequest("Failed to read image".to_string()))?
                {
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "Image size exceeds {}MB limit",
                            upload.max_file_size_mb
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                file_bytes = Some(bytes);
            }
            "question" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("Invalid question field".to_string()))?;
                question = Some(serde_json::from_str(&text).map_err(|err| {
                    ApiError::BadRequest(format!("Question must be valid JSON: {err}"))
                })?);
            }
            "options" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("Invalid options field".to_string()))?;
                if !text.trim().is_empty() {
                    options = serde_json::from_str(&text).map_err(|err| {
                        ApiError::BadRequest(format!("Options must be valid JSON: {err}"))
                    })?;
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::BadRequest("Image file is required".to_string()))?;
    let question =
        question.ok_or_else(|| ApiError::BadRequest("Question is required".to_string()))?;
    question.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    options.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    validate_image_upload(filename.as_deref(), content_type.as_deref(), &upload.allowed_formats)?;
    validate_image_bytes(&bytes, &upload.allowed_formats, max_bytes)?;

    // Decoding happens in the preprocess stage, so a corrupt image becomes a failed item.
    let pipeline = state.pipeline();
    let resolved = pipeline.defaults().with_overrides(&options);
    let outcome = pipeline
        .process_item(0, ImageSource::Encoded(bytes), &question, &resolved, &TracingObserver)
        .await;

    Ok(Json(outcome))
}

pub(super) async fn grade_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchGradeRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let BatchGradeRequest { images, questions, options } = payload;
    let upload = state.settings().upload().clone();
    let images = tokio::task::spawn_blocking(move || check_batch_images(&images, &upload))
        .await
        .map_err(|err| ApiError::internal(err, "Image check task failed"))??;

    let batch = Arc::clone(state.batch());
    if batch.state().is_terminal() {
        batch.reset()?;
    }

    // Detached so a dropped connection cannot leave the runner stuck in `running`.
    let report = tokio::spawn(async move {
        batch.process_many(images, &questions, &options, &TracingObserver).await
    })
    .await
    .map_err(|err| ApiError::internal(err, "Batch task failed"))??;

    Ok(Json(report))
}

pub(super) async fn batch_status(State(state): State<AppState>) -> Json<BatchStatusResponse> {
    Json(state.batch().status())
}

pub(super) async fn pause_batch(
    State(state): State<AppState>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    state.batch().pause()?;
    Ok(Json(state.batch().status()))
}

pub(super) async fn resume_batch(
    State(state): State<AppState>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    state.batch().resume()?;
    Ok(Json(state.batch().status()))
}

pub(super) async fn cancel_batch(
    State(state): State<AppState>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    state.batch().cancel()?;
    Ok(Json(state.batch().status()))
}

pub(super) async fn get_result(
    Path(question_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ScoreResult>, ApiError> {
    state
        .pipeline()
        .cached_result(&question_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No result stored for question '{question_id}'")))
}

pub(super) async fn delete_result(
    Path(question_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .pipeline()
        .remove_result(&question_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiError::NotFound(format!("No result stored for question '{question_id}'")))
}

pub(super) async fn clear_results(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.pipeline().clear_cache().await;
    tracing::info!(cleared, "Result cache cleared");
    Json(serde_json::json!({ "cleared": cleared }))
}

/// Base64, size and format are request-shape checks. Pixel decoding is
/// left to the pipeline so it fails per item.
fn check_batch_images(
    encoded: &[String],
    upload: &UploadSettings,
) -> Result<Vec<ImageSource>, ApiError> {
    let max_bytes = upload.max_file_size_bytes();
    encoded
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let bytes = decode_base64_image(value).map_err(|err| err.for_item(index))?;
            validate_image_bytes(&bytes, &upload.allowed_formats, max_bytes)
                .map_err(|err| err.for_item(index))?;
            Ok(ImageSource::Encoded(bytes))
        })
        .collect()
}
