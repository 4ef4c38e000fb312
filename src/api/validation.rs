use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

use crate::api::errors::ApiError;

/// Checks an uploaded file's declared name and MIME type against the
/// allowed formats. Either may be missing, but not both.
pub(crate) fn validate_image_upload(
    filename: Option<&str>,
    content_type: Option<&str>,
    allowed_formats: &[String],
) -> Result<(), ApiError> {
    let from_extension = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| canonical_format(&ext.to_ascii_lowercase()));
    let mime = content_type.map(|value| value.trim().to_ascii_lowercase());
    let from_mime = mime.as_deref().and_then(format_for_mime);

    let format = match (from_extension, from_mime) {
        (Some(extension), Some(mime_format)) if extension != mime_format => {
            return Err(ApiError::BadRequest(format!(
                "MIME type '{}' does not match extension '.{extension}'",
                mime.unwrap_or_default()
            )));
        }
        (Some(format), _) | (None, Some(format)) => format,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Image must have a file extension or image content type".to_string(),
            ))
        }
    };

    ensure_allowed(&format, allowed_formats)
}

/// Sniffs the magic bytes and checks size and format.
pub(crate) fn validate_image_bytes(
    bytes: &[u8],
    allowed_formats: &[String],
    max_bytes: usize,
) -> Result<(), ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "Image size exceeds {}MB limit",
            max_bytes / (1024 * 1024)
        )));
    }

    let format = image::guess_format(bytes)
        .ok()
        .and_then(format_name)
        .ok_or_else(|| ApiError::BadRequest("Unrecognised image format".to_string()))?;
    ensure_allowed(format, allowed_formats)
}

/// Accepts plain base64 or a `data:image/...;base64,` URL.
pub(crate) fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(|_| ApiError::BadRequest("Invalid base64 image".to_string()))
}

fn ensure_allowed(format: &str, allowed_formats: &[String]) -> Result<(), ApiError> {
    if allowed_formats.iter().any(|allowed| allowed == format) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Image format '{format}' is not allowed")))
    }
}

fn canonical_format(extension: &str) -> String {
    match extension {
        "jpg" => "jpeg".to_string(),
        other => other.to_string(),
    }
}

fn format_for_mime(mime: &str) -> Option<String> {
    let format = match mime {
        "image/jpeg" | "image/jpg" => "jpeg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => return None,
    };
    Some(format.to_string())
}

fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}
