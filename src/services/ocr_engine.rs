use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::core::config::Settings;
use crate::schemas::grading::OcrSpan;
use crate::services::errors::GradingError;

/// Raw engine output, before post-processing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct OcrOutput {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) lines: Vec<OcrSpan>,
    #[serde(default)]
    pub(crate) words: Vec<OcrSpan>,
}

#[async_trait]
pub(crate) trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image_bytes: &[u8], language: &str)
        -> Result<OcrOutput, GradingError>;
}

/// OCR over HTTP: multipart submit, optionally followed by polling the
/// returned `request_check_url` until the job completes.
#[derive(Debug, Clone)]
pub(crate) struct HttpOcrEngine {
    client: Client,
    api_url: String,
    api_key: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_submit_retries: u32,
}

impl HttpOcrEngine {
    /// Returns `None` when no OCR endpoint is configured.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        let ocr = settings.ocr();
        if ocr.api_url.is_empty() {
            return Ok(None);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(ocr.timeout_seconds))
            .build()
            .map_err(|err| anyhow::anyhow!(err).context("Failed to build OCR HTTP client"))?;

        Ok(Some(Self {
            client,
            api_url: ocr.api_url.trim_end_matches('/').to_string(),
            api_key: ocr.api_key.clone(),
            poll_interval: Duration::from_secs(ocr.poll_interval_seconds),
            max_poll_attempts: ocr.max_poll_attempts,
            max_submit_retries: ocr.max_submit_retries,
        }))
    }

    async fn submit(&self, image_bytes: &[u8], language: &str) -> Result<Value, GradingError> {
        let mut last_error = None;

        for attempt in 0..=self.max_submit_retries {
            let part = Part::bytes(image_bytes.to_vec())
                .file_name("page.png")
                .mime_str("image/png")
                .map_err(|err| GradingError::OcrEngine(format!("invalid upload part: {err}")))?;
            let form = Form::new().part("file", part).text("language", language.to_string());

            let response = self
                .client
                .post(&self.api_url)
                .header("X-Api-Key", &self.api_key)
                .multipart(form)
                .send()
                .await;

            let error = match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = read_json(resp).await;
                    match classify_submit(status, body) {
                        SubmitOutcome::Accepted(body) => return Ok(body),
                        SubmitOutcome::Rejected(err) => return Err(err),
                        SubmitOutcome::Retry(err) => err,
                    }
                }
                Err(err) => GradingError::OcrEngine(format!("failed to call OCR API: {err}")),
            };
            tracing::warn!(attempt, error = %error, "OCR submit attempt failed");
            last_error = Some(error);

            if attempt < self.max_submit_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| GradingError::OcrEngine("unknown OCR submit error".into())))
    }

    async fn poll(&self, check_url: &str) -> Result<Value, GradingError> {
        for attempt in 0..self.max_poll_attempts {
            let response = self
                .client
                .get(check_url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await
                .map_err(|err| GradingError::OcrEngine(format!("failed to poll OCR job: {err}")))?;

            let status_code = response.status();
            let body = read_json(response).await?;
            if !status_code.is_success() {
                return Err(GradingError::OcrEngine(format!(
                    "OCR poll failed (status {status_code}): {}",
                    extract_error_message(&body)
                )));
            }

            match job_status(&body).as_str() {
                "complete" | "completed" => return Ok(body),
                "failed" | "error" => {
                    return Err(GradingError::OcrEngine(format!(
                        "OCR job failed: {}",
                        extract_error_message(&body)
                    )))
                }
                _ => {}
            }

            if attempt + 1 < self.max_poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(GradingError::OcrEngine(format!(
            "OCR polling timed out after {} attempts",
            self.max_poll_attempts
        )))
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn recognize(
        &self,
        image_bytes: &[u8],
        language: &str,
    ) -> Result<OcrOutput, GradingError> {
        let submitted = self.submit(image_bytes, language).await?;
        let body = match submitted.get("request_check_url").and_then(Value::as_str) {
            Some(url) => {
                let url = resolve_check_url(&self.api_url, url);
                self.poll(&url).await?
            }
            None => submitted,
        };
        parse_output(&body)
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, GradingError> {
    let raw = response
        .text()
        .await
        .map_err(|err| GradingError::OcrEngine(format!("failed to read OCR response: {err}")))?;
    serde_json::from_str(&raw)
        .map_err(|err| GradingError::OcrEngine(format!("OCR returned non-JSON body: {err}: {raw}")))
}

#[derive(Debug)]
enum SubmitOutcome {
    Accepted(Value),
    Retry(GradingError),
    Rejected(GradingError),
}

/// Client errors other than 429 are final; server errors, rate limits and
/// unreadable bodies are retried.
fn classify_submit(status: StatusCode, body: Result<Value, GradingError>) -> SubmitOutcome {
    let body = match body {
        Ok(body) => body,
        Err(err) if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
            return SubmitOutcome::Rejected(GradingError::OcrEngine(format!(
                "OCR submit rejected (status {status}): {err}"
            )))
        }
        Err(err) => {
            return SubmitOutcome::Retry(GradingError::OcrEngine(format!(
                "OCR submit failed (status {status}): {err}"
            )))
        }
    };

    if status.is_success() && !reports_failure(&body) {
        return SubmitOutcome::Accepted(body);
    }

    let message = extract_error_message(&body);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        SubmitOutcome::Rejected(GradingError::OcrEngine(format!(
            "OCR submit rejected (status {status}): {message}"
        )))
    } else {
        SubmitOutcome::Retry(GradingError::OcrEngine(format!(
            "OCR submit failed (status {status}): {message}"
        )))
    }
}

fn reports_failure(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool).is_some_and(|value| !value)
}

fn job_status(body: &Value) -> String {
    body.get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

fn resolve_check_url(api_url: &str, raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    let base = format!("{}/", api_url.trim_end_matches('/'));
    reqwest::Url::parse(&base)
        .ok()
        .and_then(|base| base.join(raw).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| format!("{base}{}", raw.trim_start_matches('/')))
}

pub(crate) fn parse_output(body: &Value) -> Result<OcrOutput, GradingError> {
    let container = body.get("result").unwrap_or(body);
    let output: OcrOutput = serde_json::from_value(container.clone())
        .map_err(|err| GradingError::OcrEngine(format!("unexpected OCR payload: {err}")))?;
    Ok(output)
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail").and_then(Value::as_str) {
        return detail.to_string();
    }
    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_output_reads_nested_result() {
        let body = json!({
            "status": "complete",
            "result": {
                "text": "x = 2",
                "confidence": 91.5,
                "lines": [{"text": "x = 2", "confidence": 91.5,
                           "bbox": {"x": 1, "y": 2, "width": 30, "height": 8}}],
                "words": []
            }
        });
        let output = parse_output(&body).expect("output");
        assert_eq!(output.text, "x = 2");
        assert_eq!(output.lines[0].bbox.width, 30.0);
    }

    #[test]
    fn parse_output_rejects_malformed_spans() {
        let body = json!({"text": "a", "lines": [{"confidence": 3}]});
        assert!(matches!(parse_output(&body), Err(GradingError::OcrEngine(_))));
    }

    #[test]
    fn resolve_check_url_joins_relative_paths() {
        assert_eq!(
            resolve_check_url("https://ocr.example.com/api/v1", "jobs/42"),
            "https://ocr.example.com/api/v1/jobs/42"
        );
        assert_eq!(resolve_check_url("https://a.example", "https://b.example/x"), "https://b.example/x");
    }

    #[test]
    fn submit_retries_gateway_errors_with_html_bodies() {
        let html = Err(GradingError::OcrEngine("OCR returned non-JSON body: <html>".into()));
        assert!(matches!(
            classify_submit(StatusCode::BAD_GATEWAY, html),
            SubmitOutcome::Retry(GradingError::OcrEngine(_))
        ));
        assert!(matches!(
            classify_submit(StatusCode::SERVICE_UNAVAILABLE, Ok(json!({"detail": "busy"}))),
            SubmitOutcome::Retry(_)
        ));
        assert!(matches!(
            classify_submit(StatusCode::TOO_MANY_REQUESTS, Ok(json!({}))),
            SubmitOutcome::Retry(_)
        ));
    }

    #[test]
    fn submit_gives_up_on_client_errors() {
        match classify_submit(StatusCode::UNAUTHORIZED, Ok(json!({"detail": "bad key"}))) {
            SubmitOutcome::Rejected(err) => assert!(err.to_string().contains("bad key")),
            other => panic!("expected rejection, got {other:?}"),
        }
        let html = Err(GradingError::OcrEngine("non-JSON".into()));
        assert!(matches!(classify_submit(StatusCode::NOT_FOUND, html), SubmitOutcome::Rejected(_)));
    }

    #[test]
    fn submit_accepts_successful_json() {
        assert!(matches!(
            classify_submit(StatusCode::OK, Ok(json!({"request_check_url": "jobs/1"}))),
            SubmitOutcome::Accepted(_)
        ));
        assert!(matches!(
            classify_submit(StatusCode::OK, Ok(json!({"success": false, "error": "busy"}))),
            SubmitOutcome::Retry(_)
        ));
    }

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(extract_error_message(&json!({"detail": "quota", "error": "x"})), "quota");
        assert_eq!(extract_error_message(&json!({})), "unknown_error");
    }
}
