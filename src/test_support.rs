use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::schemas::grading::{
    DocumentStructure, ExtractionResult, GradeLevel, QuestionSpec, ScoreResult,
};
use crate::services::ai_client::{ChatChoice, ChatClient, ChatCompletion, ChatMessage, ChatOptions};
use crate::services::errors::GradingError;
use crate::services::image_preprocess::RasterImage;
use crate::services::ocr_engine::{OcrEngine, OcrOutput};
use crate::services::scoring::ScoringEngine;
use crate::services::text_extraction::TextExtractionService;
use crate::tasks::events::{PipelineEvent, PipelineObserver};
use crate::tasks::pipeline::{GradingPipeline, PipelineOptions};

pub(crate) const MOCK_SCORE_RESPONSE: &str =
    r#"{"score": 8, "confidence": 0.9, "feedback": "Correct method", "strengths": ["setup"]}"#;

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("SCANGRADE_ENV", "test");
    std::env::set_var("SCANGRADE_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "OPENAI_API_KEY",
        "AI_MODEL",
        "AI_SECONDARY_MODEL",
        "OCR_API_URL",
        "OCR_API_KEY",
        "MAX_FILE_SIZE_MB",
        "MAX_BATCH_BODY_MB",
        "ALLOWED_IMAGE_FORMATS",
        "CONFIDENCE_THRESHOLD",
        "DUAL_MODEL_VALIDATION",
        "MAX_CONCURRENT",
        "RESULT_CACHE_CAPACITY",
        "PREPROCESS_MAX_SIZE",
        "PREPROCESS_MAX_WIDTH",
        "ENHANCE_OCR",
        "MATH_OPTIMIZATION",
        "CHINESE_PUNCTUATION",
        "API_V1_STR",
        "PROJECT_NAME",
        "VERSION",
    ] {
        std::env::remove_var(key);
    }
}

/// App state backed by a mock OCR engine and a scripted model.
pub(crate) fn test_state(settings: Settings) -> AppState {
    let pipeline = GradingPipeline::new(
        TextExtractionService::new(Some(Arc::new(MockOcrEngine::with_text("2x = 4\nx = 2")))),
        scoring_engine(ScriptedChatClient::repeating("primary", MOCK_SCORE_RESPONSE)),
        PipelineOptions::from_settings(&settings),
        settings.grading().result_cache_capacity,
    );
    AppState::new(settings, Arc::new(pipeline))
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let state = test_state(settings);
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

pub(crate) fn fixed_clock() -> OffsetDateTime {
    datetime!(2024-03-01 09:30:00 UTC)
}

pub(crate) fn sample_image() -> RasterImage {
    sample_image_with_width(8)
}

/// Small RGBA gradient; the width doubles as an identity in mock engines.
pub(crate) fn sample_image_with_width(width: u32) -> RasterImage {
    let height = 6;
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = ((x * 31 + y * 17) % 256) as u8;
            pixels.extend_from_slice(&[value, value / 2, 255 - value, 255]);
        }
    }
    RasterImage::new(width, height, pixels).expect("sample image")
}

pub(crate) fn sample_png() -> Vec<u8> {
    sample_image().encode_png().expect("png")
}

pub(crate) fn sample_question(id: &str, total_score: f64) -> QuestionSpec {
    QuestionSpec {
        id: id.to_string(),
        standard_answer: "x = 2".to_string(),
        total_score,
        question_type: "short_answer".to_string(),
        grading_points: Vec::new(),
    }
}

pub(crate) fn extraction_with_text(text: &str) -> ExtractionResult {
    ExtractionResult {
        text: text.to_string(),
        confidence: 90.0,
        lines: Vec::new(),
        words: Vec::new(),
        structure: DocumentStructure::default(),
        engine: "mock".to_string(),
        language: "eng".to_string(),
        fallback: false,
    }
}

pub(crate) fn score_result(score: f64, confidence: f64) -> ScoreResult {
    ScoreResult {
        score,
        max_score: 10.0,
        confidence,
        grade_level: GradeLevel::from_percentage(score * 10.0),
        needs_review: false,
        feedback: String::new(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        suggestions: Vec::new(),
        grading_details: Vec::new(),
        model: "mock".to_string(),
        timestamp: fixed_clock(),
        primary: None,
        secondary: None,
        comparison: None,
    }
}

pub(crate) fn scoring_engine(client: ScriptedChatClient) -> ScoringEngine {
    ScoringEngine::new(Arc::new(client), None, ChatOptions { temperature: 0.3, max_tokens: 500 })
        .with_clock(fixed_clock)
}

pub(crate) fn build_pipeline(
    engine: Option<MockOcrEngine>,
    client: ScriptedChatClient,
) -> GradingPipeline {
    let engine = engine.map(|engine| Arc::new(engine) as Arc<dyn OcrEngine>);
    GradingPipeline::new(
        TextExtractionService::new(engine),
        scoring_engine(client),
        PipelineOptions::default(),
        16,
    )
}

/// OCR stand-in. Tracks calls and peak concurrency; can fail every call or
/// only images of a given width.
pub(crate) struct MockOcrEngine {
    text: String,
    fail_all: bool,
    fail_width: Option<u32>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockOcrEngine {
    pub(crate) fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail_all: false,
            fail_width: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self { fail_all: true, ..Self::with_text("") }
    }

    pub(crate) fn failing_on_width(mut self, width: u32) -> Self {
        self.fail_width = Some(width);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn peak_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn recognize(
        &self,
        image_bytes: &[u8],
        _language: &str,
    ) -> Result<OcrOutput, GradingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all {
            return Err(GradingError::OcrEngine("mock engine offline".to_string()));
        }
        if let Some(width) = self.fail_width {
            let image = RasterImage::decode(image_bytes)?;
            if image.width() == width {
                return Err(GradingError::OcrEngine(format!("mock failure for width {width}")));
            }
        }

        Ok(OcrOutput { text: self.text.clone(), confidence: 92.0, ..OcrOutput::default() })
    }
}

/// Chat stand-in that replays scripted responses in order. `repeating`
/// answers every call with the same content.
pub(crate) struct ScriptedChatClient {
    model: String,
    responses: std::sync::Mutex<Vec<Result<String, GradingError>>>,
    repeat: Option<String>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedChatClient {
    pub(crate) fn new(model: &str, mut responses: Vec<Result<String, GradingError>>) -> Self {
        responses.reverse();
        Self {
            model: model.to_string(),
            responses: std::sync::Mutex::new(responses),
            repeat: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn repeating(model: &str, content: &str) -> Self {
        Self { repeat: Some(content.to_string()), ..Self::new(model, Vec::new()) }
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn prompt_log(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: ChatOptions,
    ) -> Result<ChatCompletion, GradingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().rev().find(|message| message.role == "user") {
            self.prompts.lock().unwrap().push(user.content.clone());
        }

        let next = match &self.repeat {
            Some(content) => Ok(content.clone()),
            None => self.responses.lock().unwrap().pop().unwrap_or_else(|| {
                Err(GradingError::ScoringService("no scripted response left".to_string()))
            }),
        };

        next.map(|content| ChatCompletion {
            choices: vec![ChatChoice {
                message: ChatMessage { role: "assistant".to_string(), content },
            }],
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineObserver for RecordingObserver {
    fn notify(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

/// Text parts are `(name, value)`; the file part is sent as `image`.
pub(crate) fn multipart_request(
    uri: &str,
    image: Option<(&str, &str, Vec<u8>)>,
    fields: &[(&str, String)],
) -> Request<Body> {
    const BOUNDARY: &str = "scangrade-test-boundary";
    let mut body: Vec<u8> = Vec::new();

    if let Some((filename, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n");
    }

    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .expect("multipart request")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
