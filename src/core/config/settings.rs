use super::parsing::{
    env_flag, env_optional, env_or_default, is_supported_image_format, parse_bool,
    parse_cors_origins, parse_environment, parse_f64, parse_format_list, parse_u32, parse_u64,
    parse_usize, SUPPORTED_IMAGE_FORMATS,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, GradingSettings, OcrSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
    UploadSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("SCANGRADE_HOST", "0.0.0.0");
        let port = env_or_default("SCANGRADE_PORT", "8000");

        let environment = parse_environment(
            env_optional("SCANGRADE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("SCANGRADE_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Scangrade API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let openai_api_key = env_or_default("OPENAI_API_KEY", "");
        let openai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let model = env_or_default("AI_MODEL", "gpt-4o");
        let secondary_model = env_optional("AI_SECONDARY_MODEL");
        let max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "2000"))?;
        let temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.3"))?;
        let request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "120"))?;

        let ocr_api_url = env_or_default("OCR_API_URL", "");
        let ocr_api_key = env_or_default("OCR_API_KEY", "");
        let ocr_timeout_seconds =
            parse_u64("OCR_TIMEOUT_SECONDS", env_or_default("OCR_TIMEOUT_SECONDS", "60"))?;
        let ocr_poll_interval_seconds = parse_u64(
            "OCR_POLL_INTERVAL_SECONDS",
            env_or_default("OCR_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let ocr_max_poll_attempts =
            parse_u32("OCR_MAX_POLL_ATTEMPTS", env_or_default("OCR_MAX_POLL_ATTEMPTS", "60"))?;
        let ocr_max_submit_retries =
            parse_u32("OCR_MAX_SUBMIT_RETRIES", env_or_default("OCR_MAX_SUBMIT_RETRIES", "2"))?;
        let ocr_default_language = env_or_default("OCR_DEFAULT_LANGUAGE", "eng");

        let max_file_size_mb =
            parse_u64("MAX_FILE_SIZE_MB", env_or_default("MAX_FILE_SIZE_MB", "10"))?;
        let max_batch_body_mb =
            parse_u64("MAX_BATCH_BODY_MB", env_or_default("MAX_BATCH_BODY_MB", "64"))?;
        let allowed_formats =
            parse_format_list(env_optional("ALLOWED_IMAGE_FORMATS"), SUPPORTED_IMAGE_FORMATS);

        let confidence_threshold =
            parse_f64("CONFIDENCE_THRESHOLD", env_or_default("CONFIDENCE_THRESHOLD", "0.8"))?;
        let dual_model_validation = env_flag("DUAL_MODEL_VALIDATION", false);
        let max_concurrent =
            parse_usize("MAX_CONCURRENT", env_or_default("MAX_CONCURRENT", "3"))?;
        let result_cache_capacity = parse_usize(
            "RESULT_CACHE_CAPACITY",
            env_or_default("RESULT_CACHE_CAPACITY", "256"),
        )?;
        let preprocess_max_size =
            parse_u32("PREPROCESS_MAX_SIZE", env_or_default("PREPROCESS_MAX_SIZE", "2048"))?;
        let preprocess_max_width = env_optional("PREPROCESS_MAX_WIDTH")
            .map(|value| parse_u32("PREPROCESS_MAX_WIDTH", value))
            .transpose()?;
        let enhance_ocr = env_flag("ENHANCE_OCR", true);
        let math_optimization = env_flag("MATH_OPTIMIZATION", true);
        let chinese_punctuation = env_flag("CHINESE_PUNCTUATION", false);

        let log_level = env_or_default("SCANGRADE_LOG_LEVEL", "info");
        let json = env_flag("SCANGRADE_LOG_JSON", false);
        let prometheus_enabled = env_flag("PROMETHEUS_ENABLED", false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                model,
                secondary_model,
                max_tokens,
                temperature,
                request_timeout,
            },
            ocr: OcrSettings {
                api_url: ocr_api_url,
                api_key: ocr_api_key,
                timeout_seconds: ocr_timeout_seconds,
                poll_interval_seconds: ocr_poll_interval_seconds,
                max_poll_attempts: ocr_max_poll_attempts,
                max_submit_retries: ocr_max_submit_retries,
                default_language: ocr_default_language,
            },
            upload: UploadSettings { max_file_size_mb, max_batch_body_mb, allowed_formats },
            grading: GradingSettings {
                confidence_threshold,
                dual_model_validation,
                max_concurrent,
                result_cache_capacity,
                preprocess_max_size,
                preprocess_max_width,
                enhance_ocr,
                math_optimization,
                chinese_punctuation,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn upload(&self) -> &UploadSettings {
        &self.upload
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.allowed_formats.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_IMAGE_FORMATS",
                value: String::from("<empty>"),
            });
        }

        for format in &self.upload.allowed_formats {
            if !is_supported_image_format(format) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_IMAGE_FORMATS",
                    value: format.clone(),
                });
            }
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_FILE_SIZE_MB",
                value: "0".to_string(),
            });
        }

        if self.upload.max_batch_body_mb < self.upload.max_file_size_mb {
            return Err(ConfigError::InvalidValue {
                field: "MAX_BATCH_BODY_MB",
                value: self.upload.max_batch_body_mb.to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.grading.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "CONFIDENCE_THRESHOLD",
                value: self.grading.confidence_threshold.to_string(),
            });
        }

        if self.grading.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_CONCURRENT",
                value: "0".to_string(),
            });
        }

        if self.grading.result_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RESULT_CACHE_CAPACITY",
                value: "0".to_string(),
            });
        }

        if self.grading.preprocess_max_width == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "PREPROCESS_MAX_WIDTH",
                value: "0".to_string(),
            });
        }

        if self.grading.preprocess_max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PREPROCESS_MAX_SIZE",
                value: "0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "AI_TEMPERATURE",
                value: self.ai.temperature.to_string(),
            });
        }

        if self.ocr.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.ocr.max_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_MAX_POLL_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }
        if self.ai.openai_base_url.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_BASE_URL"));
        }
        if !self.ocr.api_url.is_empty() && self.ocr.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OCR_API_KEY"));
        }

        Ok(())
    }
}
