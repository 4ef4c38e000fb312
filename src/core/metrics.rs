use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("http_requests_total", "HTTP responses by status");
    describe_counter!("ocr_requests_total", "OCR calls by outcome, including fallbacks");
    describe_histogram!("ocr_duration_seconds", Unit::Seconds, "OCR engine latency");
    describe_counter!("scoring_requests_total", "Scoring calls by mode and outcome");
    describe_counter!("pipeline_items_total", "Pipeline items by outcome");
    describe_histogram!(
        "pipeline_stage_duration_seconds",
        Unit::Seconds,
        "Time spent in each pipeline stage"
    );
    describe_counter!("batch_runs_total", "Finished batch runs by final state");
    describe_gauge!("batch_in_flight", "Items running in the current batch window");
}
