pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, state::AppState, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let state = AppState::from_settings(settings)?;
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        ocr_engine = %state.pipeline().ocr_engine_name(),
        "Scangrade API listening"
    );

    let batch = state.batch().clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            core::shutdown::shutdown_signal().await;
            if batch.cancel().is_ok() {
                tracing::info!("Running batch cancelled for shutdown");
            }
        })
        .await;

    result?;

    Ok(())
}
