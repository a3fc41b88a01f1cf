use collect_service::config::CollectConfig;
use collect_service::services::init_metrics;
use collect_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CollectConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "collect-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    // Must be installed before any metric is recorded.
    init_metrics();

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to start collect-service: {}", e);
        anyhow::anyhow!("Startup error: {}", e)
    })?;

    tracing::info!("Starting collect-service on port {}", app.port());
    app.run_until_stopped().await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
