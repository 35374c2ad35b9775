//! reconciliation-service binary: HTTP API plus the optional daily scheduler.

use reconciliation_service::config::ReconciliationConfig;
use reconciliation_service::services::init_metrics;
use reconciliation_service::startup::Application;
use service_core::observability::init_tracing;
use tokio::signal;

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                    let _ = signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("Ctrl+C received"),
            _ = terminate.recv() => tracing::info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        tracing::info!("Ctrl+C received");
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ReconciliationConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    // DATABASE_URL stays out of the log line.
    tracing::info!(
        version = %config.service_version,
        bind_address = %config.common.bind_address(),
        otlp_endpoint = ?config.otlp_endpoint,
        db_max_connections = config.database.max_connections,
        channel_source_url = %config.channel_source.base_url,
        payment_gateway_url = %config.platform_source.payment_gateway_url,
        settlement_dir = %config.channel_source.settlement_dir.display(),
        report_dir = %config.report.report_dir.display(),
        scheduler_enabled = config.scheduler.enabled,
        scheduler_channels = ?config.scheduler.channels,
        processing_deadline_secs = config.scheduler.processing_deadline.as_secs(),
        "Starting reconciliation-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    tokio::select! {
        result = app.run_until_stopped() => result?,
        _ = shutdown_signal() => tracing::info!("Graceful shutdown initiated"),
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
