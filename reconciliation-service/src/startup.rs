//! Application startup and lifecycle management.

use crate::config::ReconciliationConfig;
use crate::handlers::{files, records, reports, tasks};
use crate::services::{
    get_metrics, init_metrics, DailyScheduler, Database, FileReportGenerator, HttpChannelSource,
    HttpPlatformSource, ReconciliationService, ReconciliationStore,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReconciliationConfig>,
    pub service: Arc<ReconciliationService>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.store().health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": state.config.service_version
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.store().health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Full HTTP surface with request-id, metrics and trace layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(
            "/reconciliation/tasks",
            post(tasks::create_task).get(tasks::list_tasks),
        )
        .route("/reconciliation/tasks/:id", get(tasks::get_task))
        .route("/reconciliation/tasks/:id/execute", post(tasks::execute_task))
        .route("/reconciliation/tasks/:id/retry", post(tasks::retry_task))
        .route("/reconciliation/records", get(records::list_records))
        .route("/reconciliation/records/:id", get(records::get_record))
        .route(
            "/reconciliation/records/:id/resolve",
            post(records::resolve_record),
        )
        .route("/reconciliation/reports/:id", get(reports::generate_report))
        .route("/reconciliation/files", get(files::list_files))
        .route("/reconciliation/files/download", post(files::download_file))
        .route("/reconciliation/files/:file_no", get(files::get_file))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(middleware::from_fn(metrics_middleware))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration, running migrations.
    pub async fn build(config: ReconciliationConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let store: Arc<dyn ReconciliationStore> = Arc::new(db);

        let channel_client = reqwest::Client::builder()
            .timeout(config.channel_source.timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))?;
        let platform_client = reqwest::Client::builder()
            .timeout(config.platform_source.timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))?;

        let service = ReconciliationService::new(
            store.clone(),
            Arc::new(HttpChannelSource::new(
                channel_client,
                &config.channel_source.base_url,
                config.channel_source.settlement_dir.clone(),
            )),
            Arc::new(HttpPlatformSource::new(
                platform_client,
                &config.platform_source.payment_gateway_url,
            )),
            Arc::new(FileReportGenerator::new(
                store,
                config.report.report_dir.clone(),
            )),
            config.scheduler.processing_deadline,
        );

        Self::with_service(config, Arc::new(service)).await
    }

    /// Bind the listener around an already assembled service.
    pub async fn with_service(
        config: ReconciliationConfig,
        service: Arc<ReconciliationService>,
    ) -> Result<Self, AppError> {
        let addr = config.common.bind_address();
        let http_listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Reconciliation service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState {
                config: Arc::new(config),
                service,
            },
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn service(&self) -> Arc<ReconciliationService> {
        self.state.service.clone()
    }

    /// Run the application until stopped. The scheduler, when enabled, lives
    /// exactly as long as this future.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let scheduler = DailyScheduler::new(
            self.state.service.clone(),
            self.state.config.scheduler.clone(),
        );
        scheduler.start();

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let router = build_router(self.state);
        let result = axum::serve(self.http_listener, router).await;
        scheduler.shutdown();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
