use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tryon_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db,
    routes::{self, metrics::MetricsState},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing tryon-pipeline server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("tryon_jobs_submitted_total", "Jobs handed to a provider");
    metrics::describe_counter!("tryon_jobs_completed_total", "Jobs that reached Completed");
    metrics::describe_counter!("tryon_jobs_failed_total", "Jobs that reached Failed, by reason");
    metrics::describe_counter!("tryon_poll_attempts_total", "Provider task status checks");
    metrics::describe_counter!(
        "tryon_ssrf_rejections_total",
        "Provider media URLs rejected by the URL guard"
    );
    metrics::describe_histogram!(
        "tryon_media_download_seconds",
        "Time to download a finished artifact from the provider"
    );
    metrics::describe_gauge!("tryon_queue_depth", "Scheduled runs waiting in the queue");

    let state = AppState::connect(&config)
        .await
        .expect("Failed to initialize application state");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&state.db)
        .await
        .expect("Failed to run database migrations");

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: state.queue.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/try-jobs/{job_id}",
            get(routes::jobs::get_job_status),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting tryon-pipeline on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
