//! WebP Conversion Worker Service
//!
//! Accepts media uploads over HTTP and converts them to animated WebP using
//! ffmpeg, running at most `MAX_CONCURRENT_JOBS` conversions at once.
//!
//! ## Endpoints
//!
//! - `GET /ping`: health check, returns `pong`
//! - `POST /convert-webp`: multipart `file` field, bearer-authenticated
//!
//! ## Configuration
//!
//! Environment variables (a `.env` file is loaded first if present):
//! - `WORKER_SECRET`: bearer secret, read on every request
//! - `HOST` / `PORT`: bind address (default: 0.0.0.0:8080)
//! - `MAX_CONCURRENT_JOBS`: admission gate capacity (default: 1)
//! - `SCRATCH_DIR`: base directory for scratch files (default: OS temp dir)
//! - `FFMPEG_PATH`: ffmpeg binary (default: ffmpeg)
//! - `MAX_UPLOAD_BYTES`: upload size limit (default: 1 GiB)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info)
//! - `LOG_FORMAT`: `json` for JSON log lines (default: plain text)

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worker_webp::config::{SecretSource, WorkerConfig};
use worker_webp::converter::FfmpegWebpConverter;
use worker_webp::gate::AdmissionGate;
use worker_webp::routes::{self, AppState};
use worker_webp::runner::JobRunner;
use worker_webp::scratch::ScratchDir;
use worker_webp::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    if dotenv.is_err() {
        warn!("No .env file found, relying on process environment");
    }

    // Initialize OpenTelemetry
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        if let Err(e) = telemetry::init_telemetry() {
            warn!("Failed to initialize telemetry: {}", e);
        }
    } else {
        info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, span export disabled");
    }

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    info!(
        "Configuration: addr={}, max_concurrent_jobs={}, ffmpeg={}, scratch_base={}",
        config.bind_addr(),
        config.max_concurrent_jobs,
        config.ffmpeg_path.display(),
        config.scratch_base.display()
    );

    if SecretSource::env().current().is_none() {
        warn!("WORKER_SECRET is not set; conversions will fail until it is");
    }

    let scratch = ScratchDir::create_in(&config.scratch_base).with_context(|| {
        format!(
            "Failed to create scratch directory in {}",
            config.scratch_base.display()
        )
    })?;
    info!("Scratch directory: {}", scratch.path().display());

    let runner = JobRunner::new(
        AdmissionGate::new(config.max_concurrent_jobs),
        Arc::new(FfmpegWebpConverter::new(config.ffmpeg_path.clone())),
        scratch,
        SecretSource::env(),
    );
    let app = routes::router(AppState::new(runner, config.max_upload_bytes));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Worker online on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    telemetry::shutdown_telemetry();
    info!("Worker service shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
