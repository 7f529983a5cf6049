//! WireTuner WebP Conversion Worker Library
//!
//! An HTTP worker that accepts an uploaded media file, converts it to an
//! animated WebP with ffmpeg and streams the result back. At most a fixed
//! number of conversions run at once; other requests wait for a slot.
//!
//! ## Module Overview
//!
//! - `config`: environment configuration and the bearer secret source
//! - `converter`: the `Transcoder` seam and the ffmpeg implementation
//! - `error`: job error taxonomy and HTTP mapping
//! - `gate`: admission gate bounding concurrent jobs
//! - `job`: job identifiers, states and timings
//! - `payload`: uploaded-file payloads
//! - `routes`: axum router
//! - `runner`: runs one job end to end
//! - `scratch`: per-job scratch files
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worker_webp::{
//!     config::SecretSource,
//!     converter::FfmpegWebpConverter,
//!     gate::AdmissionGate,
//!     routes::{self, AppState},
//!     runner::JobRunner,
//!     scratch::ScratchDir,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = JobRunner::new(
//!         AdmissionGate::new(1),
//!         Arc::new(FfmpegWebpConverter::default()),
//!         ScratchDir::create_in(&std::env::temp_dir())?,
//!         SecretSource::env(),
//!     );
//!     let app = routes::router(AppState::new(runner, 64 * 1024 * 1024));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod gate;
pub mod job;
pub mod payload;
pub mod routes;
pub mod runner;
pub mod scratch;
pub mod telemetry;
