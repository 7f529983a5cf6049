//! Telemetry and structured logging for conversion jobs.

use crate::job::{ConversionJob, JobState};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use std::time::Duration;
use tracing::{info, warn};

const TRACER_NAME: &str = "webp-worker";

/// Jobs slower than this end to end are logged as a warning.
const SLOW_JOB_THRESHOLD_MS: u64 = 60_000;

fn millis(duration: Option<Duration>) -> Option<i64> {
    duration.map(|d| d.as_millis() as i64)
}

/// Records telemetry for a job that reached a terminal state.
///
/// Emits one OpenTelemetry span plus a structured log line carrying the
/// queue-wait, conversion and total durations. Purely observational.
pub fn record_job_telemetry(job: &ConversionJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("webp_conversion_job");

    span.set_attribute(KeyValue::new("job_id", job.id.0 as i64));
    span.set_attribute(KeyValue::new("state", job.state.to_string()));
    span.set_attribute(KeyValue::new("received_at", job.received_at.to_rfc3339()));

    let queue_wait_ms = millis(job.timings.queue_wait);
    let conversion_ms = millis(job.timings.conversion);
    let total_ms = millis(job.timings.total);

    for (key, value) in [
        ("queue_wait_ms", queue_wait_ms),
        ("conversion_ms", conversion_ms),
        ("total_ms", total_ms),
    ] {
        if let Some(ms) = value {
            span.set_attribute(KeyValue::new(key, ms));
        }
    }
    if let Some(bytes) = job.input_bytes {
        span.set_attribute(KeyValue::new("input_bytes", bytes as i64));
    }
    if let Some(bytes) = job.output_bytes {
        span.set_attribute(KeyValue::new("output_bytes", bytes as i64));
    }

    info!(
        job_id = %job.id,
        state = %job.state,
        queue_wait_ms,
        conversion_ms,
        total_ms,
        "WebP conversion job finished"
    );

    if let Some(total) = total_ms {
        if total > SLOW_JOB_THRESHOLD_MS as i64 {
            warn!(
                job_id = %job.id,
                total_ms = total,
                "WebP conversion exceeded {}ms",
                SLOW_JOB_THRESHOLD_MS
            );
        }
    }

    if job.state == JobState::Failed {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
    }

    span.end();
}

/// Records that a job found the admission gate full and had to wait.
pub fn record_gate_pressure(waiting: usize, capacity: usize) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("gate_pressure");

    span.set_attribute(KeyValue::new("waiting", waiting as i64));
    span.set_attribute(KeyValue::new("capacity", capacity as i64));
    span.end();
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Call once at startup from within the Tokio runtime. Reads:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - service name (default: webp-worker)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes pending spans. Call once after the server stops.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
