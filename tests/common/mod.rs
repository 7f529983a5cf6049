//! Shared helpers for the HTTP integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, Response};
use axum::Router;
use tower::ServiceExt;

use worker_webp::config::SecretSource;
use worker_webp::converter::{ConverterError, Transcoder};
use worker_webp::gate::AdmissionGate;
use worker_webp::routes::{self, AppState};
use worker_webp::runner::JobRunner;
use worker_webp::scratch::ScratchDir;

pub const SECRET: &str = "test-secret";
pub const BOUNDARY: &str = "webp-worker-boundary";
pub const FAKE_WEBP: &[u8] = b"RIFF\x1a\x00\x00\x00WEBPVP8X fake animated webp";

/// Router plus the handles tests inspect afterwards.
pub struct TestApp {
    pub router: Router,
    pub scratch_root: PathBuf,
    pub gate: AdmissionGate,
    // Keeps the scratch base alive for the duration of the test.
    _base: tempfile::TempDir,
}

impl TestApp {
    pub fn new(transcoder: Arc<dyn Transcoder>, capacity: usize) -> Self {
        Self::with_secret(transcoder, capacity, Some(SECRET))
    }

    pub fn with_secret(
        transcoder: Arc<dyn Transcoder>,
        capacity: usize,
        secret: Option<&str>,
    ) -> Self {
        Self::with_secret_source(
            transcoder,
            capacity,
            SecretSource::Static(secret.map(str::to_owned)),
        )
    }

    pub fn with_secret_source(
        transcoder: Arc<dyn Transcoder>,
        capacity: usize,
        secret: SecretSource,
    ) -> Self {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create_in(base.path()).unwrap();
        let scratch_root = scratch.path().to_path_buf();
        let gate = AdmissionGate::new(capacity);

        let runner = JobRunner::new(
            gate.clone(),
            transcoder,
            scratch,
            secret,
        );
        let router = routes::router(AppState::new(runner, 16 * 1024 * 1024));

        Self {
            router,
            scratch_root,
            gate,
            _base: base,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub fn scratch_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.scratch_root)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

/// Encodes a single-file `multipart/form-data` body.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn convert_request(method: Method, auth: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/convert-webp")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Authorized `POST /convert-webp` carrying `data` as `filename`.
pub fn upload(filename: &str, data: &[u8]) -> Request<Body> {
    upload_with_secret(SECRET, filename, data)
}

pub fn upload_with_secret(secret: &str, filename: &str, data: &[u8]) -> Request<Body> {
    convert_request(
        Method::POST,
        Some(&format!("Bearer {secret}")),
        multipart_body("file", filename, data),
    )
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Writes a fixed WebP payload, optionally after a delay, and records how
/// many conversions ran at the same time.
#[derive(Default)]
pub struct FakeTranscoder {
    pub delay: Duration,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub inputs: Mutex<Vec<PathBuf>>,
    /// Inputs whose path contains this marker fail.
    pub fail_marker: Option<String>,
}

impl FakeTranscoder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_on(marker: &str, delay: Duration) -> Self {
        Self {
            delay,
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.to_path_buf());

        tokio::time::sleep(self.delay).await;

        let fail = self
            .fail_marker
            .as_deref()
            .is_some_and(|marker| input.to_string_lossy().contains(marker));
        let result = if fail {
            Err(ConverterError::Failed {
                exit_code: Some(1),
                output: "Invalid data found when processing input".to_string(),
            })
        } else {
            tokio::fs::write(output, FAKE_WEBP)
                .await
                .map_err(|e| ConverterError::Failed {
                    exit_code: None,
                    output: e.to_string(),
                })
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
