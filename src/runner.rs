//! Job runner: takes one conversion from accepted request to sent response.
//!
//! Each job follows `Received -> Authorizing -> Queued -> Reading ->
//! Converting -> Responding -> Done | Failed`. Everything a job acquires
//! (its admission slot and scratch files) is held by a guard, so every
//! exit path releases it, including a response body dropped mid-stream.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use subtle::ConstantTimeEq;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::config::SecretSource;
use crate::converter::Transcoder;
use crate::error::JobError;
use crate::gate::{AdmissionGate, Slot};
use crate::job::{ConversionJob, JobIdAllocator};
use crate::payload::Payload;
use crate::scratch::{output_path_for, ScratchDir, ScratchFile};
use crate::telemetry;

pub const WEBP_CONTENT_TYPE: &str = "image/webp";

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// The parts of a request checked before a job may queue.
#[derive(Debug, Clone)]
pub struct Preconditions {
    pub method: Method,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

impl Preconditions {
    pub fn new(method: Method, authorization: Option<String>) -> Self {
        Self {
            method,
            authorization,
        }
    }

    pub fn from_parts(method: &Method, headers: &HeaderMap) -> Self {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Self::new(method.clone(), authorization)
    }
}

/// Everything a running job holds. Dropping it removes the scratch files
/// and then frees the slot.
#[derive(Debug)]
struct JobLease {
    _input: ScratchFile,
    _output: ScratchFile,
    _slot: Slot,
}

/// Executes conversion jobs behind an [`AdmissionGate`].
pub struct JobRunner {
    gate: AdmissionGate,
    transcoder: Arc<dyn Transcoder>,
    scratch: ScratchDir,
    secret: SecretSource,
    ids: JobIdAllocator,
}

impl JobRunner {
    pub fn new(
        gate: AdmissionGate,
        transcoder: Arc<dyn Transcoder>,
        scratch: ScratchDir,
        secret: SecretSource,
    ) -> Self {
        Self {
            gate,
            transcoder,
            scratch,
            secret,
            ids: JobIdAllocator::new(),
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Creates the job for a newly arrived request.
    pub fn admit(&self, remote: Option<SocketAddr>) -> ConversionJob {
        let job = ConversionJob::new(self.ids.next());
        match remote {
            Some(addr) => info!(job_id = %job.id, remote = %addr, "New request received"),
            None => info!(job_id = %job.id, "New request received"),
        }
        job
    }

    /// Checks the secret, the bearer credential and the method, in that order.
    ///
    /// The secret is looked up on every call. The credential is compared in
    /// constant time.
    pub fn authorize(&self, job: &mut ConversionJob, pre: &Preconditions) -> Result<(), JobError> {
        job.start_authorizing();

        let secret = self.secret.current().ok_or(JobError::Configuration)?;
        let expected = format!("Bearer {secret}");
        let presented = pre.authorization.as_deref().unwrap_or_default();
        if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            return Err(JobError::Unauthorized);
        }

        if pre.method != Method::POST {
            return Err(JobError::MethodNotAllowed(pre.method.to_string()));
        }
        Ok(())
    }

    /// Runs `job` to the point where its output is ready to stream.
    ///
    /// On failure the job is reported and recorded here, and everything it
    /// acquired has already been released when this returns.
    pub async fn run<P: Payload>(
        &self,
        mut job: ConversionJob,
        pre: &Preconditions,
        payload: P,
    ) -> Result<Delivery, JobError> {
        match self.execute(&mut job, pre, payload).await {
            Ok((file, len, lease)) => Ok(Delivery {
                len,
                stream: DeliveryStream {
                    inner: ReaderStream::new(file),
                    completion: Some(Completion { job, lease }),
                },
            }),
            Err(err) => {
                report_failure(&job, &err);
                job.mark_failed(err.to_string());
                telemetry::record_job_telemetry(&job);
                Err(err)
            }
        }
    }

    async fn execute<P: Payload>(
        &self,
        job: &mut ConversionJob,
        pre: &Preconditions,
        payload: P,
    ) -> Result<(File, u64, JobLease), JobError> {
        self.authorize(job, pre)?;

        job.enqueue();
        let slot = self.gate.acquire().await?;
        let waited = job.slot_acquired();
        info!(
            job_id = %job.id,
            waited_ms = waited.as_millis() as u64,
            "Slot acquired, reading file"
        );

        let upload = payload.persist(&self.scratch, job.id).await?;
        info!(
            job_id = %job.id,
            filename = %upload.filename,
            "File received ({:.2} MB)",
            megabytes(upload.size)
        );
        job.filename = Some(upload.filename);
        job.input_bytes = Some(upload.size);

        let output = ScratchFile::claim(output_path_for(upload.file.path()));

        job.start_converting();
        info!(job_id = %job.id, "Starting conversion");
        self.transcoder
            .transcode(upload.file.path(), output.path())
            .await?;
        let took = job.finish_converting();
        info!(
            job_id = %job.id,
            conversion_ms = took.as_millis() as u64,
            "Conversion finished, sending result"
        );

        let missing = |e: io::Error| {
            JobError::Internal(format!(
                "converted output {} unavailable: {e}",
                output.path().display()
            ))
        };
        let file = File::open(output.path()).await.map_err(missing)?;
        let len = file.metadata().await.map_err(missing)?.len();
        job.output_bytes = Some(len);
        info!(job_id = %job.id, "Uploading result ({:.2} MB)", megabytes(len));

        Ok((
            file,
            len,
            JobLease {
                _input: upload.file,
                _output: output,
                _slot: slot,
            },
        ))
    }
}

fn report_failure(job: &ConversionJob, err: &JobError) {
    match err {
        JobError::Configuration => {
            error!(job_id = %job.id, "Fatal: {} is not set", crate::config::SECRET_ENV_VAR)
        }
        JobError::Unauthorized => warn!(job_id = %job.id, "Unauthorized attempt"),
        JobError::MethodNotAllowed(method) => {
            warn!(job_id = %job.id, %method, "Method not allowed")
        }
        JobError::BadInput(reason) => warn!(job_id = %job.id, %reason, "Error reading form file"),
        JobError::Conversion(e) => error!(job_id = %job.id, error = %e, "Conversion failed"),
        JobError::Internal(reason) => error!(job_id = %job.id, %reason, "Internal error"),
    }
}

/// A converted file ready to be sent.
///
/// As a response it streams the file with `Content-Type: image/webp`. The
/// job is finished when the body reaches end of file, or failed if the body
/// is dropped first. Dropping the `Delivery` itself also fails the job.
pub struct Delivery {
    len: u64,
    stream: DeliveryStream,
}

impl Delivery {
    /// `None` once the job has been finished.
    pub fn job(&self) -> Option<&ConversionJob> {
        self.stream.completion.as_ref().map(|c| &c.job)
    }

    pub fn content_length(&self) -> u64 {
        self.len
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("job", &self.job())
            .field("len", &self.len)
            .finish()
    }
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        (
            [
                (CONTENT_TYPE, HeaderValue::from_static(WEBP_CONTENT_TYPE)),
                (CONTENT_LENGTH, HeaderValue::from(self.len)),
            ],
            Body::from_stream(self.stream),
        )
            .into_response()
    }
}

struct Completion {
    job: ConversionJob,
    lease: JobLease,
}

impl Completion {
    /// Releases the lease, then records the job as done or failed.
    fn finish(self, failure: Option<String>) -> ConversionJob {
        let Completion { mut job, lease } = self;
        drop(lease);

        match failure {
            None => {
                job.mark_done();
                info!(
                    job_id = %job.id,
                    total_ms = job.elapsed().as_millis() as u64,
                    "Request complete"
                );
            }
            Some(reason) => {
                warn!(job_id = %job.id, %reason, "Response not completed");
                job.mark_failed(reason);
            }
        }
        telemetry::record_job_telemetry(&job);
        job
    }
}

struct DeliveryStream {
    inner: ReaderStream<File>,
    completion: Option<Completion>,
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(None) => {
                if let Some(completion) = self.completion.take() {
                    completion.finish(None);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                let reason = format!("failed to stream output: {e}");
                if let Some(completion) = self.completion.take() {
                    completion.finish(Some(reason));
                }
            }
            _ => {}
        }
        polled
    }
}

impl DeliveryStream {
    fn fail(&mut self, reason: &str) -> Option<ConversionJob> {
        self.completion
            .take()
            .map(|completion| completion.finish(Some(reason.to_string())))
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        self.fail("response dropped before completion");
    }
}
