//! Uploaded-file payloads and how they are persisted to scratch storage.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::JobError;
use crate::job::JobId;
use crate::scratch::{ScratchDir, ScratchFile};

/// Multipart field carrying the media to convert.
pub const FILE_FIELD: &str = "file";

/// Input media written to disk for one job.
#[derive(Debug)]
pub struct PersistedUpload {
    pub file: ScratchFile,
    pub filename: String,
    pub size: u64,
}

/// Source of a job's input file.
///
/// Reading is deferred until the job holds a slot, so an implementation
/// should not touch the request body before `persist` is called.
#[async_trait]
pub trait Payload: Send {
    /// Writes the upload into `dir` at a path unique to `id`.
    ///
    /// # Errors
    ///
    /// `BadInput` if the upload is absent, has no filename or is unreadable, `Internal` if the
    /// scratch file cannot be written.
    async fn persist(self, dir: &ScratchDir, id: JobId) -> Result<PersistedUpload, JobError>;
}

/// Upload carried in the `file` field of a `multipart/form-data` request.
pub struct MultipartPayload {
    request: Request,
}

impl MultipartPayload {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

#[async_trait]
impl Payload for MultipartPayload {
    async fn persist(self, dir: &ScratchDir, id: JobId) -> Result<PersistedUpload, JobError> {
        let mut multipart = Multipart::from_request(self.request, &())
            .await
            .map_err(|e| JobError::BadInput(e.to_string()))?;

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| JobError::BadInput(e.to_string()))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }

            // A plain form value under the same name is not an upload.
            let Some(filename) = field.file_name().map(str::to_owned) else {
                return Err(JobError::BadInput(format!(
                    "'{FILE_FIELD}' field is not a file upload"
                )));
            };
            let scratch = ScratchFile::claim(dir.input_path(id, &filename));
            let mut out = create(&scratch).await?;

            let mut size = 0u64;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| JobError::BadInput(e.to_string()))?
            {
                size += chunk.len() as u64;
                write(&mut out, &chunk).await?;
            }
            finish(out).await?;

            debug!(job_id = %id, path = %scratch.path().display(), size, "Upload persisted");
            return Ok(PersistedUpload {
                file: scratch,
                filename,
                size,
            });
        }

        Err(JobError::BadInput(format!("missing '{FILE_FIELD}' field")))
    }
}

/// Upload already held in memory. `None` behaves like a request without a file.
#[derive(Debug, Clone)]
pub struct BytesPayload {
    pub filename: String,
    pub data: Option<Bytes>,
}

impl BytesPayload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: Some(data.into()),
        }
    }

    pub fn missing() -> Self {
        Self {
            filename: String::new(),
            data: None,
        }
    }
}

#[async_trait]
impl Payload for BytesPayload {
    async fn persist(self, dir: &ScratchDir, id: JobId) -> Result<PersistedUpload, JobError> {
        let data = self
            .data
            .ok_or_else(|| JobError::BadInput(format!("missing '{FILE_FIELD}' field")))?;

        let scratch = ScratchFile::claim(dir.input_path(id, &self.filename));
        let mut out = create(&scratch).await?;
        write(&mut out, &data).await?;
        finish(out).await?;

        Ok(PersistedUpload {
            file: scratch,
            filename: self.filename,
            size: data.len() as u64,
        })
    }
}

async fn create(scratch: &ScratchFile) -> Result<File, JobError> {
    File::create(scratch.path()).await.map_err(|e| {
        JobError::Internal(format!(
            "failed to create {}: {e}",
            scratch.path().display()
        ))
    })
}

async fn write(out: &mut File, data: &[u8]) -> Result<(), JobError> {
    out.write_all(data)
        .await
        .map_err(|e| JobError::Internal(format!("failed to write upload: {e}")))
}

async fn finish(mut out: File) -> Result<(), JobError> {
    out.flush()
        .await
        .map_err(|e| JobError::Internal(format!("failed to flush upload: {e}")))
}
