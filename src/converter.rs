//! Media to animated WebP conversion via an external ffmpeg process.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// Failure of the external conversion tool.
#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool exited with status {exit_code:?}: {output}")]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },
}

/// Converts the file at `input` into WebP at `output`.
///
/// Implementations must not return until the output is complete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ConverterError>;
}

/// Runs ffmpeg with a fixed argument set. Only the paths vary.
#[derive(Debug, Clone)]
pub struct FfmpegWebpConverter {
    program: PathBuf,
}

impl FfmpegWebpConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Full argument list for one conversion.
    ///
    /// Output is capped at 30 seconds, encoded with libwebp at quality 50
    /// and set to loop forever.
    pub fn webp_args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        args.extend(
            [
                "-t", "30", "-c:v", "libwebp", "-q:v", "50", "-loop", "0", "-preset", "default",
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }
}

impl Default for FfmpegWebpConverter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegWebpConverter {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        info!(
            "Running {}: input={}, output={}",
            self.program.display(),
            input.display(),
            output.display()
        );

        let result = tokio::process::Command::new(&self.program)
            .args(Self::webp_args(input, output))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConverterError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // ffmpeg logs to stderr; keep both streams for diagnostics.
        let mut combined = String::from_utf8_lossy(&result.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&result.stderr));

        if !result.status.success() {
            return Err(ConverterError::Failed {
                exit_code: result.status.code(),
                output: combined,
            });
        }

        debug!(output_len = combined.len(), "Conversion tool exited successfully");
        Ok(())
    }
}
