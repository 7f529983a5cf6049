//! Worker configuration loaded from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable holding the bearer secret. Read on every request.
pub const SECRET_ENV_VAR: &str = "WORKER_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Admission gate capacity.
    pub max_concurrent_jobs: usize,
    /// Base directory; a private subdirectory is created inside it.
    pub scratch_base: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            max_concurrent_jobs: 1,
            scratch_base: std::env::temp_dir(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from the environment, falling back to defaults.
    ///
    /// | Env Var               | Default        |
    /// |-----------------------|----------------|
    /// | `HOST`                | `0.0.0.0`      |
    /// | `PORT`                | `8080`         |
    /// | `MAX_CONCURRENT_JOBS` | `1`            |
    /// | `SCRATCH_DIR`         | OS temp dir    |
    /// | `FFMPEG_PATH`         | `ffmpeg`       |
    /// | `MAX_UPLOAD_BYTES`    | `1073741824`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_concurrent_jobs =
            parse(&lookup, "MAX_CONCURRENT_JOBS")?.unwrap_or(defaults.max_concurrent_jobs);
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_CONCURRENT_JOBS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: parse(&lookup, "HOST")?.unwrap_or(defaults.host),
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            max_concurrent_jobs,
            scratch_base: lookup("SCRATCH_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_base),
            ffmpeg_path: lookup("FFMPEG_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            match parsed {
                Ok(v) => Ok(Some(v)),
                Err(e) => Err(ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                }),
            }
        }
    }
}

/// Where the bearer secret comes from.
#[derive(Debug, Clone)]
pub enum SecretSource {
    /// Read from an environment variable at every call, so a changed value
    /// takes effect without a restart.
    Env(String),
    /// Fixed value; `None` models an unset secret.
    Static(Option<String>),
}

impl SecretSource {
    pub fn env() -> Self {
        SecretSource::Env(SECRET_ENV_VAR.to_string())
    }

    /// Current secret. Empty values count as unset.
    pub fn current(&self) -> Option<String> {
        let value = match self {
            SecretSource::Env(var) => std::env::var(var).ok(),
            SecretSource::Static(value) => value.clone(),
        };
        value.filter(|v| !v.is_empty())
    }
}
