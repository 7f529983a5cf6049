//! Scratch storage for per-job input and output files.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::job::JobId;

const OUTPUT_SUFFIX: &str = ".webp";
const FALLBACK_FILENAME: &str = "upload";
const INPUT_PREFIX: &str = "input_";

/// Longest single path component most filesystems accept.
const MAX_FILE_NAME: usize = 255;
/// Longer extensions are not worth keeping when a name must be shortened.
const MAX_KEPT_EXTENSION: usize = 16;

/// Per-process scratch directory.
///
/// Created as a uniquely named subdirectory of a base directory so two
/// worker processes sharing `/tmp` never collide. The directory is removed
/// when this value is dropped.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create_in(base: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("webp-worker-")
            .tempdir_in(base)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Input path for a job: `input_<id>_<filename>`.
    ///
    /// The filename is shortened so that the output name derived from this
    /// path still fits in one path component.
    pub fn input_path(&self, id: JobId, filename: &str) -> PathBuf {
        let id = id.0.to_string();
        let budget = MAX_FILE_NAME - INPUT_PREFIX.len() - id.len() - 1 - OUTPUT_SUFFIX.len();
        let name = truncate_keeping_extension(&sanitize_filename(filename), budget);
        self.path().join(format!("{INPUT_PREFIX}{id}_{name}"))
    }
}

/// Output path for an input path: the input path with `.webp` appended.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut os: OsString = input.as_os_str().to_owned();
    os.push(OUTPUT_SUFFIX);
    PathBuf::from(os)
}

/// Reduces a client-supplied filename to one safe path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Cuts `name` to at most `max` bytes, keeping a short extension intact.
///
/// `name` must be ASCII, which [`sanitize_filename`] guarantees.
fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() < MAX_KEPT_EXTENSION.min(max) => {
            let keep = max - ext.len() - 1;
            format!("{}.{ext}", &stem[..keep.min(stem.len())])
        }
        _ => name[..max].to_string(),
    }
}

/// A path owned by one job. The file, if it exists, is removed on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Takes ownership of `path`. Call this before the file is created so
    /// that a failed write is cleaned up too.
    pub fn claim(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("my clip (1).mov"), "my_clip__1_.mov");
    }

    #[test]
    fn test_sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
    }

    #[test]
    fn test_paths_are_unique_per_job() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create_in(base.path()).unwrap();

        let first = scratch.input_path(JobId(1), "clip.mp4");
        let second = scratch.input_path(JobId(2), "clip.mp4");

        assert_ne!(first, second);
        assert!(first.ends_with("input_1_clip.mp4"));
        assert_eq!(
            output_path_for(&first).file_name().unwrap(),
            "input_1_clip.mp4.webp"
        );
    }

    #[test]
    fn test_long_names_fit_in_one_path_component() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create_in(base.path()).unwrap();
        let long = format!("{}.mp4", "a".repeat(250));

        for id in [JobId(1), JobId(u64::MAX)] {
            let input = scratch.input_path(id, &long);
            let output = output_path_for(&input);
            let name = output.file_name().unwrap().to_str().unwrap();

            assert!(name.len() <= 255, "{} bytes: {name}", name.len());
            assert!(name.ends_with(".mp4.webp"));
            std::fs::write(&output, b"ok").unwrap();
        }
    }

    #[test]
    fn test_truncation_drops_overlong_extensions() {
        let name = format!("clip.{}", "x".repeat(40));
        assert_eq!(truncate_keeping_extension(&name, 10), "clip.xxxxx");
        assert_eq!(truncate_keeping_extension("short.mp4", 10), "short.mp4");
        assert_eq!(truncate_keeping_extension("abcdefghijkl.mp4", 10), "abcdef.mp4");
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("input_1_clip.mp4");
        std::fs::write(&path, b"data").unwrap();

        let guard = ScratchFile::claim(path.clone());
        drop(guard);

        assert!(!path.exists());
    }

    #[test]
    fn test_unwritten_scratch_file_drop_is_quiet() {
        let base = tempfile::tempdir().unwrap();
        let guard = ScratchFile::claim(base.path().join("never-created"));
        drop(guard);
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create_in(base.path()).unwrap();
        let root = scratch.path().to_path_buf();
        assert!(root.is_dir());

        drop(scratch);
        assert!(!root.exists());
    }
}
