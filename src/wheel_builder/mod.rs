//! Extracting source distributions and obtaining their core metadata through
//! the PEP 517 build-backend hooks.
//!
//! The hook invocation itself sits behind the [`BuildFrontend`] trait: the
//! resolver only needs "give me the METADATA bytes for this unpacked source
//! tree". [`Pep517ProcessFrontend`] is the provided implementation, driving
//! the hooks through a Python subprocess; callers with their own build
//! isolation story plug in their own frontend.

use crate::types::{PackageMetadata, PackageMetadataError, SDistFilename, SDistFormat};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// An error that can occur while obtaining metadata from a source
/// distribution.
#[allow(missing_docs)]
#[derive(thiserror::Error, Debug)]
pub enum WheelBuildError {
    #[error("build backend hook failed: {stderr_tail}")]
    HookFailed { stderr_tail: String },

    #[error("could not run {0}: {1}")]
    CouldNotRunCommand(String, #[source] std::io::Error),

    #[error("io error while preparing build: {0}")]
    IoError(#[from] std::io::Error),

    #[error("could not unpack source archive: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("source archives in {0} format are not supported")]
    UnsupportedFormat(SDistFormat),

    #[error("could not parse metadata produced by the build backend: {0}")]
    InvalidMetadata(#[from] PackageMetadataError),

    #[error("build backend did not report a metadata file")]
    MissingMetadataResult,
}

/// The PEP 517 collaborator: given an unpacked source tree, produce the raw
/// core-metadata (`METADATA`) bytes of the distribution.
///
/// Implementations should prefer the `prepare_metadata_for_build_wheel` hook
/// and fall back to `build_wheel` plus extracting `METADATA` from the built
/// wheel when the backend does not support metadata preparation.
#[async_trait]
pub trait BuildFrontend: Send + Sync {
    /// Runs the build backend of the source tree at `source_dir` and returns
    /// the bytes of the resulting `METADATA` file.
    async fn prepare_metadata(&self, source_dir: &Path) -> Result<Vec<u8>, WheelBuildError>;
}

/// Turns downloaded source distributions into metadata: unpacks the archive
/// and hands the source tree to a [`BuildFrontend`], with an upper bound on
/// how many builds run at the same time.
pub struct WheelBuilder {
    frontend: Arc<dyn BuildFrontend>,
    build_permits: Semaphore,
}

impl WheelBuilder {
    /// Creates a builder that delegates to `frontend`, running at most
    /// `max_concurrent_builds` builds concurrently.
    pub fn new(frontend: Arc<dyn BuildFrontend>, max_concurrent_builds: usize) -> Self {
        Self {
            frontend,
            build_permits: Semaphore::new(max_concurrent_builds),
        }
    }

    /// Extracts the given source distribution payload and asks the build
    /// backend for its metadata.
    #[tracing::instrument(skip_all, fields(sdist = %filename))]
    pub async fn sdist_metadata(
        &self,
        filename: &SDistFilename,
        payload: Vec<u8>,
    ) -> Result<PackageMetadata, WheelBuildError> {
        let _permit = self
            .build_permits
            .acquire()
            .await
            .expect("the build semaphore is never closed");

        let format = filename.format;
        let work_dir = tokio::task::spawn_blocking(move || {
            let work_dir = tempfile::tempdir()?;
            extract_sdist(format, &payload, work_dir.path())?;
            Ok::<_, WheelBuildError>(work_dir)
        })
        .await
        .expect("archive extraction must not panic")?;

        let source_dir = source_tree_root(work_dir.path())?;
        tracing::debug!(source_dir=%source_dir.display(), "invoking build backend");

        let metadata_bytes = self.frontend.prepare_metadata(&source_dir).await?;
        let metadata = PackageMetadata::try_from(metadata_bytes.as_slice())?;

        if metadata.name != filename.distribution {
            tracing::warn!(
                "source distribution {} produced metadata for '{}'",
                filename,
                metadata.name
            );
        }

        Ok(metadata)
    }
}

/// Unpacks a source distribution archive into `dest`.
fn extract_sdist(
    format: SDistFormat,
    payload: &[u8],
    dest: &Path,
) -> Result<(), WheelBuildError> {
    match format {
        SDistFormat::TarGz => {
            let decoder = flate2::read::GzDecoder::new(Cursor::new(payload));
            tar::Archive::new(decoder).unpack(dest)?;
        }
        SDistFormat::Tar => {
            tar::Archive::new(Cursor::new(payload)).unpack(dest)?;
        }
        SDistFormat::Zip => {
            zip::ZipArchive::new(Cursor::new(payload))?.extract(dest)?;
        }
        other => return Err(WheelBuildError::UnsupportedFormat(other)),
    }
    Ok(())
}

/// Source distributions conventionally contain a single `{name}-{version}`
/// directory; when they do, that directory is the source tree. Archives that
/// unpack their files directly into the root are accepted as-is.
fn source_tree_root(work_dir: &Path) -> Result<PathBuf, WheelBuildError> {
    let mut entries = fs_err::read_dir(work_dir)?;
    let first = entries.next().transpose()?;
    let second = entries.next().transpose()?;
    match (first, second) {
        (Some(entry), None) if entry.file_type()?.is_dir() => Ok(entry.path()),
        _ => Ok(work_dir.to_path_buf()),
    }
}

/// Runs the PEP 517 hooks by executing a small driver script with a Python
/// interpreter. The driver prefers `prepare_metadata_for_build_wheel` and
/// falls back to `build_wheel`, printing the path of the produced `METADATA`
/// file on its last line of output.
///
/// The backend and its requirements must be importable by the configured
/// interpreter; build-environment isolation is left to the frontend
/// implementation and is not provided here.
pub struct Pep517ProcessFrontend {
    python: PathBuf,
}

const HOOK_DRIVER_PY: &str = include_str!("hook_driver.py");

impl Pep517ProcessFrontend {
    /// Creates a frontend that runs hooks with the given Python interpreter.
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

#[async_trait]
impl BuildFrontend for Pep517ProcessFrontend {
    async fn prepare_metadata(&self, source_dir: &Path) -> Result<Vec<u8>, WheelBuildError> {
        let work_dir = tempfile::tempdir()?;
        let driver_path = work_dir.path().join("hook_driver.py");
        fs_err::write(&driver_path, HOOK_DRIVER_PY)?;

        let output = tokio::process::Command::new(&self.python)
            .arg(&driver_path)
            .arg(source_dir)
            .arg(work_dir.path())
            .current_dir(source_dir)
            .output()
            .await
            .map_err(|e| {
                WheelBuildError::CouldNotRunCommand(self.python.display().to_string(), e)
            })?;

        if !output.status.success() {
            return Err(WheelBuildError::HookFailed {
                stderr_tail: stderr_tail(&output.stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata_path = stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or(WheelBuildError::MissingMetadataResult)?;

        Ok(fs_err::read(metadata_path)?)
    }
}

/// The last part of captured stderr, enough to show the actual failure
/// without dumping entire build logs into an error message.
fn stderr_tail(stderr: &[u8]) -> String {
    const TAIL_BYTES: usize = 4096;
    let start = stderr.len().saturating_sub(TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const METADATA: &[u8] =
        b"Metadata-Version: 2.1\nName: fake-pkg\nVersion: 1.0.0\nRequires-Dist: click\n";

    struct StaticFrontend(Vec<u8>);

    #[async_trait]
    impl BuildFrontend for StaticFrontend {
        async fn prepare_metadata(&self, _source_dir: &Path) -> Result<Vec<u8>, WheelBuildError> {
            Ok(self.0.clone())
        }
    }

    struct FailingFrontend;

    #[async_trait]
    impl BuildFrontend for FailingFrontend {
        async fn prepare_metadata(&self, _source_dir: &Path) -> Result<Vec<u8>, WheelBuildError> {
            Err(WheelBuildError::HookFailed {
                stderr_tail: "error: metadata generation failed".into(),
            })
        }
    }

    fn fake_sdist_targz() -> Vec<u8> {
        let mut tarball = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let contents = b"[build-system]\nrequires = [\"setuptools\"]\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tarball
            .append_data(
                &mut header,
                "fake-pkg-1.0.0/pyproject.toml",
                contents.as_slice(),
            )
            .unwrap();
        tarball.into_inner().unwrap().finish().unwrap()
    }

    fn sdist_name() -> SDistFilename {
        SDistFilename {
            distribution: "fake-pkg".parse().unwrap(),
            version: "1.0.0".parse().unwrap(),
            format: SDistFormat::TarGz,
        }
    }

    #[tokio::test]
    async fn metadata_from_extracted_sdist() {
        let builder = WheelBuilder::new(Arc::new(StaticFrontend(METADATA.to_vec())), 2);
        let metadata = builder
            .sdist_metadata(&sdist_name(), fake_sdist_targz())
            .await
            .unwrap();
        assert_eq!(metadata.name.as_str(), "fake-pkg");
        assert_eq!(metadata.requires_dist.len(), 1);
    }

    #[tokio::test]
    async fn hook_failure_is_reported() {
        let builder = WheelBuilder::new(Arc::new(FailingFrontend), 2);
        let err = builder
            .sdist_metadata(&sdist_name(), fake_sdist_targz())
            .await
            .unwrap_err();
        assert!(matches!(err, WheelBuildError::HookFailed { .. }));
    }

    #[test]
    fn zip_archives_are_supported() {
        let mut payload = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut payload));
            writer
                .start_file("fake-pkg-1.0.0/setup.py", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"from setuptools import setup; setup()").unwrap();
            writer.finish().unwrap();
        }

        let dest = tempfile::tempdir().unwrap();
        extract_sdist(SDistFormat::Zip, &payload, dest.path()).unwrap();
        let root = source_tree_root(dest.path()).unwrap();
        assert!(root.ends_with("fake-pkg-1.0.0"));
    }
}
