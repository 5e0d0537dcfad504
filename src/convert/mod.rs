//! Document conversion - rendered markup to a PDF artifact.
//!
//! The external tool's own success signal is not trusted on its own: an
//! artifact only exists once the output file is confirmed present and
//! non-empty. Failed attempts never leave a partial file behind.

pub mod backend;


use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::template::RenderedDocument;
pub use backend::{BackendFailure, CommandBackend, ConversionBackend};

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("rendered document '{0}' is empty")]
    EmptyDocument(String),
    #[error("converter unavailable: {0}")]
    ConverterUnavailable(String),
    #[error("conversion failed after {attempts} attempt(s): {reason}")]
    ConversionFailed { attempts: u32, reason: String },
    #[error("output path {} is not writable: {source}", .path.display())]
    OutputPathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare conversion input: {0}")]
    Workspace(#[source] std::io::Error),
}

/// A finished PDF on disk, produced by [`DocumentConverter::convert`] for a
/// present, non-empty file. Callers outside this crate cannot build one
/// from an arbitrary path:
///
/// ```compile_fail
/// # async fn wrap() {
/// let _ = report_mailer::convert::Artifact::from_existing("wrap.pdf").await;
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    size_bytes: u64,
}

impl Artifact {
    /// Confirm that `path` is a non-empty regular file.
    pub(crate) async fn from_existing(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        if metadata.len() == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("{} is empty", path.display()),
            ));
        }
        Ok(Self {
            path,
            size_bytes: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Wraps a [`ConversionBackend`] with output validation and retries.
#[derive(Clone)]
pub struct DocumentConverter {
    backend: Arc<dyn ConversionBackend>,
    retry: RetryPolicy,
}

impl DocumentConverter {
    pub fn new(backend: Arc<dyn ConversionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Convert `document` into a PDF written to `output_path`.
    pub async fn convert(
        &self,
        document: &RenderedDocument,
        output_path: &Path,
    ) -> Result<Artifact, ConverterError> {
        if document.is_blank() {
            return Err(ConverterError::EmptyDocument(document.template_name.clone()));
        }

        prepare_output(output_path).await?;

        let workspace = tempfile::Builder::new()
            .prefix("report-render-")
            .tempdir()
            .map_err(ConverterError::Workspace)?;
        let input_path = workspace
            .path()
            .join(format!("document.{}", document.format.extension()));
        tokio::fs::write(&input_path, &document.content)
            .await
            .map_err(ConverterError::Workspace)?;

        let mut attempt = 1;
        loop {
            if let Some(delay) = self.retry.delay_before(attempt) {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            log::debug!(
                "converting '{}' with {} (attempt {}/{})",
                document.template_name,
                self.backend.describe(),
                attempt,
                self.retry.max_attempts
            );

            match self.attempt(&input_path, output_path).await {
                Ok(artifact) => {
                    log::info!(
                        "converted '{}' to {} ({} bytes)",
                        document.template_name,
                        artifact.path().display(),
                        artifact.size_bytes()
                    );
                    return Ok(artifact);
                }
                Err(BackendFailure::Unavailable(reason)) => {
                    discard_partial(output_path).await;
                    return Err(ConverterError::ConverterUnavailable(reason));
                }
                Err(BackendFailure::Failed(reason)) => {
                    discard_partial(output_path).await;
                    if !self.retry.allows(attempt + 1) {
                        return Err(ConverterError::ConversionFailed {
                            attempts: attempt,
                            reason,
                        });
                    }
                    log::warn!(
                        "conversion attempt {} for '{}' failed, retrying: {}",
                        attempt,
                        document.template_name,
                        reason
                    );
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, input: &Path, output: &Path) -> Result<Artifact, BackendFailure> {
        self.backend.convert(input, output).await?;

        Artifact::from_existing(output).await.map_err(|err| {
            BackendFailure::Failed(format!(
                "converter reported success but produced no usable output: {err}"
            ))
        })
    }
}

/// Make sure `path` can be written and holds no stale file.
async fn prepare_output(path: &Path) -> Result<(), ConverterError> {
    let unwritable = |source: std::io::Error| ConverterError::OutputPathUnwritable {
        path: path.to_path_buf(),
        source,
    };

    if path.file_name().is_none() {
        return Err(unwritable(std::io::Error::new(
            ErrorKind::InvalidInput,
            "output path has no file name",
        )));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await.map_err(unwritable)?;

    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => {
            return Err(unwritable(std::io::Error::new(
                ErrorKind::InvalidInput,
                "output path is a directory",
            )))
        }
        Ok(_) => tokio::fs::remove_file(path).await.map_err(unwritable)?,
        Err(_) => {}
    }

    // The probe is removed when dropped.
    tempfile::Builder::new()
        .prefix(".probe-")
        .tempfile_in(&parent)
        .map(drop)
        .map_err(unwritable)
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("removed partial output {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => log::warn!(
            "failed to remove partial output {}: {}",
            path.display(),
            err
        ),
    }
}
