//! Conversion backends.
//!
//! A backend turns an input document on disk into a PDF at a given path. It
//! only reports whether it believes it succeeded; the converter checks the
//! output itself.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

const INPUT_TOKEN: &str = "{input}";
const OUTPUT_TOKEN: &str = "{output}";
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Why a backend invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// The backend cannot be started at all. Not worth retrying.
    Unavailable(String),
    /// The backend ran and failed, or did not finish in time.
    Failed(String),
}

#[async_trait]
pub trait ConversionBackend: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), BackendFailure>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Runs an external program such as `typst compile {input} {output}`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    /// `args` may contain `{input}` and `{output}`; they are replaced with the
    /// document and artifact paths on every invocation.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_TOKEN, &input)
                    .replace(OUTPUT_TOKEN, &output)
            })
            .collect()
    }
}

#[async_trait]
impl ConversionBackend for CommandBackend {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), BackendFailure> {
        let mut command = Command::new(&self.program);
        command
            .args(self.expand_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => BackendFailure::Unavailable(
                format!("cannot execute '{}': {}", self.program.display(), err),
            ),
            _ => BackendFailure::Failed(format!(
                "failed to start '{}': {}",
                self.program.display(),
                err
            )),
        })?;

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|err| {
                BackendFailure::Failed(format!("failed to wait for converter: {err}"))
            })?,
            Err(_) => {
                return Err(BackendFailure::Failed(format!(
                    "converter timed out after {}s",
                    self.timeout.as_secs_f32()
                )))
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic: String = stderr.trim().chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        Err(BackendFailure::Failed(if diagnostic.is_empty() {
            format!("converter exited with status {code}")
        } else {
            format!("converter exited with status {code}: {diagnostic}")
        }))
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}
