//! Pipeline orchestration - render, convert, deliver for one report run.
//!
//! [`ReportPipeline`] holds the stage components and can be shared between
//! concurrent runs. Each call to [`ReportPipeline::start`] yields a fresh
//! [`ReportRun`] with its own id, output directory and state; a run is
//! consumed by [`ReportRun::execute`] and cannot be restarted.
//!
//! A stage only starts when the previous one succeeded. Cancellation and the
//! run deadline are honoured between stages, never inside one.

pub mod outcome;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{AppConfig, ReportConfig};
use crate::context::ReportContext;
use crate::convert::{CommandBackend, DocumentConverter};
use crate::mail::{DeliveryRequest, MailError, Mailer, SmtpTransport};
use crate::template::{RenderedDocument, TemplateRenderer};
pub use outcome::{RunOutcome, RunReport, RunState, RunStatus, Stage, StageError};

const FALLBACK_ATTACHMENT_NAME: &str = "report.pdf";

/// Everything the Rendering stage hands forward.
#[derive(Debug)]
struct RenderedReport {
    document: RenderedDocument,
    subject: String,
    body: String,
    attachment_name: String,
}

#[derive(Clone)]
pub struct ReportPipeline {
    report: Arc<ReportConfig>,
    recipients: Arc<Vec<String>>,
    renderer: TemplateRenderer,
    converter: DocumentConverter,
    mailer: Mailer,
}

impl ReportPipeline {
    pub fn new(
        report: ReportConfig,
        recipients: Vec<String>,
        renderer: TemplateRenderer,
        converter: DocumentConverter,
        mailer: Mailer,
    ) -> Self {
        Self {
            report: Arc::new(report),
            recipients: Arc::new(recipients),
            renderer,
            converter,
            mailer,
        }
    }

    /// Wire the production backends: an external converter program and SMTP.
    pub fn from_config(config: &AppConfig) -> Result<Self, MailError> {
        let backend = CommandBackend::new(
            config.converter.program.clone(),
            config.converter.args.clone(),
            config.converter.timeout,
        );
        let converter =
            DocumentConverter::new(Arc::new(backend), config.converter.retry_policy());

        let transport = SmtpTransport::new(&config.smtp)?;
        let mailer = Mailer::new(
            config.delivery.sender.clone(),
            Arc::new(transport),
            config.smtp.retry_policy(),
        );

        Ok(Self::new(
            config.report.clone(),
            config.delivery.recipients.clone(),
            TemplateRenderer::new(),
            converter,
            mailer,
        ))
    }

    /// Prepare a new run for `context`. Nothing is touched until it executes.
    pub fn start(&self, context: ReportContext) -> ReportRun {
        ReportRun {
            id: Uuid::new_v4(),
            pipeline: self.clone(),
            context,
            trace: vec![RunState::Start],
        }
    }

    /// Execute one run to completion.
    pub async fn run(&self, context: ReportContext) -> RunOutcome {
        self.start(context).execute(&CancellationToken::new()).await
    }
}

/// A single pass through the pipeline.
pub struct ReportRun {
    id: Uuid,
    pipeline: ReportPipeline,
    context: ReportContext,
    trace: Vec<RunState>,
}

type StageFailure = (Stage, StageError);

impl ReportRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory holding this run's artifact.
    pub fn output_dir(&self) -> PathBuf {
        self.pipeline.report.output_dir.join(self.id.to_string())
    }

    pub async fn execute(mut self, cancel: &CancellationToken) -> RunOutcome {
        log::info!(
            "[run {}] starting report from {}",
            self.id,
            self.pipeline.report.template_path.display()
        );

        let run_dir = self.output_dir();
        let status = match self.advance(cancel, &run_dir).await {
            Ok(report) => {
                self.enter(RunState::Done);
                RunStatus::Done(report)
            }
            Err((stage, cause)) => {
                log::error!("[run {}] failed at {}: {}", self.id, stage, cause);
                self.trace.push(RunState::Failed(stage));
                RunStatus::Failed { stage, cause }
            }
        };

        let keep = self.pipeline.report.keep_artifacts;
        if !(keep && matches!(status, RunStatus::Done(_))) {
            remove_run_dir(self.id, &run_dir, keep).await;
        }

        RunOutcome {
            run_id: self.id,
            status,
            trace: self.trace,
        }
    }

    async fn advance(
        &mut self,
        cancel: &CancellationToken,
        run_dir: &Path,
    ) -> Result<RunReport, StageFailure> {
        let deadline = Instant::now() + self.pipeline.report.run_timeout;

        self.begin(Stage::Rendering, cancel, deadline)?;
        let rendered = self
            .render()
            .await
            .map_err(|cause| (Stage::Rendering, cause))?;

        self.begin(Stage::Converting, cancel, deadline)?;
        let artifact_path = run_dir.join(&rendered.attachment_name);
        let artifact = self
            .pipeline
            .converter
            .convert(&rendered.document, &artifact_path)
            .await
            .map_err(|err| (Stage::Converting, err.into()))?;

        self.begin(Stage::Delivering, cancel, deadline)?;
        let artifact_size = artifact.size_bytes();
        let request = DeliveryRequest::new(
            self.pipeline.recipients.to_vec(),
            rendered.subject.clone(),
            rendered.body,
            rendered.attachment_name,
            artifact,
        );
        let receipt = self
            .pipeline
            .mailer
            .deliver(request)
            .await
            .map_err(|err| (Stage::Delivering, err.into()))?;

        Ok(RunReport {
            subject: rendered.subject,
            receipt,
            artifact_size,
            artifact_path: self.pipeline.report.keep_artifacts.then_some(artifact_path),
        })
    }

    /// Enter `stage` unless the run was cancelled or ran out of time.
    fn begin(
        &mut self,
        stage: Stage,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), StageFailure> {
        if cancel.is_cancelled() {
            return Err((stage, StageError::Cancelled));
        }
        if Instant::now() >= deadline {
            return Err((stage, StageError::TimedOut));
        }
        self.enter(match stage {
            Stage::Rendering => RunState::Rendering,
            Stage::Converting => RunState::Converting,
            Stage::Delivering => RunState::Delivering,
        });
        Ok(())
    }

    async fn render(&self) -> Result<RenderedReport, StageError> {
        let renderer = &self.pipeline.renderer;
        let report = &self.pipeline.report;

        let template = renderer.load(&report.template_path).await?;
        let document = renderer.render(&template, &self.context)?;
        let subject = renderer.render_text("subject", &report.subject_template, &self.context)?;
        let body = renderer.render_text("body", &report.body_template, &self.context)?;
        let attachment_name = attachment_file_name(&renderer.render_text(
            "attachment name",
            &report.attachment_name_template,
            &self.context,
        )?);

        log::debug!(
            "[run {}] rendered '{}' ({} bytes), attachment '{}'",
            self.id,
            document.template_name,
            document.content.len(),
            attachment_name
        );
        Ok(RenderedReport {
            document,
            subject,
            body,
            attachment_name,
        })
    }

    fn enter(&mut self, state: RunState) {
        log::info!("[run {}] {:?}", self.id, state);
        self.trace.push(state);
    }
}

/// With `keep` only an empty directory is removed.
async fn remove_run_dir(run_id: Uuid, run_dir: &Path, keep: bool) {
    let result = if keep {
        tokio::fs::remove_dir(run_dir).await
    } else {
        tokio::fs::remove_dir_all(run_dir).await
    };
    match result {
        Ok(()) => log::debug!("[run {}] removed {}", run_id, run_dir.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::debug!(
            "[run {}] left {} in place: {}",
            run_id,
            run_dir.display(),
            err
        ),
    }
}

/// Sanitized attachment file name that always ends in `.pdf`.
fn attachment_file_name(raw: &str) -> String {
    let name = sanitize_filename::sanitize(raw.trim());
    let name = name.trim().trim_matches('.');
    if name.is_empty() {
        return FALLBACK_ATTACHMENT_NAME.to_string();
    }
    if name.to_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{name}.pdf")
    }
}
