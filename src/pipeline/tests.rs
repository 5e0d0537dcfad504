use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::convert::{BackendFailure, ConversionBackend, ConverterError};
use crate::mail::{MailTransport, OutgoingMessage, TransportAck, TransportError};
use crate::retry::RetryPolicy;

struct EchoBackend;

#[async_trait]
impl ConversionBackend for EchoBackend {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), BackendFailure> {
        let source = std::fs::read(input).map_err(|err| BackendFailure::Failed(err.to_string()))?;
        std::fs::write(output, [b"%PDF-1.4\n".as_slice(), &source].concat())
            .map_err(|err| BackendFailure::Failed(err.to_string()))
    }

    fn describe(&self) -> String {
        "echo".into()
    }
}

struct AcceptAll;

#[async_trait]
impl MailTransport for AcceptAll {
    async fn send(&self, _message: &OutgoingMessage) -> Result<TransportAck, TransportError> {
        Ok(TransportAck {
            code: "250".into(),
            message: "OK".into(),
        })
    }
}

fn pipeline(dir: &Path, template: &str, keep: bool, run_timeout: Duration) -> ReportPipeline {
    let template_path = dir.join("wrap.txt");
    std::fs::write(&template_path, template).unwrap();

    let mut report = ReportConfig::new(template_path, dir.join("out"));
    report.keep_artifacts = keep;
    report.run_timeout = run_timeout;

    ReportPipeline::new(
        report,
        vec!["desk@example.com".into()],
        TemplateRenderer::new(),
        DocumentConverter::new(Arc::new(EchoBackend), RetryPolicy::none()),
        Mailer::new("reports@example.com", Arc::new(AcceptAll), RetryPolicy::none()),
    )
}

fn context() -> ReportContext {
    ReportContext::builder()
        .field("DATE", "16-Oct-2026")
        .field("NIFTY", "24812.30")
        .build()
        .unwrap()
}

#[test]
fn test_attachment_file_name() {
    assert_eq!(
        attachment_file_name("Market_Wrap_16-Oct-2026.pdf"),
        "Market_Wrap_16-Oct-2026.pdf"
    );
    assert_eq!(attachment_file_name("Q1 report"), "Q1 report.pdf");
    assert_eq!(attachment_file_name("../../etc/passwd"), "etcpasswd.pdf");
    assert_eq!(attachment_file_name("  "), "report.pdf");
    assert_eq!(attachment_file_name("SUMMARY.PDF"), "SUMMARY.PDF");
}

#[tokio::test]
async fn test_successful_run_walks_every_state() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "NIFTY {{NIFTY}}", true, Duration::from_secs(60));

    let outcome = pipeline.run(context()).await;

    assert!(outcome.is_success(), "{outcome}");
    assert_eq!(
        outcome.trace,
        vec![
            RunState::Start,
            RunState::Rendering,
            RunState::Converting,
            RunState::Delivering,
            RunState::Done,
        ]
    );
    assert_eq!(outcome.exit_code(), 0);

    let report = outcome.report().unwrap();
    let path = report.artifact_path.as_ref().unwrap();
    assert!(path.ends_with("Market_Wrap_16-Oct-2026.pdf"));
    assert!(path.starts_with(dir.path().join("out").join(outcome.run_id.to_string())));
    assert_eq!(report.subject, "Market Daily Wrap — 16-Oct-2026");
    assert_eq!(std::fs::metadata(path).unwrap().len(), report.artifact_size);
}

#[tokio::test]
async fn test_artifacts_removed_when_not_kept() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "NIFTY {{NIFTY}}", false, Duration::from_secs(60));
    let run = pipeline.start(context());
    let run_dir = run.output_dir();

    let outcome = run.execute(&CancellationToken::new()).await;

    assert!(outcome.is_success());
    assert!(outcome.report().unwrap().artifact_path.is_none());
    assert!(!run_dir.exists());
}

#[tokio::test]
async fn test_missing_field_stops_at_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "{{SENSEX}}", true, Duration::from_secs(60));

    let outcome = pipeline.run(context()).await;

    assert_eq!(outcome.failed_stage(), Some(Stage::Rendering));
    assert!(matches!(
        outcome.cause(),
        Some(StageError::Template(crate::template::TemplateError::MissingField { .. }))
    ));
    assert!(!outcome.reached(RunState::Converting));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.trace.last(), Some(&RunState::Failed(Stage::Rendering)));
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "{{NIFTY}}", true, Duration::from_secs(60));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = pipeline.start(context()).execute(&cancel).await;

    assert!(matches!(outcome.cause(), Some(StageError::Cancelled)));
    assert_eq!(
        outcome.trace,
        vec![RunState::Start, RunState::Failed(Stage::Rendering)]
    );
    assert_eq!(outcome.exit_code(), 5);
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_expired_deadline_fails_before_first_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "{{NIFTY}}", true, Duration::ZERO);

    let outcome = pipeline.run(context()).await;

    assert!(matches!(outcome.cause(), Some(StageError::TimedOut)));
    assert_eq!(outcome.exit_code(), 5);
}

#[tokio::test]
async fn test_runs_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), "{{NIFTY}}", true, Duration::from_secs(60));

    let first = pipeline.start(context());
    let second = pipeline.start(context());
    assert_ne!(first.id(), second.id());
    assert_ne!(first.output_dir(), second.output_dir());
}

#[test]
fn test_exit_codes_per_stage() {
    let failed = |stage, cause| RunOutcome {
        run_id: Uuid::nil(),
        status: RunStatus::Failed { stage, cause },
        trace: vec![RunState::Start, RunState::Failed(stage)],
    };

    assert_eq!(
        failed(
            Stage::Converting,
            ConverterError::ConverterUnavailable("x".into()).into()
        )
        .exit_code(),
        3
    );
    assert_eq!(
        failed(Stage::Delivering, MailError::NoRecipients.into()).exit_code(),
        4
    );
    let outcome = failed(
        Stage::Delivering,
        MailError::AuthenticationFailed("535".into()).into(),
    );
    assert_eq!(
        outcome.to_string(),
        format!(
            "run {} failed at Delivering: SMTP authentication failed: 535",
            Uuid::nil()
        )
    );
}
