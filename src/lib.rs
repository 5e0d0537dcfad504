//! Daily report delivery: render a template, convert it to PDF and mail it.
//!
//! A run moves through three stages, each owned by one component:
//! [`template::TemplateRenderer`], [`convert::DocumentConverter`] and
//! [`mail::Mailer`]. [`pipeline::ReportPipeline`] sequences them and yields a
//! single [`pipeline::RunOutcome`].

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::context::ContextError;

pub mod config;
pub mod context;
pub mod convert;
pub mod mail;
pub mod pipeline;
pub mod retry;
pub mod template;

pub use crate::config::AppConfig;
pub use crate::context::{FieldValue, ReportContext};
pub use crate::pipeline::{ReportPipeline, RunOutcome};

/// Exit code for failures before a run could start.
pub const EXIT_STARTUP_FAILED: i32 = 1;

/// Load configuration and context, perform one run, return the exit code.
///
/// `context_arg` takes precedence over `REPORT_CONTEXT_FILE`. Without either
/// the run uses an empty context. `DATE` defaults to today in both cases, and
/// `Executive Summary` to a line quoting `NIFTY` and `SENSEX` when both are
/// present.
pub async fn run(context_arg: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    log::debug!("configuration: {:?}", config);

    let context_path =
        context_arg.or_else(|| std::env::var_os("REPORT_CONTEXT_FILE").map(PathBuf::from));
    let context = load_context(context_path).await?;

    let pipeline =
        ReportPipeline::from_config(&config).context("failed to set up the mail transport")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, the run stops before its next stage");
            on_signal.cancel();
        }
    });

    let outcome = pipeline.start(context).execute(&cancel).await;
    if outcome.is_success() {
        log::info!("{}", outcome);
    } else {
        log::error!("{}", outcome);
    }
    Ok(outcome.exit_code())
}

async fn load_context(path: Option<PathBuf>) -> anyhow::Result<ReportContext> {
    let context = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read context file {}", path.display()))?;
            ReportContext::from_json_str(&raw)
                .with_context(|| format!("invalid context file {}", path.display()))?
        }
        None => {
            log::warn!("no context file given, rendering with defaults only");
            ReportContext::default()
        }
    };

    Ok(with_defaults(&context, chrono::Local::now().date_naive())?)
}

/// `DATE` defaults to `today`; the executive summary defaults to a line
/// quoting both indices when the context has them.
fn with_defaults(context: &ReportContext, today: NaiveDate) -> Result<ReportContext, ContextError> {
    let mut builder = context.to_builder().with_default("DATE", today);
    if let (Some(nifty), Some(sensex)) = (context.get("NIFTY"), context.get("SENSEX")) {
        builder = builder.with_default(
            "Executive Summary",
            format!("Nifty closed at {nifty} and Sensex at {sensex}."),
        );
    }
    builder.build()
}
