#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use report_mailer::config::ReportConfig;
use report_mailer::context::ReportContext;
use report_mailer::convert::{BackendFailure, ConversionBackend, DocumentConverter};
use report_mailer::mail::{Mailer, MailTransport, OutgoingMessage, TransportAck, TransportError};
use report_mailer::retry::RetryPolicy;
use report_mailer::template::TemplateRenderer;
use report_mailer::ReportPipeline;
use tokio_util::sync::CancellationToken;

pub const MARKET_WRAP_HTML: &str = "<html><body>\n\
<h1>Market Wrap {{DATE}}</h1>\n\
<p>NIFTY {{ NIFTY }} / SENSEX {{ SENSEX }}</p>\n\
<section>{{Executive Summary}}</section>\n\
</body></html>\n";

/// Writes a fake PDF containing the input document, or fails as configured.
pub struct FakeBackend {
    mode: BackendMode,
    calls: Mutex<u32>,
    cancel_on_call: Option<CancellationToken>,
}

pub enum BackendMode {
    Succeed,
    Unavailable,
    Fail,
}

impl FakeBackend {
    pub fn new(mode: BackendMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(0),
            cancel_on_call: None,
        })
    }

    /// Succeeds, but cancels `token` while converting.
    pub fn cancelling(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            mode: BackendMode::Succeed,
            calls: Mutex::new(0),
            cancel_on_call: Some(token),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ConversionBackend for FakeBackend {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), BackendFailure> {
        *self.calls.lock().unwrap() += 1;
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        match self.mode {
            BackendMode::Unavailable => {
                Err(BackendFailure::Unavailable("cannot execute 'typst': not found".into()))
            }
            BackendMode::Fail => Err(BackendFailure::Failed("exit status 1".into())),
            BackendMode::Succeed => {
                let source = tokio::fs::read(input)
                    .await
                    .map_err(|err| BackendFailure::Failed(err.to_string()))?;
                let mut pdf = b"%PDF-1.7\n".to_vec();
                pdf.extend_from_slice(&source);
                tokio::fs::write(output, pdf)
                    .await
                    .map_err(|err| BackendFailure::Failed(err.to_string()))
            }
        }
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

/// Replays scripted results, then accepts everything; records accepted messages.
#[derive(Default)]
pub struct RecordingTransport {
    script: Mutex<VecDeque<Result<TransportAck, TransportError>>>,
    accepted: Mutex<Vec<OutgoingMessage>>,
    calls: Mutex<u32>,
}

impl RecordingTransport {
    pub fn new(script: Vec<Result<TransportAck, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    pub fn accepted(&self) -> Vec<OutgoingMessage> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<TransportAck, TransportError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(TransportAck {
                code: "250".into(),
                message: "2.0.0 OK queued".into(),
            })
        });
        if next.is_ok() {
            self.accepted.lock().unwrap().push(message.clone());
        }
        next
    }
}

pub fn market_context() -> ReportContext {
    ReportContext::from_json_str(
        r#"{
            "DATE": "2026-10-16",
            "NIFTY": 24812.3,
            "SENSEX": 81224.75,
            "Executive Summary": "Banks <led> & IT lagged"
        }"#,
    )
    .unwrap()
}

pub fn report_config(dir: &Path) -> ReportConfig {
    let template_path = dir.join("market_wrap.html");
    std::fs::write(&template_path, MARKET_WRAP_HTML).unwrap();
    ReportConfig::new(template_path, dir.join("reports"))
}

pub fn pipeline(
    report: ReportConfig,
    backend: Arc<FakeBackend>,
    transport: Arc<RecordingTransport>,
) -> ReportPipeline {
    ReportPipeline::new(
        report,
        vec!["desk@example.com".into(), "pm@example.com".into()],
        TemplateRenderer::new(),
        DocumentConverter::new(backend, RetryPolicy::immediate(2)),
        Mailer::new(
            "reports@example.com",
            transport,
            RetryPolicy::new(3, Duration::from_millis(10)),
        ),
    )
}
