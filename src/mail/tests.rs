use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::*;

/// Replays scripted results and records every message it was handed.
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportAck, TransportError>>>,
    accepted: Mutex<Vec<OutgoingMessage>>,
    calls: Mutex<u32>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<TransportAck, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            accepted: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn accepted(&self) -> usize {
        self.accepted.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<TransportAck, TransportError> {
        *self.calls.lock().unwrap() += 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ok_ack()));
        if next.is_ok() {
            self.accepted.lock().unwrap().push(message.clone());
        }
        next
    }
}

fn ok_ack() -> TransportAck {
    TransportAck {
        code: "250".into(),
        message: "2.0.0 OK queued".into(),
    }
}

async fn artifact_in(dir: &tempfile::TempDir) -> Artifact {
    let path = dir.path().join("Market_Wrap.pdf");
    std::fs::write(&path, b"%PDF-1.4 report").unwrap();
    Artifact::from_existing(path).await.unwrap()
}

fn request(artifact: Artifact, recipients: &[&str]) -> DeliveryRequest {
    DeliveryRequest::new(
        recipients.iter().map(|r| r.to_string()).collect(),
        "Market Daily Wrap",
        "Attached.",
        "Market_Wrap.pdf",
        artifact,
    )
}

fn mailer(transport: Arc<ScriptedTransport>, attempts: u32) -> Mailer {
    Mailer::new(
        "reports@example.com",
        transport,
        RetryPolicy::immediate(attempts),
    )
}

#[tokio::test]
async fn test_deliver_sends_one_message() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![]);

    let receipt = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com", "b@example.com"]))
        .await
        .unwrap();

    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.recipients, vec!["a@example.com", "b@example.com"]);
    assert_eq!(receipt.server_reply.code, "250");
    assert_eq!(transport.accepted(), 1);
}

#[tokio::test]
async fn test_unreachable_is_retried_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Err(TransportError::Unreachable(
        "connection refused".into(),
    ))]);

    let receipt = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com"]))
        .await
        .unwrap();

    assert_eq!(receipt.attempts, 2);
    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.accepted(), 1);
}

#[tokio::test]
async fn test_unreachable_exhausts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let down = || Err(TransportError::Unreachable("timed out".into()));
    let transport = ScriptedTransport::new(vec![down(), down(), down(), down()]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::TransportUnreachable { attempts: 3, .. }));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Err(TransportError::AuthenticationFailed(
        "535 5.7.8 Username and Password not accepted".into(),
    ))]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::AuthenticationFailed(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_rejection_carries_server_reason() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Err(TransportError::Rejected {
        code: Some(550),
        reason: "mailbox unavailable".into(),
    })]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com"]))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "mail server rejected the message (550): mailbox unavailable"
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_unconfirmed_delivery_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Err(TransportError::Unconfirmed(
        "connection reset after DATA".into(),
    ))]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact_in(&dir).await, &["a@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::DeliveryUnconfirmed(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_artifact_removed_before_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = artifact_in(&dir).await;
    std::fs::remove_file(artifact.path()).unwrap();
    let transport = ScriptedTransport::new(vec![]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact, &["a@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::AttachmentMissing { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_artifact_truncated_before_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = artifact_in(&dir).await;
    std::fs::write(artifact.path(), b"").unwrap();
    let transport = ScriptedTransport::new(vec![]);

    let err = mailer(transport.clone(), 3)
        .deliver(request(artifact, &["a@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::AttachmentMissing { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_recipients_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![]);
    let mailer = mailer(transport.clone(), 3);

    let err = mailer
        .deliver(request(artifact_in(&dir).await, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::NoRecipients));

    let err = mailer
        .deliver(request(artifact_in(&dir).await, &["not-an-address"]))
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::InvalidAddress { ref address, .. } if address == "not-an-address"));
    assert_eq!(transport.calls(), 0);
}
