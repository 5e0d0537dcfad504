//! Report delivery over SMTP.
//!
//! This module contains:
//! - `message` - MIME assembly of the report mail
//! - `transport` - the [`MailTransport`] seam and its failure classes
//! - `smtp` - the lettre-backed production transport
//!
//! Delivery is not idempotent. A retry is only issued when the previous
//! attempt is known not to have reached the server's acceptance; a session
//! that breaks after the message data was sent is reported as
//! [`MailError::DeliveryUnconfirmed`] and left to the operator.

pub mod message;
pub mod smtp;
pub mod transport;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use lettre::message::Mailbox;
use thiserror::Error;

use crate::convert::Artifact;
use crate::retry::RetryPolicy;
pub use message::OutgoingMessage;
pub use smtp::SmtpTransport;
pub use transport::{MailTransport, TransportAck, TransportError};

/// Errors that can occur during delivery.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("mail server unreachable after {attempts} attempt(s): {reason}")]
    TransportUnreachable { attempts: u32, reason: String },
    #[error("mail server rejected the message{}: {reason}", .code.map(|c| format!(" ({c})")).unwrap_or_default())]
    SendRejected { code: Option<u16>, reason: String },
    #[error("attachment {} is missing or empty: {reason}", .path.display())]
    AttachmentMissing { path: PathBuf, reason: String },
    #[error("delivery request has no recipients")]
    NoRecipients,
    #[error("invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to build message: {0}")]
    MessageBuild(String),
    #[error("failed to set up mail transport: {0}")]
    TransportSetup(String),
    #[error("delivery outcome unknown, the message may or may not have been delivered: {0}")]
    DeliveryUnconfirmed(String),
}

/// One message to send: recipients, text and exactly one artifact.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    recipients: Vec<String>,
    subject: String,
    body: String,
    attachment_name: String,
    artifact: Artifact,
}

impl DeliveryRequest {
    pub fn new(
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        attachment_name: impl Into<String>,
        artifact: Artifact,
    ) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
            attachment_name: attachment_name.into(),
            artifact,
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

/// Proof of acceptance by the mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipients: Vec<String>,
    pub server_reply: TransportAck,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct Mailer {
    sender: String,
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
}

impl Mailer {
    pub fn new(
        sender: impl Into<String>,
        transport: Arc<dyn MailTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sender: sender.into(),
            transport,
            retry,
        }
    }

    /// Send `request` as a single message with its artifact attached.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryReceipt, MailError> {
        if request.recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let from = parse_mailbox(&self.sender)?;
        let to = request
            .recipients
            .iter()
            .map(|address| parse_mailbox(address))
            .collect::<Result<Vec<_>, _>>()?;

        let pdf = read_attachment(&request.artifact).await?;
        let outgoing = OutgoingMessage::build(
            &from,
            &to,
            &request.subject,
            &request.body,
            &request.attachment_name,
            pdf,
        )?;

        let mut attempt = 1;
        loop {
            if let Some(delay) = self.retry.delay_before(attempt) {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match self.transport.send(&outgoing).await {
                Ok(ack) => {
                    log::info!(
                        "delivered '{}' to {} recipient(s) on attempt {} ({} {})",
                        outgoing.subject,
                        outgoing.recipients.len(),
                        attempt,
                        ack.code,
                        ack.message
                    );
                    return Ok(DeliveryReceipt {
                        recipients: outgoing.recipients.clone(),
                        server_reply: ack,
                        attempts: attempt,
                    });
                }
                Err(TransportError::Unreachable(reason)) => {
                    if !self.retry.allows(attempt + 1) {
                        return Err(MailError::TransportUnreachable {
                            attempts: attempt,
                            reason,
                        });
                    }
                    log::warn!(
                        "mail attempt {}/{} failed before acceptance, retrying: {}",
                        attempt,
                        self.retry.max_attempts,
                        reason
                    );
                    attempt += 1;
                }
                Err(TransportError::AuthenticationFailed(reason)) => {
                    return Err(MailError::AuthenticationFailed(reason))
                }
                Err(TransportError::Rejected { code, reason }) => {
                    return Err(MailError::SendRejected { code, reason })
                }
                Err(TransportError::Unconfirmed(reason)) => {
                    log::error!(
                        "delivery of '{}' is unconfirmed and will not be retried: {}",
                        outgoing.subject,
                        reason
                    );
                    return Err(MailError::DeliveryUnconfirmed(reason));
                }
            }
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|err| MailError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        })
}

/// Re-check the artifact right before sending and load its bytes.
async fn read_attachment(artifact: &Artifact) -> Result<Vec<u8>, MailError> {
    let missing = |reason: String| MailError::AttachmentMissing {
        path: artifact.path().to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(artifact.path())
        .await
        .map_err(|err| missing(err.to_string()))?;
    if bytes.is_empty() {
        return Err(missing("file is empty".to_string()));
    }
    Ok(bytes)
}
