//! Transport seam between the mailer and the wire.

use std::fmt;

use async_trait::async_trait;

use super::message::OutgoingMessage;

/// Transport failures, classified by whether the server may have accepted
/// the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing was accepted: connect, TLS or greeting failed, or the server
    /// answered with a transient 4xx. Safe to retry.
    Unreachable(String),
    /// Credentials were refused.
    AuthenticationFailed(String),
    /// The server permanently refused the message or a recipient.
    Rejected { code: Option<u16>, reason: String },
    /// The session broke after the message data may have been sent.
    Unconfirmed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(reason) => write!(f, "unreachable: {reason}"),
            Self::AuthenticationFailed(reason) => write!(f, "authentication failed: {reason}"),
            Self::Rejected {
                code: Some(code),
                reason,
            } => write!(f, "rejected ({code}): {reason}"),
            Self::Rejected { code: None, reason } => write!(f, "rejected: {reason}"),
            Self::Unconfirmed(reason) => write!(f, "unconfirmed: {reason}"),
        }
    }
}

/// The server's final acknowledgment of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAck {
    pub code: String,
    pub message: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Open a session, send `message` once, close the session.
    async fn send(&self, message: &OutgoingMessage) -> Result<TransportAck, TransportError>;
}
