//! SMTP transport built on lettre's async client.
//!
//! Each send drives one connection through connect, TLS, AUTH and the
//! envelope before any message data is written, so a failure can be
//! attributed to the phase it happened in.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::{ClientId, Extension, MailBodyParameter, MailParameter};
use lettre::transport::smtp::response::Response;
use lettre::transport::smtp::Error as SmtpError;

use super::message::OutgoingMessage;
use super::transport::{MailTransport, TransportAck, TransportError};
use super::MailError;
use crate::config::{SmtpConfig, TlsMode};

/// Reply codes that mean the credentials were refused.
const AUTH_FAILURE_CODES: [u16; 4] = [530, 534, 535, 538];

pub struct SmtpTransport {
    host: String,
    port: u16,
    tls: TlsMode,
    tls_parameters: Option<TlsParameters>,
    credentials: Credentials,
    timeout: Duration,
    hello_name: ClientId,
    endpoint: String,
}

/// Where in the session a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Connect, greeting, EHLO, STARTTLS and AUTH.
    Session,
    /// MAIL, RCPT and DATA. No message content has been written.
    Envelope,
    /// Message content and the final reply.
    Message,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let tls_parameters = match config.tls {
            TlsMode::None => None,
            TlsMode::StartTls | TlsMode::Tls => Some(
                TlsParameters::new(config.host.clone())
                    .map_err(|err| MailError::TransportSetup(err.to_string()))?,
            ),
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            tls: config.tls,
            tls_parameters,
            credentials: Credentials::new(config.username.clone(), config.password.clone()),
            timeout: config.timeout,
            hello_name: ClientId::default(),
            endpoint: format!("{}:{}", config.host, config.port),
        })
    }

    /// Runs one step of the session under the configured timeout.
    async fn step<T>(
        &self,
        phase: Phase,
        fut: impl Future<Output = Result<T, SmtpError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(phase, &err)),
            Err(_) => {
                let reason = format!("{} timed out after {:?}", self.endpoint, self.timeout);
                Err(match phase {
                    Phase::Message => TransportError::Unconfirmed(reason),
                    Phase::Session | Phase::Envelope => TransportError::Unreachable(reason),
                })
            }
        }
    }

    async fn open(&self) -> Result<AsyncSmtpConnection, TransportError> {
        let implicit_tls = match self.tls {
            TlsMode::Tls => self.tls_parameters.clone(),
            TlsMode::StartTls | TlsMode::None => None,
        };
        let mut conn = self
            .step(
                Phase::Session,
                AsyncSmtpConnection::connect_tokio1(
                    (self.host.as_str(), self.port),
                    Some(self.timeout),
                    &self.hello_name,
                    implicit_tls,
                    None,
                ),
            )
            .await?;

        if let (TlsMode::StartTls, Some(params)) = (self.tls, &self.tls_parameters) {
            let upgraded = self
                .step(Phase::Session, conn.starttls(params.clone(), &self.hello_name))
                .await;
            if let Err(err) = upgraded {
                self.close(conn, false).await;
                return Err(err);
            }
        }

        let authenticated = self
            .step(Phase::Session, conn.auth(DEFAULT_MECHANISMS, &self.credentials))
            .await;
        if let Err(err) = authenticated {
            self.close(conn, false).await;
            return Err(err);
        }

        log::debug!("SMTP session to {} established", self.endpoint);
        Ok(conn)
    }

    async fn transmit(
        &self,
        conn: &mut AsyncSmtpConnection,
        message: &OutgoingMessage,
    ) -> Result<Response, TransportError> {
        let envelope = message.message.envelope();
        let body = message.formatted();

        let mut options = Vec::new();
        let non_ascii = envelope.to().iter().any(|address| {
            let address: &str = address.as_ref();
            !address.is_ascii()
        });
        if non_ascii {
            if !conn.server_info().supports_feature(Extension::SmtpUtfEight) {
                return Err(TransportError::Rejected {
                    code: None,
                    reason: "recipient address is not ASCII and the server lacks SMTPUTF8"
                        .to_string(),
                });
            }
            options.push(MailParameter::SmtpUtfEight);
        }
        if !body.is_ascii() {
            if !conn.server_info().supports_feature(Extension::EightBitMime) {
                return Err(TransportError::Rejected {
                    code: None,
                    reason: "message is not 7-bit clean and the server lacks 8BITMIME"
                        .to_string(),
                });
            }
            options.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }

        self.step(
            Phase::Envelope,
            conn.command(Mail::new(envelope.from().cloned(), options)),
        )
        .await?;
        for recipient in envelope.to() {
            self.step(
                Phase::Envelope,
                conn.command(Rcpt::new(recipient.clone(), Vec::new())),
            )
            .await?;
        }
        self.step(Phase::Envelope, conn.command(Data)).await?;

        self.step(Phase::Message, conn.message(&body)).await
    }

    async fn close(&self, mut conn: AsyncSmtpConnection, clean: bool) {
        let closing = async {
            if clean {
                if let Err(err) = conn.quit().await {
                    log::debug!("QUIT to {} failed: {}", self.endpoint, err);
                }
            } else {
                conn.abort().await;
            }
        };
        if tokio::time::timeout(self.timeout, closing).await.is_err() {
            log::debug!("closing the session to {} timed out", self.endpoint);
        }
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<TransportAck, TransportError> {
        let mut conn = self.open().await?;
        let sent = self.transmit(&mut conn, message).await;
        self.close(conn, sent.is_ok()).await;

        let response = sent?;
        Ok(TransportAck {
            code: response.code().to_string(),
            message: response.message().collect::<Vec<_>>().join(" "),
        })
    }
}

fn reply_code(err: &SmtpError) -> Option<u16> {
    err.status().and_then(|code| code.to_string().parse().ok())
}

fn is_auth_failure(err: &SmtpError, code: Option<u16>) -> bool {
    code.is_some_and(|code| AUTH_FAILURE_CODES.contains(&code))
        || (err.is_client() && err.to_string().to_lowercase().contains("authentication"))
}

/// Before message content is written nothing can have been accepted, so a
/// broken connection is retryable. Once content is on the wire only an
/// explicit negative reply proves the server did not take it.
fn classify(phase: Phase, err: &SmtpError) -> TransportError {
    let code = reply_code(err);
    if phase != Phase::Message && is_auth_failure(err, code) {
        return TransportError::AuthenticationFailed(err.to_string());
    }
    if err.is_permanent() || err.is_client() {
        return TransportError::Rejected {
            code,
            reason: err.to_string(),
        };
    }
    if err.is_transient() || phase != Phase::Message {
        return TransportError::Unreachable(err.to_string());
    }
    TransportError::Unconfirmed(err.to_string())
}
