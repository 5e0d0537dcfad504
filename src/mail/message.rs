//! MIME message assembly.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;

use super::MailError;

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A fully built message plus the envelope details the mailer reports on.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub attachment_name: String,
    pub message: Message,
}

impl OutgoingMessage {
    /// Plain-text body with the PDF attached under `attachment_name`.
    pub fn build(
        from: &Mailbox,
        to: &[Mailbox],
        subject: &str,
        body: &str,
        attachment_name: &str,
        pdf: Vec<u8>,
    ) -> Result<Self, MailError> {
        let content_type = ContentType::parse(PDF_CONTENT_TYPE)
            .map_err(|err| MailError::MessageBuild(err.to_string()))?;
        let attachment = Attachment::new(attachment_name.to_string()).body(pdf, content_type);

        let mut builder = Message::builder().from(from.clone()).subject(subject);
        for recipient in to {
            builder = builder.to(recipient.clone());
        }

        let message = builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(attachment),
            )
            .map_err(|err| MailError::MessageBuild(err.to_string()))?;

        Ok(Self {
            recipients: to.iter().map(|mailbox| mailbox.email.to_string()).collect(),
            subject: subject.to_string(),
            attachment_name: attachment_name.to_string(),
            message,
        })
    }

    /// RFC 5322 bytes as they would go on the wire.
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}
