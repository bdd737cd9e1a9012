//! Error replies: tells the sender why a message could not be filed.

use std::sync::Arc;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{unwrap_messages, MailerError, Result};
use crate::mail::mailbox::ReplyTransport;
use crate::model::message::IncomingMessage;

/// Filename of the original message attached to the reply.
pub const ORIGINAL_ATTACHMENT_NAME: &str = "messageContent.eml";

/// Fixed text placed before the failure details.
pub const REPLY_PREAMBLE: &str = "We are sorry to inform you that your message could not be \
filed by mailfiler. The original message is attached. Details:";

/// What happened to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Delivered to the submission server for these recipients.
    Sent { recipients: Vec<String> },
    /// The original had no usable `Reply-To`, `From` or `Sender`.
    NoRecipient,
}

/// Composes and sends error replies.
pub struct ErrorNotifier {
    sender: Mailbox,
    transport: Arc<dyn ReplyTransport>,
}

impl ErrorNotifier {
    /// Build a notifier sending as `sender_name <sender_address>`.
    pub fn new(
        sender_name: &str,
        sender_address: &str,
        transport: Arc<dyn ReplyTransport>,
    ) -> Result<Self> {
        let address = sender_address.parse().map_err(|e| {
            MailerError::Config(format!("invalid smtp.sender_address '{sender_address}': {e}"))
        })?;
        let name = (!sender_name.is_empty()).then(|| sender_name.to_string());
        Ok(Self {
            sender: Mailbox::new(name, address),
            transport,
        })
    }

    /// Compose the reply for `original` failing with `cause`.
    ///
    /// Returns `None` when no recipient can be resolved.
    pub fn compose(&self, original: &IncomingMessage, cause: &MailerError) -> Result<Option<Message>> {
        let mut recipients = Vec::new();
        for addr in original.reply_recipients() {
            match addr.address.parse() {
                Ok(parsed) => {
                    let name = (!addr.display_name.is_empty()).then(|| addr.display_name.clone());
                    recipients.push(Mailbox::new(name, parsed));
                }
                Err(e) => {
                    warn!(address = %addr.address, error = %e, "Skipping unusable reply address");
                }
            }
        }
        if recipients.is_empty() {
            return Ok(None);
        }

        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(format!("Error: {}", original.subject));
        for mailbox in recipients {
            builder = builder.to(mailbox);
        }

        if let Some(id) = &original.message_id {
            let references = original
                .references
                .iter()
                .chain(std::iter::once(id))
                .map(|r| format!("<{r}>"))
                .collect::<Vec<_>>()
                .join(" ");
            builder = builder
                .in_reply_to(format!("<{id}>"))
                .references(references);
        }

        let text = format!("{REPLY_PREAMBLE}\n\n{}", unwrap_messages(cause));
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| MailerError::notification("Cannot compose error reply", e))?;
        let original_part = Attachment::new(ORIGINAL_ATTACHMENT_NAME.to_string())
            .body(original.raw().to_vec(), content_type);

        let body = MultiPart::mixed()
            .singlepart(SinglePart::plain(text))
            .singlepart(original_part);

        builder
            .multipart(body)
            .map(Some)
            .map_err(|e| MailerError::notification("Cannot compose error reply", e))
    }

    /// Compose and deliver the reply.
    ///
    /// "No recipient" is a silent outcome, not an error. Delivery failures
    /// are returned to the caller.
    pub async fn notify(
        &self,
        original: &IncomingMessage,
        cause: &MailerError,
        token: &CancellationToken,
    ) -> Result<NotifyOutcome> {
        let Some(reply) = self.compose(original, cause)? else {
            warn!(subject = %original.subject, "No reply address on failed message; sender not informed");
            return Ok(NotifyOutcome::NoRecipient);
        };

        let recipients: Vec<String> = reply.envelope().to().iter().map(|a| a.to_string()).collect();
        self.transport.send(reply, token).await?;
        info!(recipients = %recipients.join(", "), "Error reply sent");
        Ok(NotifyOutcome::Sent { recipients })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mail_parser::MessageParser;

    use crate::parser::mime::attachment_parts;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ReplyTransport for Recorder {
        async fn send(&self, message: Message, _token: &CancellationToken) -> Result<()> {
            self.sent.lock().unwrap().push(message.formatted());
            Ok(())
        }
    }

    const ORIGINAL: &str = "From: Alice <alice@example.com>\r\n\
To: filer@example.com\r\n\
Subject: random text\r\n\
Message-ID: <m2@example.com>\r\n\
References: <m0@example.com> <m1@example.com>\r\n\
\r\n\
Hello\r\n";

    fn notifier(transport: Arc<dyn ReplyTransport>) -> ErrorNotifier {
        ErrorNotifier::new("mailfiler - noReply", "filer@example.com", transport).unwrap()
    }

    fn cause() -> MailerError {
        MailerError::DirectoryResolution {
            project_no: "PRJ-1".into(),
            repo_dir: "/repo".into(),
            source: std::io::Error::other("disk on fire"),
        }
    }

    #[test]
    fn test_compose_threads_and_attaches() {
        let notifier = notifier(Arc::new(Recorder::default()));
        let original = IncomingMessage::from_raw(ORIGINAL.as_bytes().to_vec());
        let reply = notifier.compose(&original, &cause()).unwrap().expect("reply");

        let to: Vec<String> = reply.envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(to, vec!["alice@example.com"]);

        let raw = reply.formatted();
        let parsed = MessageParser::default().parse(&raw[..]).unwrap();
        assert_eq!(parsed.subject(), Some("Error: random text"));
        assert_eq!(parsed.in_reply_to().as_text(), Some("m2@example.com"));
        let refs = match parsed.references() {
            mail_parser::HeaderValue::TextList(list) => {
                list.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            }
            other => panic!("unexpected references: {other:?}"),
        };
        assert_eq!(refs, vec!["m0@example.com", "m1@example.com", "m2@example.com"]);

        let text = parsed.body_text(0).unwrap();
        assert!(text.contains("Error while searching project directory for 'PRJ-1'"));
        assert!(text.contains("disk on fire"));

        let parts = attachment_parts(&raw);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, ORIGINAL_ATTACHMENT_NAME);
        let attached = String::from_utf8_lossy(&parts[0].contents).to_string();
        assert!(attached.starts_with("From: Alice <alice@example.com>"));
        assert!(attached.contains("Subject: random text"));
    }

    #[test]
    fn test_compose_without_message_id() {
        let notifier = notifier(Arc::new(Recorder::default()));
        let raw = "From: bob@example.com\r\nSubject: hi\r\n\r\nbody\r\n";
        let original = IncomingMessage::from_raw(raw.as_bytes().to_vec());
        let reply = notifier.compose(&original, &cause()).unwrap().expect("reply");
        let formatted = String::from_utf8_lossy(&reply.formatted()).to_string();
        assert!(!formatted.contains("In-Reply-To"));
    }

    #[tokio::test]
    async fn test_notify_without_recipient_is_silent() {
        let recorder = Arc::new(Recorder::default());
        let notifier = notifier(recorder.clone());
        let original = IncomingMessage::from_raw(b"Subject: orphan\r\n\r\nbody\r\n".to_vec());
        let outcome = notifier
            .notify(&original, &cause(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, NotifyOutcome::NoRecipient);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_sends() {
        let recorder = Arc::new(Recorder::default());
        let notifier = notifier(recorder.clone());
        let original = IncomingMessage::from_raw(ORIGINAL.as_bytes().to_vec());
        let outcome = notifier
            .notify(&original, &cause(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            NotifyOutcome::Sent {
                recipients: vec!["alice@example.com".to_string()]
            }
        );
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_sender_is_config_error() {
        let err = ErrorNotifier::new("x", "not an address", Arc::new(Recorder::default()))
            .err()
            .expect("error");
        assert!(matches!(err, MailerError::Config(_)));
    }
}
