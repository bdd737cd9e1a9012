//! Immutable view of one fetched mailbox entry.

use chrono::NaiveDate;
use mail_parser::{HeaderValue, MessageParser};

use super::address::EmailAddress;

/// One message as fetched from the mailbox.
///
/// Header fields are decoded once at construction; the raw bytes are kept
/// unmodified for the `.eml` copy, the attachment walk and the error reply.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Decoded subject (RFC 2047 encoded-words resolved). Empty if absent.
    pub subject: String,
    /// Calendar date of the `Date:` header, in the sender's own offset.
    pub date: Option<NaiveDate>,
    /// `From:` addresses.
    pub from: Vec<EmailAddress>,
    /// `Reply-To:` addresses.
    pub reply_to: Vec<EmailAddress>,
    /// `Sender:` address.
    pub sender: Option<EmailAddress>,
    /// `Message-ID` without angle brackets.
    pub message_id: Option<String>,
    /// Message-IDs from the `References` header, without angle brackets.
    pub references: Vec<String>,
    raw: Vec<u8>,
}

impl IncomingMessage {
    /// Decode the headers of a raw RFC 5322 message.
    ///
    /// Never fails: a message `mail-parser` cannot make sense of yields empty
    /// header fields so that it can still be reported and flagged.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let parsed = MessageParser::default().parse(&raw[..]);
        let Some(msg) = parsed else {
            tracing::warn!(size = raw.len(), "Could not parse message headers");
            return Self {
                subject: String::new(),
                date: None,
                from: Vec::new(),
                reply_to: Vec::new(),
                sender: None,
                message_id: None,
                references: Vec::new(),
                raw,
            };
        };

        let subject = msg.subject().unwrap_or("").to_string();
        let date = msg.date().and_then(|d| {
            NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
        });
        let from = EmailAddress::from_header(msg.from());
        let reply_to = EmailAddress::from_header(msg.reply_to());
        let sender = EmailAddress::from_header(msg.sender()).into_iter().next();
        let message_id = msg
            .message_id()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let references = header_ids(msg.references());

        drop(msg);
        Self {
            subject,
            date,
            from,
            reply_to,
            sender,
            message_id,
            references,
            raw,
        }
    }

    /// The full message as received: headers and body, unmodified.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Addresses an error reply should go to: `Reply-To`, else `From`, else `Sender`.
    pub fn reply_recipients(&self) -> Vec<EmailAddress> {
        if !self.reply_to.is_empty() {
            self.reply_to.clone()
        } else if !self.from.is_empty() {
            self.from.clone()
        } else {
            self.sender.iter().cloned().collect()
        }
    }
}

/// Collect message ids from a `References`-style header value.
fn header_ids(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Text(id) => vec![id.to_string()],
        HeaderValue::TextList(ids) => ids.iter().map(|id| id.to_string()).collect(),
        _ => Vec::new(),
    }
}
