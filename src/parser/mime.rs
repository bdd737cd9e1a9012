//! MIME tree walking: finds the parts that are filed as attachments.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

/// A decoded attachment, ready to be written.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    /// Filename from `Content-Disposition` (or `Content-Type` `name=`), verbatim.
    pub filename: String,
    /// MIME content type (e.g. `"application/pdf"`).
    pub content_type: String,
    /// Decoded content.
    pub contents: Vec<u8>,
    /// The transfer encoding was damaged; `contents` is a best-effort decode.
    pub encoding_problem: bool,
}

/// List the attachments of a raw message.
///
/// A part qualifies when it is a direct child of a multipart container, its
/// disposition is `attachment` (inline parts are skipped) and it carries a
/// non-empty filename. Forwarded `message/rfc822` parts are not saved
/// themselves; their attachments are collected instead. Parts are returned
/// in MIME tree order.
pub fn attachment_parts(raw_message: &[u8]) -> Vec<AttachmentPart> {
    let Some(msg) = MessageParser::default().parse(raw_message) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    collect_attachments(&msg, &mut result);
    result
}

fn collect_attachments(msg: &Message<'_>, result: &mut Vec<AttachmentPart>) {
    for container in &msg.parts {
        let PartType::Multipart(children) = &container.body else {
            continue;
        };
        for &child_id in children {
            let Some(part) = msg.parts.get(child_id) else {
                continue;
            };
            match &part.body {
                PartType::Multipart(_) => continue,
                PartType::Message(embedded) => {
                    collect_attachments(embedded, result);
                    continue;
                }
                _ => {}
            }

            let is_attachment = part
                .content_disposition()
                .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
                .unwrap_or(false);
            if !is_attachment {
                continue;
            }

            let filename = part.attachment_name().unwrap_or("");
            if filename.is_empty() {
                tracing::debug!(part = child_id, "Skipping attachment without a filename");
                continue;
            }

            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());

            result.push(AttachmentPart {
                filename: filename.to_string(),
                content_type,
                contents: part.contents().to_vec(),
                encoding_problem: part.is_encoding_problem,
            });
        }
    }
}
