//! Writes a message and its attachments into the repository tree.
//!
//! Layout under a project's correspondence directory:
//!
//! ```text
//! {yyyy-MM-dd} - {subject}/
//!     {subject}.eml
//!     {attachment_dir_name}/
//!         {attachment filename}
//! ```

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::{info, warn};

use crate::error::{MailerError, Result};
use crate::model::message::IncomingMessage;
use crate::parser::mime;

use super::sanitize::{guarded_join, sanitize};

/// Where a message ended up.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FiledMessage {
    /// The per-message directory.
    pub directory: PathBuf,
    /// The `.eml` copy of the raw message.
    pub eml_path: PathBuf,
    /// Attachments that were written, in MIME order.
    pub attachment_paths: Vec<PathBuf>,
}

/// Files messages under a correspondence directory.
#[derive(Debug, Clone)]
pub struct MessageFiler {
    attachment_dir_name: String,
}

impl MessageFiler {
    pub fn new(attachment_dir_name: impl Into<String>) -> Self {
        Self {
            attachment_dir_name: attachment_dir_name.into(),
        }
    }

    /// Write `message` as `{subject}.eml` plus its attachments into a fresh
    /// (or reused) message directory under `correspondence_dir`.
    ///
    /// Failing to write the `.eml` or to create a directory is an error.
    /// Failing to write a single attachment is logged and skipped. Repeating
    /// the call for the same message overwrites the earlier files.
    pub fn file(
        &self,
        message: &IncomingMessage,
        subject: &str,
        correspondence_dir: &Path,
    ) -> Result<FiledMessage> {
        let date = message
            .date
            .unwrap_or_else(|| Local::now().date_naive());
        let directory = correspondence_dir.join(message_dir_name(date, subject));
        std::fs::create_dir_all(&directory).map_err(|e| MailerError::filing(&directory, e))?;
        info!(directory = %directory.display(), "Message directory ready");

        let eml_path = directory.join(eml_file_name(subject));
        std::fs::write(&eml_path, message.raw()).map_err(|e| MailerError::filing(&eml_path, e))?;
        info!(path = %eml_path.display(), "Message written");

        let attachment_paths = self.save_attachments(message, &directory)?;

        Ok(FiledMessage {
            directory,
            eml_path,
            attachment_paths,
        })
    }

    /// Decode every attachment into `{directory}/{attachment_dir_name}/`.
    fn save_attachments(&self, message: &IncomingMessage, directory: &Path) -> Result<Vec<PathBuf>> {
        let att_dir = directory.join(&self.attachment_dir_name);
        std::fs::create_dir_all(&att_dir).map_err(|e| MailerError::filing(&att_dir, e))?;

        let mut saved = Vec::new();
        for part in mime::attachment_parts(message.raw()) {
            let path = guarded_join(&att_dir, &part.filename);
            if part.encoding_problem {
                warn!(
                    filename = %part.filename,
                    "Attachment has a damaged transfer encoding; saving best-effort decode"
                );
            }
            match std::fs::write(&path, &part.contents) {
                Ok(()) => {
                    info!(
                        path = %path.display(),
                        content_type = %part.content_type,
                        size = %humansize::format_size(part.contents.len() as u64, humansize::BINARY),
                        "Saved attachment"
                    );
                    saved.push(path);
                }
                Err(e) => {
                    warn!(
                        filename = %part.filename,
                        path = %path.display(),
                        error = %e,
                        "Failed to save attachment"
                    );
                }
            }
        }
        Ok(saved)
    }
}

/// `{yyyy-MM-dd} - {sanitized subject}`.
pub fn message_dir_name(date: NaiveDate, subject: &str) -> String {
    format!("{} - {}", date.format("%Y-%m-%d"), sanitize(subject))
}

/// `{sanitized subject}.eml`.
pub fn eml_file_name(subject: &str) -> String {
    format!("{}.eml", sanitize(subject))
}
