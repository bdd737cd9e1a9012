//! One polling cycle: file every message in the inbox, reply to senders of
//! the ones that fail, flag everything deleted and expunge.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Settings;
use crate::error::{unwrap_messages, FailureKind, MailerError, Result};
use crate::filing::filer::{FiledMessage, MessageFiler};
use crate::filing::resolver::ProjectResolver;
use crate::mail::mailbox::{MailboxConnector, MailboxSession, MessageHandle, ReplyTransport};
use crate::model::message::IncomingMessage;
use crate::notify::{ErrorNotifier, NotifyOutcome};
use crate::parser::subject::{ParsedSubject, SubjectParser};

/// Subject parsing, project lookup and filing, without any mail traffic.
#[derive(Debug, Clone)]
pub struct Pipeline {
    parser: SubjectParser,
    resolver: ProjectResolver,
    filer: MessageFiler,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            parser: SubjectParser::new(&settings.subject_pattern)?,
            resolver: ProjectResolver::new(
                &settings.repo_dir,
                settings.correspondence_dir_pattern.clone(),
            ),
            filer: MessageFiler::new(settings.attachment_dir_name.clone()),
        })
    }

    /// Parse `subject` and find its correspondence directory.
    pub fn locate(&self, subject: &str, ensure_exists: bool) -> Result<(ParsedSubject, PathBuf)> {
        let parsed = self.parser.parse(subject)?;
        let dir = self.resolver.resolve(&parsed.project_no, ensure_exists)?;
        Ok((parsed, dir))
    }

    /// Parse → resolve → file.
    pub fn process(&self, message: &IncomingMessage) -> Result<FiledMessage> {
        let (parsed, dir) = self.locate(&message.subject, true)?;
        info!(
            project_no = %parsed.project_no,
            directory = %dir.display(),
            "Found correspondence directory"
        );
        self.filer.file(message, &parsed.subject, &dir)
    }
}

/// What happened to the error reply of a rejected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Sent,
    NoRecipient,
    Failed,
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Filed(FiledMessage),
    Rejected {
        kind: FailureKind,
        /// Outermost error message.
        reason: String,
        reply: ReplyStatus,
    },
}

/// One line of the cycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    /// Sequence number in the inbox snapshot.
    pub handle: u32,
    pub subject: String,
    #[serde(flatten)]
    pub outcome: MessageOutcome,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Messages in the inbox when it was opened.
    pub total: u32,
    /// Filed successfully.
    pub filed: u32,
    /// Rejected; the sender got an error reply.
    pub rejected_notified: u32,
    /// Rejected; no reply address was available.
    pub rejected_no_recipient: u32,
    /// Rejected; sending the error reply failed, so the sender was not informed.
    pub rejected_notify_failed: u32,
    /// Flagged messages were expunged.
    pub expunged: bool,
    /// Per-message outcomes, in processing order.
    pub messages: Vec<MessageRecord>,
}

impl CycleReport {
    fn record(&mut self, handle: MessageHandle, subject: &str, outcome: MessageOutcome) {
        match &outcome {
            MessageOutcome::Filed(_) => self.filed += 1,
            MessageOutcome::Rejected { reply, .. } => match reply {
                ReplyStatus::Sent => self.rejected_notified += 1,
                ReplyStatus::NoRecipient => self.rejected_no_recipient += 1,
                ReplyStatus::Failed => self.rejected_notify_failed += 1,
            },
        }
        self.messages.push(MessageRecord {
            handle: handle.0,
            subject: subject.to_string(),
            outcome,
        });
    }

    /// All rejected messages, whatever happened to the reply.
    pub fn rejected(&self) -> u32 {
        self.rejected_notified + self.rejected_no_recipient + self.rejected_notify_failed
    }
}

/// Runs polling cycles against one mailbox.
pub struct Ingestor {
    pipeline: Arc<Pipeline>,
    notifier: ErrorNotifier,
    connector: Arc<dyn MailboxConnector>,
    development: bool,
    cycles: AtomicU64,
}

impl Ingestor {
    pub fn new(
        settings: &Settings,
        connector: Arc<dyn MailboxConnector>,
        transport: Arc<dyn ReplyTransport>,
    ) -> Result<Self> {
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(settings)?),
            notifier: ErrorNotifier::new(
                &settings.smtp.sender_name,
                &settings.smtp.sender_address,
                transport,
            )?,
            connector,
            development: settings.is_development(),
            cycles: AtomicU64::new(0),
        })
    }

    /// Connect, process every message in the inbox, expunge unless in
    /// development mode, and log out.
    ///
    /// Logout runs whenever a session was opened, even if a later step
    /// failed; the first error wins. Per-message failures never end the
    /// cycle, mailbox failures do.
    pub async fn run_cycle(&self, token: &CancellationToken) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        async {
            let mut session = self.connector.connect(token).await?;
            let mut report = CycleReport::default();

            let result = self.process_inbox(session.as_mut(), &mut report, token).await;
            let logout = session.logout(token).await;

            match (result, logout) {
                (Ok(()), Ok(())) => Ok(report),
                (Ok(()), Err(e)) => Err(e),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(logout_err)) => {
                    warn!(error = %logout_err, "Logout after failed cycle also failed");
                    Err(e)
                }
            }
        }
        .instrument(info_span!("cycle", n = cycle))
        .await
    }

    async fn process_inbox(
        &self,
        session: &mut dyn MailboxSession,
        report: &mut CycleReport,
        token: &CancellationToken,
    ) -> Result<()> {
        let count = session.open_inbox(token).await?;
        info!(count, "Total messages in inbox");
        report.total = count;

        for handle in MessageHandle::snapshot(count) {
            let raw = session.fetch(handle, token).await?;
            let message = Arc::new(IncomingMessage::from_raw(raw));
            let outcome = self.handle_message(handle, &message, token).await?;
            session.mark_deleted(handle, token).await?;
            report.record(handle, &message.subject, outcome);
        }

        if self.development {
            info!("Development environment; flagged messages are left in the inbox");
        } else {
            session.expunge(token).await?;
            report.expunged = true;
        }
        Ok(())
    }

    /// Run the pipeline for one message and route a failure to the notifier.
    ///
    /// Only cancellation is returned as an error.
    async fn handle_message(
        &self,
        handle: MessageHandle,
        message: &Arc<IncomingMessage>,
        token: &CancellationToken,
    ) -> Result<MessageOutcome> {
        let err = match self.file_blocking(message).await {
            Ok(filed) => {
                info!(
                    %handle,
                    eml = %filed.eml_path.display(),
                    attachments = filed.attachment_paths.len(),
                    "Message filed"
                );
                return Ok(MessageOutcome::Filed(filed));
            }
            Err(err) => err,
        };

        error!(
            %handle,
            subject = %message.subject,
            kind = ?err.kind(),
            "Cannot process message; replying to sender and marking for deletion"
        );
        error!("Unwrapped error:\n{}", unwrap_messages(&err));

        let reply = match self.notifier.notify(message, &err, token).await {
            Ok(NotifyOutcome::Sent { .. }) => ReplyStatus::Sent,
            Ok(NotifyOutcome::NoRecipient) => ReplyStatus::NoRecipient,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(
                    %handle,
                    subject = %message.subject,
                    "Error reply failed; message is deleted and the sender is not informed:\n{}",
                    unwrap_messages(&e)
                );
                ReplyStatus::Failed
            }
        };

        Ok(MessageOutcome::Rejected {
            kind: err.kind(),
            reason: err.to_string(),
            reply,
        })
    }

    /// Run the filesystem-bound pipeline off the async workers.
    async fn file_blocking(&self, message: &Arc<IncomingMessage>) -> Result<FiledMessage> {
        let pipeline = Arc::clone(&self.pipeline);
        let message = Arc::clone(message);
        tokio::task::spawn_blocking(move || pipeline.process(&message))
            .await
            .map_err(|e| MailerError::Unexpected(e.to_string()))?
    }
}
