//! Seams between the ingestion pipeline and the mail servers.
//!
//! The orchestrator only sees these traits; [`super::imap`] and
//! [`super::smtp`] provide the network implementations and tests provide
//! in-memory ones.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{MailerError, Result};

/// Position of a message in the snapshot taken when the inbox was opened.
///
/// Handles are IMAP sequence numbers (1-based). Flagging a message does not
/// renumber the mailbox; only an expunge does, and that ends the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageHandle(pub u32);

impl MessageHandle {
    /// Handles for a snapshot of `count` messages, in ascending order.
    pub fn snapshot(count: u32) -> impl Iterator<Item = MessageHandle> {
        (1..=count).map(MessageHandle)
    }
}

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opens authenticated mailbox sessions.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect and authenticate.
    async fn connect(&self, token: &CancellationToken) -> Result<Box<dyn MailboxSession>>;
}

/// One authenticated connection to the mailbox server.
#[async_trait]
pub trait MailboxSession: Send {
    /// Open the inbox read-write and return the number of messages in it.
    async fn open_inbox(&mut self, token: &CancellationToken) -> Result<u32>;

    /// Fetch the full raw message.
    async fn fetch(&mut self, handle: MessageHandle, token: &CancellationToken) -> Result<Vec<u8>>;

    /// Add the `\Deleted` flag without asking for the updated flags back.
    async fn mark_deleted(&mut self, handle: MessageHandle, token: &CancellationToken)
        -> Result<()>;

    /// Permanently remove flagged messages.
    async fn expunge(&mut self, token: &CancellationToken) -> Result<()>;

    /// Close the connection.
    async fn logout(&mut self, token: &CancellationToken) -> Result<()>;
}

/// Delivers composed replies.
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    /// Connect, send `message`, disconnect.
    async fn send(&self, message: lettre::Message, token: &CancellationToken) -> Result<()>;
}

/// Race `fut` against cancellation.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MailerError::Cancelled),
        res = fut => res,
    }
}
