//! In-memory mail collaborators shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mailfiler::config::Settings;
use mailfiler::error::{MailerError, Result};
use mailfiler::mail::mailbox::{MailboxConnector, MailboxSession, MessageHandle, ReplyTransport};

pub const SUBJECT_PATTERN: &str = r"^\[(?<ProjectNo>[^\]]+)\]\s*(?<Subject>.*)$";

pub fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

pub fn settings(repo_dir: &Path) -> Settings {
    let mut settings = Settings {
        repo_dir: repo_dir.to_path_buf(),
        subject_pattern: SUBJECT_PATTERN.to_string(),
        ..Default::default()
    };
    settings.imap.host = "imap.example.com".into();
    settings.smtp.sender_address = "filer@example.com".into();
    settings
}

#[derive(Debug, Default)]
pub struct MailboxState {
    pub messages: Vec<Vec<u8>>,
    /// Every `mark_deleted` call, in order.
    pub flagged: Vec<u32>,
    pub expunge_calls: u32,
    pub logout_calls: u32,
    pub fail_fetch_at: Option<u32>,
}

/// Mailbox that lives in a `Vec`; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    pub state: Arc<Mutex<MailboxState>>,
}

impl InMemoryMailbox {
    pub fn with_messages(messages: Vec<Vec<u8>>) -> Self {
        let mailbox = Self::default();
        mailbox.state.lock().unwrap().messages = messages;
        mailbox
    }

    pub fn flagged(&self) -> Vec<u32> {
        self.state.lock().unwrap().flagged.clone()
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }
}

#[async_trait]
impl MailboxConnector for InMemoryMailbox {
    async fn connect(&self, _token: &CancellationToken) -> Result<Box<dyn MailboxSession>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl MailboxSession for InMemoryMailbox {
    async fn open_inbox(&mut self, _token: &CancellationToken) -> Result<u32> {
        Ok(self.state.lock().unwrap().messages.len() as u32)
    }

    async fn fetch(&mut self, handle: MessageHandle, _token: &CancellationToken) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.fail_fetch_at == Some(handle.0) {
            return Err(MailerError::Protocol(format!("no such message {handle}")));
        }
        state
            .messages
            .get(handle.0 as usize - 1)
            .cloned()
            .ok_or_else(|| MailerError::Protocol(format!("no such message {handle}")))
    }

    async fn mark_deleted(
        &mut self,
        handle: MessageHandle,
        _token: &CancellationToken,
    ) -> Result<()> {
        self.state.lock().unwrap().flagged.push(handle.0);
        Ok(())
    }

    async fn expunge(&mut self, _token: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.expunge_calls += 1;
        let flagged = state.flagged.clone();
        let kept: Vec<Vec<u8>> = state
            .messages
            .drain(..)
            .enumerate()
            .filter(|(i, _)| !flagged.contains(&(*i as u32 + 1)))
            .map(|(_, m)| m)
            .collect();
        state.messages = kept;
        state.flagged.clear();
        Ok(())
    }

    async fn logout(&mut self, _token: &CancellationToken) -> Result<()> {
        self.state.lock().unwrap().logout_calls += 1;
        Ok(())
    }
}

/// Keeps every reply; optionally fails every send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ReplyTransport for RecordingTransport {
    async fn send(&self, message: lettre::Message, _token: &CancellationToken) -> Result<()> {
        if self.fail {
            return Err(MailerError::notification(
                "SMTP submission failed",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }
        let to = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        self.sent.lock().unwrap().push((to, message.formatted()));
        Ok(())
    }
}

/// Cancels the cycle's token from inside `send`, as Ctrl-C during a reply would.
#[derive(Debug, Default)]
pub struct CancellingTransport;

#[async_trait]
impl ReplyTransport for CancellingTransport {
    async fn send(&self, _message: lettre::Message, token: &CancellationToken) -> Result<()> {
        token.cancel();
        mailfiler::mail::mailbox::cancellable(token, std::future::pending()).await
    }
}
