//! IMAP mailbox access via `async-imap`.
//!
//! One connection per polling cycle: [`ImapConnector::connect`] opens
//! implicit TLS, or plain TCP upgraded with `STARTTLS` when the server offers
//! it, logs in, and hands back an [`ImapMailbox`] that speaks only the
//! handful of commands ingestion needs.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ImapSettings;
use crate::error::{MailerError, Result};

use super::mailbox::{cancellable, MailboxConnector, MailboxSession, MessageHandle};
use super::tls::accept_any_certificate_config;

/// Mailbox that is opened every cycle.
const INBOX: &str = "INBOX";

/// Tags of the commands sent before `async-imap` takes over the stream.
const CAPABILITY_TAG: &str = "p0";
const STARTTLS_TAG: &str = "p1";

/// Plain or TLS transport underneath the IMAP client.
#[derive(Debug)]
enum ImapStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// IMAP session with the tokio → futures compat wrapper.
type ImapSession = async_imap::Session<Compat<ImapStream>>;

/// Opens authenticated IMAP sessions.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    settings: ImapSettings,
}

impl ImapConnector {
    pub fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    /// TCP connect, then implicit TLS or a `STARTTLS` upgrade.
    ///
    /// On the plain port the greeting is consumed here, so the IMAP client
    /// starts right at `LOGIN`.
    async fn open_stream(&self) -> Result<ImapStream> {
        let addr = (self.settings.host.as_str(), self.settings.port);
        let tcp = TcpStream::connect(addr).await.map_err(|e| {
            MailerError::connection(
                format!(
                    "Cannot connect to IMAP server {}:{}",
                    self.settings.host, self.settings.port
                ),
                e,
            )
        })?;

        if self.settings.tls {
            self.tls_handshake(tcp).await
        } else {
            self.negotiate_plain(tcp).await
        }
    }

    async fn tls_handshake(&self, tcp: TcpStream) -> Result<ImapStream> {
        let connector = TlsConnector::from(Arc::new(accept_any_certificate_config()?));
        let server_name = rustls::pki_types::ServerName::try_from(self.settings.host.clone())
            .map_err(|e| MailerError::connection("Invalid IMAP server name", e))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| MailerError::connection("IMAP TLS handshake failed", e))?;
        Ok(ImapStream::Tls(Box::new(tls)))
    }

    /// Read the greeting and capabilities, then upgrade with `STARTTLS` when offered.
    async fn negotiate_plain(&self, tcp: TcpStream) -> Result<ImapStream> {
        let mut reader = BufReader::new(tcp);
        let greeting = read_line(&mut reader).await?;
        if !greeting.starts_with("* OK") {
            return Err(MailerError::Protocol(format!(
                "unexpected IMAP greeting: {}",
                greeting.trim_end()
            )));
        }

        let mut capabilities = parse_capabilities(&greeting);
        if capabilities.is_empty() {
            for line in pre_login_command(&mut reader, CAPABILITY_TAG, "CAPABILITY").await? {
                capabilities.extend(parse_capabilities(&line));
            }
        }

        match plain_upgrade(&capabilities) {
            PlainUpgrade::StartTls => {
                pre_login_command(&mut reader, STARTTLS_TAG, "STARTTLS").await?;
                debug!(host = %self.settings.host, "Upgrading IMAP connection with STARTTLS");
                self.tls_handshake(reader.into_inner()).await
            }
            PlainUpgrade::Plain => {
                warn!(
                    host = %self.settings.host,
                    "IMAP server does not offer STARTTLS; logging in over plain TCP"
                );
                Ok(ImapStream::Plain(reader.into_inner()))
            }
            PlainUpgrade::LoginDisabled => Err(MailerError::Protocol(
                "IMAP server disables LOGIN and offers no STARTTLS; set imap.tls".into(),
            )),
        }
    }
}

/// What to do on a plain connection, given the server's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlainUpgrade {
    StartTls,
    Plain,
    LoginDisabled,
}

fn plain_upgrade(capabilities: &[String]) -> PlainUpgrade {
    let has = |name: &str| capabilities.iter().any(|c| c.eq_ignore_ascii_case(name));
    if has("STARTTLS") {
        PlainUpgrade::StartTls
    } else if has("LOGINDISABLED") {
        PlainUpgrade::LoginDisabled
    } else {
        PlainUpgrade::Plain
    }
}

/// Capabilities from `* CAPABILITY ...` or a `[CAPABILITY ...]` response code.
fn parse_capabilities(line: &str) -> Vec<String> {
    let line = line.trim_end();
    let list = if let Some(rest) = line.strip_prefix("* CAPABILITY ") {
        rest
    } else if let Some(start) = line.find("[CAPABILITY ") {
        let rest = &line[start + "[CAPABILITY ".len()..];
        rest.split(']').next().unwrap_or("")
    } else {
        ""
    };
    list.split_whitespace().map(str::to_string).collect()
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| MailerError::connection("Reading from IMAP server failed", e))?;
    if n == 0 {
        return Err(MailerError::Protocol(
            "IMAP server closed the connection".into(),
        ));
    }
    Ok(line)
}

/// Send `tag command` and collect the untagged lines up to a tagged `OK`.
async fn pre_login_command(
    reader: &mut BufReader<TcpStream>,
    tag: &str,
    command: &str,
) -> Result<Vec<String>> {
    reader
        .get_mut()
        .write_all(format!("{tag} {command}\r\n").as_bytes())
        .await
        .map_err(|e| MailerError::connection(format!("Sending IMAP {command} failed"), e))?;

    let mut untagged = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let Some(status) = line.strip_prefix(tag).and_then(|r| r.strip_prefix(' ')) else {
            untagged.push(line);
            continue;
        };
        if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
            return Ok(untagged);
        }
        return Err(MailerError::Protocol(format!(
            "IMAP {command} rejected: {}",
            status.trim_end()
        )));
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, token: &CancellationToken) -> Result<Box<dyn MailboxSession>> {
        debug!(host = %self.settings.host, port = self.settings.port, tls = self.settings.tls, "Connecting to IMAP server");
        let stream = cancellable(token, self.open_stream()).await?;
        let client = async_imap::Client::new(stream.compat());

        let session = cancellable(token, async {
            client
                .login(&self.settings.username, &self.settings.password)
                .await
                .map_err(|(e, _client)| MailerError::connection("IMAP login failed", e))
        })
        .await?;

        info!(host = %self.settings.host, user = %self.settings.username, "IMAP session authenticated");
        Ok(Box::new(ImapMailbox { session }))
    }
}

/// An authenticated IMAP session.
pub struct ImapMailbox {
    session: ImapSession,
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn open_inbox(&mut self, token: &CancellationToken) -> Result<u32> {
        let mailbox = cancellable(token, async {
            self.session
                .select(INBOX)
                .await
                .map_err(|e| MailerError::connection("SELECT INBOX failed", e))
        })
        .await?;
        Ok(mailbox.exists)
    }

    async fn fetch(&mut self, handle: MessageHandle, token: &CancellationToken) -> Result<Vec<u8>> {
        let fetches: Vec<Fetch> = cancellable(token, async {
            let stream = self
                .session
                .fetch(handle.0.to_string(), "BODY.PEEK[]")
                .await
                .map_err(|e| MailerError::connection(format!("FETCH {handle} failed"), e))?;
            stream
                .try_collect()
                .await
                .map_err(|e| MailerError::connection(format!("FETCH {handle} stream failed"), e))
        })
        .await?;

        fetches
            .iter()
            .find_map(|f| f.body().map(<[u8]>::to_vec))
            .ok_or_else(|| MailerError::Protocol(format!("FETCH {handle} returned no body")))
    }

    async fn mark_deleted(
        &mut self,
        handle: MessageHandle,
        token: &CancellationToken,
    ) -> Result<()> {
        cancellable(token, async {
            let stream = self
                .session
                .store(handle.0.to_string(), "+FLAGS.SILENT (\\Deleted)")
                .await
                .map_err(|e| MailerError::connection(format!("STORE {handle} failed"), e))?;
            drain_stream(stream)
                .await
                .map_err(|e| MailerError::connection(format!("STORE {handle} stream failed"), e))
        })
        .await
    }

    async fn expunge(&mut self, token: &CancellationToken) -> Result<()> {
        cancellable(token, async {
            let stream = self
                .session
                .expunge()
                .await
                .map_err(|e| MailerError::connection("EXPUNGE failed", e))?;
            drain_stream(stream)
                .await
                .map_err(|e| MailerError::connection("EXPUNGE stream failed", e))
        })
        .await
    }

    async fn logout(&mut self, token: &CancellationToken) -> Result<()> {
        cancellable(token, async {
            self.session
                .logout()
                .await
                .map_err(|e| MailerError::connection("LOGOUT failed", e))
        })
        .await
    }
}

/// Consumes a response stream to completion.
async fn drain_stream<T, E>(
    stream: impl futures::Stream<Item = std::result::Result<T, E>>,
) -> std::result::Result<(), E> {
    use futures::StreamExt;
    futures::pin_mut!(stream);
    while let Some(result) = stream.next().await {
        result?;
    }
    Ok(())
}
