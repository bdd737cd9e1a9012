//! SMTP delivery of error replies via `lettre`.
//!
//! Each send opens its own connection and closes it afterwards; nothing is
//! pooled between notifications.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Settings;
use crate::error::{MailerError, Result};

use super::mailbox::{cancellable, ReplyTransport};

/// Submission server connection parameters.
#[derive(Clone)]
pub struct SmtpReplyTransport {
    host: String,
    port: u16,
    tls: bool,
    credentials: Option<(String, String)>,
}

impl SmtpReplyTransport {
    pub fn from_settings(settings: &Settings) -> Self {
        let credentials = settings.smtp.authenticate.then(|| {
            let (user, pass) = settings.smtp_credentials();
            (user.to_string(), pass.to_string())
        });
        Self {
            host: settings.smtp_host().to_string(),
            port: settings.smtp.port,
            tls: settings.smtp.tls,
            credentials,
        }
    }

    /// Implicit TLS or opportunistic STARTTLS; certificates are not validated.
    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let params = TlsParameters::builder(self.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .map_err(|e| MailerError::connection("SMTP TLS setup failed", e))?;
        let tls = if self.tls {
            Tls::Wrapper(params)
        } else {
            Tls::Opportunistic(params)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .tls(tls);
        if let Some((user, pass)) = &self.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

impl std::fmt::Debug for SmtpReplyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpReplyTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("authenticate", &self.credentials.is_some())
            .finish()
    }
}

#[async_trait]
impl ReplyTransport for SmtpReplyTransport {
    async fn send(&self, message: Message, token: &CancellationToken) -> Result<()> {
        let mailer = self.build_transport()?;
        debug!(host = %self.host, port = self.port, "Sending via SMTP");
        cancellable(token, async {
            mailer.send(message).await.map(|_| ()).map_err(|e| {
                if e.is_permanent() || e.is_transient() {
                    MailerError::notification("SMTP server rejected the reply", e)
                } else {
                    MailerError::connection(
                        format!("SMTP delivery to {}:{} failed", self.host, self.port),
                        e,
                    )
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(authenticate: bool) -> Settings {
        let mut settings = Settings::default();
        settings.imap.host = "mail.example.com".into();
        settings.imap.username = "filer".into();
        settings.imap.password = "secret".into();
        settings.smtp.port = 587;
        settings.smtp.authenticate = authenticate;
        settings
    }

    #[test]
    fn test_credentials_only_when_authenticating() {
        assert!(SmtpReplyTransport::from_settings(&settings(false))
            .credentials
            .is_none());
        let transport = SmtpReplyTransport::from_settings(&settings(true));
        assert_eq!(
            transport.credentials,
            Some(("filer".to_string(), "secret".to_string()))
        );
        assert_eq!(transport.host, "mail.example.com");
    }

    #[test]
    fn test_debug_hides_password() {
        let transport = SmtpReplyTransport::from_settings(&settings(true));
        assert!(!format!("{transport:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_transport_builds() {
        let transport = SmtpReplyTransport::from_settings(&settings(true));
        assert!(transport.build_transport().is_ok());
    }
}
