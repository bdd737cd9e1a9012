//! Centralized error types for mailfiler.
//!
//! Display strings never repeat the text of their `source`, so walking the
//! chain with [`unwrap_messages`] yields each cause exactly once.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used for transport-level causes (IMAP, SMTP, TLS).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors produced by the mailfiler library.
#[derive(Error, Debug)]
pub enum MailerError {
    /// The subject does not match the configured pattern.
    #[error("Subject '{subject}' does not match subject pattern {pattern}")]
    SubjectMismatch { subject: String, pattern: String },

    /// The pattern matched but lacks one of the required named groups.
    #[error("Subject pattern {pattern} has no capture group named '{group}'")]
    MissingCaptureGroup { group: &'static str, pattern: String },

    /// The configured subject pattern is not a valid regular expression.
    #[error("Invalid subject pattern {pattern}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No folder under the repository root starts with the project number.
    #[error("Cannot find directory for project '{project_no}' in '{repo_dir}'")]
    ProjectNotFound { project_no: String, repo_dir: PathBuf },

    /// Filesystem failure while locating or creating the correspondence directory.
    #[error("Error while searching project directory for '{project_no}' in '{repo_dir}'")]
    DirectoryResolution {
        project_no: String,
        repo_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the message or creating its directories failed.
    #[error("Cannot write '{path}'")]
    Filing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Composing or sending the error reply failed.
    #[error("Cannot send error reply: {context}")]
    Notification {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Mailbox or submission server connection, authentication or command failure.
    #[error("{context}")]
    Connection {
        context: String,
        #[source]
        source: BoxError,
    },

    /// The mailbox server answered with something we cannot use.
    #[error("Unexpected mailbox response: {0}")]
    Protocol(String),

    /// A per-message step failed outside the error taxonomy, e.g. a panic in
    /// the filing task.
    #[error("Unexpected failure while processing message: {0}")]
    Unexpected(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification of a [`MailerError`], used for outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    DirectoryResolution,
    Filing,
    Notification,
    Connection,
    Config,
    Unexpected,
    Cancelled,
}

/// Convenience alias for `Result<T, MailerError>`.
pub type Result<T> = std::result::Result<T, MailerError>;

impl MailerError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SubjectMismatch { .. } | Self::MissingCaptureGroup { .. } => FailureKind::Parse,
            Self::ProjectNotFound { .. } | Self::DirectoryResolution { .. } => {
                FailureKind::DirectoryResolution
            }
            Self::Filing { .. } => FailureKind::Filing,
            Self::Notification { .. } => FailureKind::Notification,
            Self::Connection { .. } | Self::Protocol(_) => FailureKind::Connection,
            Self::InvalidPattern { .. } | Self::Config(_) => FailureKind::Config,
            Self::Unexpected(_) => FailureKind::Unexpected,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Create a `Filing` variant from a path and an `io::Error`.
    pub fn filing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filing {
            path: path.into(),
            source,
        }
    }

    /// Create a `Connection` variant wrapping a transport error.
    pub fn connection<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create a `Notification` variant wrapping a composition or delivery error.
    pub fn notification<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Notification {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// `true` if this error means the caller asked us to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Render an error and all of its nested causes, one per line, outermost first.
pub fn unwrap_messages(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = String::new();
    let mut current = Some(err);
    while let Some(e) = current {
        out.push_str(&e.to_string());
        out.push('\n');
        current = e.source();
    }
    out
}
