//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line argument
//! 2. `$MAILFILER_CONFIG` (environment variable)
//! 3. `~/.config/mailfiler/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailfiler\config.toml` (Windows)
//!
//! If a file named `config.<environment>.toml` sits next to the base file,
//! its tables are merged over the base values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MailerError, Result};

/// Environment name that keeps flagged messages in the mailbox.
pub const DEVELOPMENT: &str = "development";

/// Top-level configuration, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Repository root whose immediate children are project folders.
    pub repo_dir: PathBuf,
    /// Regular expression with `ProjectNo` and `Subject` named groups.
    pub subject_pattern: String,
    /// Seconds to wait between polling cycles.
    pub check_interval_secs: u64,
    /// Correspondence folder name inside a project folder; `{ProjectNo}` is substituted.
    pub correspondence_dir_pattern: String,
    /// Name of the attachment folder inside each message folder.
    pub attachment_dir_name: String,
    /// Deployment environment; `"development"` skips the expunge step.
    pub environment: String,
    /// Mailbox access.
    pub imap: ImapSettings,
    /// Error-reply submission.
    pub smtp: SmtpSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// IMAP server settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapSettings {
    pub host: String,
    /// Typically 993 with `tls = true`, 143 without.
    pub port: u16,
    /// Implicit TLS when true; otherwise plain TCP, upgraded with `STARTTLS`
    /// when the server offers it.
    pub tls: bool,
    pub username: String,
    pub password: String,
}

/// SMTP server settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Falls back to the IMAP host when empty.
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, opportunistic STARTTLS otherwise.
    pub tls: bool,
    /// Send `AUTH` before submitting.
    pub authenticate: bool,
    /// Falls back to the IMAP username when empty.
    pub username: String,
    /// Falls back to the IMAP password when empty.
    pub password: String,
    /// `From` address of error replies.
    pub sender_address: String,
    /// Display name of error replies.
    pub sender_name: String,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,
    /// Directory for `mailfiler.log`. Defaults to the platform cache dir.
    pub directory: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::new(),
            subject_pattern: String::new(),
            check_interval_secs: 10,
            correspondence_dir_pattern: "{ProjectNo} - Correspondence".to_string(),
            attachment_dir_name: "Attachments".to_string(),
            environment: "production".to_string(),
            imap: ImapSettings::default(),
            smtp: SmtpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 143,
            tls: false,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 25,
            tls: false,
            authenticate: false,
            username: String::new(),
            password: String::new(),
            sender_address: String::new(),
            sender_name: "mailfiler - noReply".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

// Passwords never reach the log.
impl std::fmt::Debug for ImapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("authenticate", &self.authenticate)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("sender_address", &self.sender_address)
            .field("sender_name", &self.sender_name)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}

impl Settings {
    /// `true` when flagged messages must stay in the mailbox after a cycle.
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEVELOPMENT)
    }

    /// SMTP host, defaulting to the IMAP host.
    pub fn smtp_host(&self) -> &str {
        if self.smtp.host.is_empty() {
            &self.imap.host
        } else {
            &self.smtp.host
        }
    }

    /// SMTP credentials, defaulting to the IMAP ones.
    pub fn smtp_credentials(&self) -> (&str, &str) {
        let user = if self.smtp.username.is_empty() {
            &self.imap.username
        } else {
            &self.smtp.username
        };
        let pass = if self.smtp.password.is_empty() {
            &self.imap.password
        } else {
            &self.smtp.password
        };
        (user, pass)
    }

    /// Check that every value needed to run a cycle is present.
    pub fn validate(&self) -> Result<()> {
        self.validate_filing()?;
        if self.check_interval_secs == 0 {
            return Err(MailerError::Config(
                "check_interval_secs must be greater than zero".into(),
            ));
        }
        if self.imap.host.is_empty() {
            return Err(MailerError::Config("imap.host is not set".into()));
        }
        if self.imap.port == 0 || self.smtp.port == 0 {
            return Err(MailerError::Config("imap.port and smtp.port must be set".into()));
        }
        if self.smtp.sender_address.is_empty() {
            return Err(MailerError::Config("smtp.sender_address is not set".into()));
        }
        Ok(())
    }

    /// Check only the values subject parsing and directory resolution need.
    ///
    /// The subject pattern is only checked for presence here; its named
    /// groups are verified when a subject is parsed.
    pub fn validate_filing(&self) -> Result<()> {
        if self.repo_dir.as_os_str().is_empty() {
            return Err(MailerError::Config("repo_dir is not set".into()));
        }
        if self.subject_pattern.is_empty() {
            return Err(MailerError::Config("subject_pattern is not set".into()));
        }
        if !self.correspondence_dir_pattern.contains("{ProjectNo}") {
            tracing::warn!(
                pattern = %self.correspondence_dir_pattern,
                "correspondence_dir_pattern has no {{ProjectNo}} placeholder"
            );
        }
        if self.attachment_dir_name.is_empty() {
            return Err(MailerError::Config("attachment_dir_name is not set".into()));
        }
        Ok(())
    }

    /// Write the effective settings to the log, passwords redacted.
    pub fn log_summary(&self) {
        tracing::info!(
            repo_dir = %self.repo_dir.display(),
            subject_pattern = %self.subject_pattern,
            check_interval_secs = self.check_interval_secs,
            correspondence_dir_pattern = %self.correspondence_dir_pattern,
            attachment_dir_name = %self.attachment_dir_name,
            environment = %self.environment,
            "Settings"
        );
        tracing::info!(imap = ?self.imap, smtp = ?self.smtp, "Mail servers");
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load settings from `path` (or the standard location) and apply the
/// environment overlay.
///
/// `environment` overrides the value found in the file.
pub fn load_settings(path: Option<&Path>, environment: Option<&str>) -> anyhow::Result<Settings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?,
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read config file '{}': {e}", path.display()))?;
    let mut table: toml::Table = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Cannot parse config file '{}': {e}", path.display()))?;

    let env_name = environment
        .map(str::to_string)
        .or_else(|| {
            table
                .get("environment")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Settings::default().environment);

    let overlay_path = overlay_file_path(&path, &env_name);
    if overlay_path.exists() {
        let overlay_contents = std::fs::read_to_string(&overlay_path)?;
        let overlay: toml::Table = toml::from_str(&overlay_contents).map_err(|e| {
            anyhow::anyhow!("Cannot parse config file '{}': {e}", overlay_path.display())
        })?;
        merge_tables(&mut table, overlay);
        tracing::info!(path = %overlay_path.display(), "Applied environment overlay");
    }

    let mut settings: Settings = toml::Value::Table(table).try_into()?;
    settings.environment = env_name;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(settings)
}

/// Merge `overlay` into `base`, recursing into tables; other values are replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_sub)), toml::Value::Table(over_sub)) => {
                merge_tables(base_sub, over_sub);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// `config.toml` → `config.<environment>.toml` in the same directory.
pub fn overlay_file_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config");
    let ext = base.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    base.with_file_name(format!("{stem}.{environment}.{ext}"))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MAILFILER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mailfiler").join("config.toml"))
}

/// Return the directory for the log file.
pub fn log_dir(settings: &Settings) -> PathBuf {
    if let Some(ref dir) = settings.logging.directory {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailfiler")
}
