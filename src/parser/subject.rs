//! Subject-line routing: extracts the project number and display subject.

use regex::Regex;

use crate::error::{MailerError, Result};

/// Named group holding the routing key.
pub const PROJECT_NO_GROUP: &str = "ProjectNo";
/// Named group holding the display subject.
pub const SUBJECT_GROUP: &str = "Subject";

/// Captures of a matched subject, used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSubject {
    pub project_no: String,
    pub subject: String,
}

/// Applies the configured subject pattern.
#[derive(Debug, Clone)]
pub struct SubjectParser {
    regex: Regex,
}

impl SubjectParser {
    /// Compile `pattern`.
    ///
    /// Only the syntax is checked here. Missing named groups surface on the
    /// first parse, as a per-message error.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| MailerError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// The pattern as configured.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Match `subject` and return the `ProjectNo` and `Subject` captures.
    ///
    /// Captures are neither trimmed nor case-normalized.
    pub fn parse(&self, subject: &str) -> Result<ParsedSubject> {
        let caps = self
            .regex
            .captures(subject)
            .ok_or_else(|| MailerError::SubjectMismatch {
                subject: subject.to_string(),
                pattern: self.pattern().to_string(),
            })?;

        let group = |name: &'static str| -> Result<String> {
            if !self.regex.capture_names().flatten().any(|n| n == name) {
                return Err(MailerError::MissingCaptureGroup {
                    group: name,
                    pattern: self.pattern().to_string(),
                });
            }
            // A group that exists but did not participate captures nothing.
            Ok(caps
                .name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default())
        };

        Ok(ParsedSubject {
            project_no: group(PROJECT_NO_GROUP)?,
            subject: group(SUBJECT_GROUP)?,
        })
    }
}
