//! Locates the correspondence directory of a project inside the repository.

use std::cmp::Ordering;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{MailerError, Result};

/// Placeholder substituted in the correspondence directory pattern.
pub const PROJECT_NO_PLACEHOLDER: &str = "{ProjectNo}";

/// Maps a project number to its correspondence directory.
#[derive(Debug, Clone)]
pub struct ProjectResolver {
    repo_dir: PathBuf,
    correspondence_pattern: String,
}

impl ProjectResolver {
    pub fn new(repo_dir: impl Into<PathBuf>, correspondence_pattern: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            correspondence_pattern: correspondence_pattern.into(),
        }
    }

    /// Find the project folder whose name starts with `project_no` and return
    /// its correspondence directory, creating it when `ensure_exists` is set.
    ///
    /// When several folders share the prefix, a folder whose name is exactly
    /// `project_no` or continues with a non-alphanumeric character wins
    /// (`PRJ-4 - Foo` over `PRJ-42 - Bar` for `PRJ-4`), then the shortest
    /// name, then the lexicographically smallest one.
    pub fn resolve(&self, project_no: &str, ensure_exists: bool) -> Result<PathBuf> {
        let wrap = |source: std::io::Error| MailerError::DirectoryResolution {
            project_no: project_no.to_string(),
            repo_dir: self.repo_dir.clone(),
            source,
        };

        // An empty key would match every folder.
        if project_no.is_empty() {
            return Err(MailerError::ProjectNotFound {
                project_no: String::new(),
                repo_dir: self.repo_dir.clone(),
            });
        }

        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.repo_dir).map_err(wrap)? {
            let entry = entry.map_err(wrap)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(project_no) {
                continue;
            }
            let path = entry.path();
            // Follows symlinks, like a directory listing would.
            if path.is_dir() {
                candidates.push((name, path));
            }
        }

        candidates.sort_by(|(a, _), (b, _)| compare_candidates(project_no, a, b));
        if candidates.len() > 1 {
            debug!(
                project_no,
                count = candidates.len(),
                chosen = %candidates[0].0,
                "Several project folders share the prefix"
            );
        }
        let Some((_, project_dir)) = candidates.into_iter().next() else {
            return Err(MailerError::ProjectNotFound {
                project_no: project_no.to_string(),
                repo_dir: self.repo_dir.clone(),
            });
        };

        let correspondence = project_dir.join(self.correspondence_dir_name(project_no));
        if ensure_exists {
            std::fs::create_dir_all(&correspondence).map_err(wrap)?;
        }
        Ok(correspondence)
    }

    /// Substitute `{ProjectNo}` in the configured pattern.
    pub fn correspondence_dir_name(&self, project_no: &str) -> String {
        self.correspondence_pattern
            .replace(PROJECT_NO_PLACEHOLDER, project_no)
    }
}

/// `true` if `name` is `project_no` itself or continues with a separator.
fn is_segment_match(project_no: &str, name: &str) -> bool {
    name[project_no.len()..]
        .chars()
        .next()
        .is_none_or(|c| !c.is_alphanumeric())
}

fn compare_candidates(project_no: &str, a: &str, b: &str) -> Ordering {
    let seg_a = is_segment_match(project_no, a);
    let seg_b = is_segment_match(project_no, b);
    seg_b
        .cmp(&seg_a)
        .then_with(|| a.len().cmp(&b.len()))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_match() {
        assert!(is_segment_match("PRJ-4", "PRJ-4"));
        assert!(is_segment_match("PRJ-4", "PRJ-4 - Foo"));
        assert!(is_segment_match("PRJ-4", "PRJ-4_Foo"));
        assert!(!is_segment_match("PRJ-4", "PRJ-42 - Bar"));
    }

    #[test]
    fn test_compare_prefers_segment_then_shorter() {
        let mut names = vec!["PRJ-42 - Bar", "PRJ-4 - Longer name", "PRJ-4 - A"];
        names.sort_by(|a, b| compare_candidates("PRJ-4", a, b));
        assert_eq!(names, vec!["PRJ-4 - A", "PRJ-4 - Longer name", "PRJ-42 - Bar"]);
    }

    #[test]
    fn test_correspondence_dir_name() {
        let resolver = ProjectResolver::new("/repo", "Korespondencja {ProjectNo}");
        assert_eq!(
            resolver.correspondence_dir_name("PRJ-1"),
            "Korespondencja PRJ-1"
        );
    }
}
