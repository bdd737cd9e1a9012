//! Filename sanitizing for the repository tree.
//!
//! The repository is often a network share read from Windows, so the
//! Windows set of invalid characters is applied on every platform.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Runs of invalid characters, and trailing dots together with any invalid
/// characters right before them.
static INVALID_RUN: LazyLock<Regex> = LazyLock::new(|| {
    let invalid = r#"\x00-\x1F<>:"/\\|?*"#;
    Regex::new(&format!(r"([{invalid}]*\.+$)|([{invalid}]+)")).expect("static pattern")
});

/// Replace every run of invalid characters and any trailing dot sequence
/// with a single `_`.
///
/// `sanitize(sanitize(x)) == sanitize(x)` for every input.
pub fn sanitize(name: &str) -> String {
    INVALID_RUN.replace_all(name, "_").into_owned()
}

/// Join an attachment filename under `dir`.
///
/// The filename is used verbatim when it is a single plain path component;
/// anything that could leave `dir` (separators, `..`, roots, drive prefixes)
/// is sanitized first.
pub fn guarded_join(dir: &Path, filename: &str) -> PathBuf {
    let mut components = Path::new(filename).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single_normal && !filename.contains(['/', '\\', ':']) {
        dir.join(filename)
    } else {
        tracing::warn!(filename, "Attachment filename escapes its folder; sanitizing");
        dir.join(sanitize(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_runs() {
        assert_eq!(sanitize("a/b\\c:d*e"), "a_b_c_d_e");
        assert_eq!(sanitize("what??? now"), "what_ now");
        assert_eq!(sanitize("Budget review"), "Budget review");
    }

    #[test]
    fn test_sanitize_trailing_dots() {
        assert_eq!(sanitize("Minutes..."), "Minutes_");
        assert_eq!(sanitize("Why?."), "Why_");
        assert_eq!(sanitize("v1.2 final"), "v1.2 final");
    }

    #[test]
    fn test_sanitize_control_chars() {
        assert_eq!(sanitize("tab\there\r\n"), "tab_here_");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let samples = [
            "", ".", "...", "a.", "a_.", "?.", "x/y/z.", "<<>>", "ok", "Re: Fwd: [P-1] a|b...",
            "trailing ? . .", "ünïcödé: tëxt?",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "not idempotent for {s:?}");
            assert!(!once.ends_with('.'), "trailing dot left in {once:?}");
            assert!(
                !once.chars().any(|c| c.is_control() || "<>:\"/\\|?*".contains(c)),
                "invalid char left in {once:?}"
            );
        }
    }

    #[test]
    fn test_guarded_join_plain() {
        let dir = Path::new("/files");
        assert_eq!(guarded_join(dir, "report.pdf"), dir.join("report.pdf"));
        assert_eq!(guarded_join(dir, "Ünïcode name.docx"), dir.join("Ünïcode name.docx"));
    }

    #[test]
    fn test_guarded_join_traversal() {
        let dir = Path::new("/files");
        let joined = guarded_join(dir, "../../etc/passwd");
        assert_eq!(joined.parent(), Some(dir));
        assert_eq!(guarded_join(dir, ".."), dir.join("_"));
        assert_eq!(guarded_join(dir, "/abs.txt").parent(), Some(dir));
        assert_eq!(guarded_join(dir, "C:\\evil.txt").parent(), Some(dir));
    }
}
