//! Small helpers for logging, file naming and output directories.

use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Longest file stem produced by [`sanitize_filename`], in characters.
const MAX_STEM_CHARS: usize = 120;

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary near `max` bytes with an
/// ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Convert a title to a Markdown anchor slug.
///
/// Lowercases, drops punctuation and replaces spaces with hyphens.
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Turn a paper title into a safe file stem.
///
/// Path separators and characters rejected by common filesystems become
/// `_`, whitespace runs collapse to one `_`, and the result is capped at
/// [`MAX_STEM_CHARS`]. An empty result becomes `untitled`.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable
/// (permission denied, read-only filesystem, ...).
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe = path.join("..__probe_write__");
    fs::write(&probe, b"").await?;
    let _ = fs::remove_file(&probe).await;
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let result = truncate_for_log("héllo wörld", 2);
        assert_eq!(result, "h…(+12 bytes)");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("ICLR 2024"), "iclr-2024");
        assert_eq!(slugify_title("Test-Article!"), "test-article");
        assert_eq!(slugify_title("Special@#$Characters"), "specialcharacters");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("Attention Is All You Need"),
            "Attention_Is_All_You_Need"
        );
        assert_eq!(sanitize_filename("A/B: testing?"), "A_B__testing");
        assert_eq!(sanitize_filename("  ..  "), "untitled");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), MAX_STEM_CHARS);
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
