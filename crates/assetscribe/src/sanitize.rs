//! Helpers for sanitizing data before it enters log lines or the filesystem.
//!
//! Asset URLs are frequently pre-signed, and asset file names come from end
//! users, so neither is used verbatim.

use std::path::Path;

/// Maximum length kept from remote error bodies.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo and the query string from a URL.
///
/// - `https://blob.example.com/a.mp3?token=abc` → `https://blob.example.com/a.mp3`
/// - `https://user:pw@host/a.mp3` → `https://****@host/a.mp3`
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}

/// Reduces a user-supplied file name to a single safe path component.
///
/// Directory parts are dropped, and anything outside `[A-Za-z0-9._-]` becomes
/// `_`. Empty or dots-only names fall back to `fallback`.
pub fn safe_file_name(name: &str, fallback: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// File name without its extension, for use as a chunk base name.
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("asset")
        .to_string()
}

/// Truncates a remote error body so it cannot flood logs or job records.
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/tmp/assetscribe/job-1/talk.mp3")),
            "talk.mp3"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_url_strips_query() {
        assert_eq!(
            redact_url("https://blob.example.com/p/talk.mp3?token=secret&x=1"),
            "https://blob.example.com/p/talk.mp3"
        );
    }

    #[test]
    fn test_redact_url_masks_userinfo() {
        assert_eq!(
            redact_url("https://user:pw@host.example/a.mp4"),
            "https://****@host.example/a.mp4"
        );
    }

    #[test]
    fn test_redact_url_plain() {
        assert_eq!(redact_url("file:///data/a.wav"), "file:///data/a.wav");
    }

    #[test]
    fn test_safe_file_name_drops_directories() {
        assert_eq!(safe_file_name("../../etc/passwd", "input"), "passwd");
        assert_eq!(safe_file_name("C:\\Users\\me\\clip.mov", "input"), "clip.mov");
    }

    #[test]
    fn test_safe_file_name_replaces_odd_characters() {
        assert_eq!(safe_file_name("my talk (final).m4a", "input"), "my_talk__final_.m4a");
    }

    #[test]
    fn test_safe_file_name_fallback() {
        assert_eq!(safe_file_name("..", "input"), "input");
        assert_eq!(safe_file_name("", "input"), "input");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("lecture.week1.mp3"), "lecture.week1");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(""), "asset");
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("  short \n"), "short");
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncated.chars().count(), 200 + "... (truncated)".len());
    }
}
