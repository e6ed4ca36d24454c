// crates/core/src/validate.rs
//! Request validation and filesystem-safe title handling.

use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::error::ValidationError;

/// Longest title (in characters) used as a folder or file-name component.
pub const MAX_TITLE_LEN: usize = 200;

/// Characters illegal in a path component on at least one supported OS.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Separator that replaces whitespace runs in titles.
pub const TITLE_SEPARATOR: &str = "_";

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Turn a resolved media title into a filesystem-safe string.
pub fn sanitize_title(title: &str) -> String {
    sanitize_title_with_len(title, MAX_TITLE_LEN)
}

/// Leading and trailing dots are dropped so the result is never `.` or `..`
/// and never hidden; a title with nothing left becomes `untitled`.
pub fn sanitize_title_with_len(title: &str, max_len: usize) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect();
    let undotted = stripped.trim().trim_matches('.').trim();
    let collapsed = whitespace_run().replace_all(undotted, TITLE_SEPARATOR);
    let capped: String = collapsed.chars().take(max_len).collect();
    let capped = capped.trim_end_matches('.');
    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped.to_string()
    }
}

/// Check that `raw` is an http(s) URL whose host belongs to one of
/// `supported_platforms` (exact host or a subdomain of it).
pub fn validate_url(raw: &str, supported_platforms: &[String]) -> Result<url::Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    let parsed =
        url::Url::parse(trimmed).map_err(|_| ValidationError::MalformedUrl(trimmed.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::MalformedUrl(trimmed.to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::MalformedUrl(trimmed.to_string()))?
        .to_ascii_lowercase();
    let supported = supported_platforms.iter().any(|platform| {
        let platform = platform.to_ascii_lowercase();
        host == platform || host.ends_with(&format!(".{platform}"))
    });
    if supported {
        Ok(parsed)
    } else {
        Err(ValidationError::UnsupportedDomain(host))
    }
}

/// Result of validating a batch: accepted URLs keep their input order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchPartition {
    pub valid: Vec<String>,
    pub skipped: Vec<(String, ValidationError)>,
}

/// Split a batch into dispatchable and rejected URLs.
pub fn partition_urls<I, S>(urls: I, supported_platforms: &[String]) -> BatchPartition
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BatchPartition::default();
    for url in urls {
        let url = url.as_ref().trim();
        if url.is_empty() {
            continue;
        }
        match validate_url(url, supported_platforms) {
            Ok(_) => out.valid.push(url.to_string()),
            Err(e) => {
                tracing::warn!(url, error = %e, "Skipping invalid URL");
                out.skipped.push((url.to_string(), e));
            }
        }
    }
    out
}

/// Parse a batch file body: one URL per line, blank lines ignored.
pub fn parse_batch_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Title for a local file: its stem, sanitized.
pub fn local_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_title(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn platforms() -> Vec<String> {
        ["youtube.com", "youtu.be", "soundcloud.com", "m.soundcloud.com"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_sanitize_strips_illegal_characters() {
        let out = sanitize_title(r#"AC/DC: Back <In> "Black" | Live? *\ 1980"#);
        for c in ILLEGAL_CHARS {
            assert!(!out.contains(*c), "{c} survived in {out}");
        }
        assert!(!out.contains(' '));
        assert_eq!(out, "ACDC_Back_In_Black_Live_1980");
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        assert_eq!(sanitize_title("  a \t\t b\n c  "), "a_b_c");
    }

    #[test]
    fn test_sanitize_truncates_to_max_len() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_title(&long).chars().count(), MAX_TITLE_LEN);
        assert_eq!(sanitize_title_with_len("abcdef", 3), "abc");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let title = "é".repeat(300);
        let out = sanitize_title(&title);
        assert_eq!(out.chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn test_sanitize_empty_title() {
        assert_eq!(sanitize_title("???"), "untitled");
    }

    #[test]
    fn test_validate_supported_urls() {
        let p = platforms();
        assert!(validate_url("https://youtu.be/abc123", &p).is_ok());
        assert!(validate_url("https://www.youtube.com/watch?v=abc", &p).is_ok());
        assert!(validate_url("https://m.soundcloud.com/artist/track", &p).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsupported_and_malformed() {
        let p = platforms();
        assert_eq!(
            validate_url("https://notsupported.example.com/x", &p).unwrap_err(),
            ValidationError::UnsupportedDomain("notsupported.example.com".into())
        );
        assert!(matches!(
            validate_url("not a url", &p),
            Err(ValidationError::MalformedUrl(_))
        ));
        assert!(matches!(
            validate_url("ftp://youtube.com/x", &p),
            Err(ValidationError::MalformedUrl(_))
        ));
        assert_eq!(validate_url("  ", &p).unwrap_err(), ValidationError::MissingUrl);
        // Lookalike host must not pass a suffix check.
        assert!(validate_url("https://evilyoutube.com/x", &p).is_err());
    }

    #[test]
    fn test_partition_urls_keeps_only_valid() {
        let batch = [
            "https://youtu.be/a",
            "https://notsupported.example.com/x",
            "",
            "https://soundcloud.com/b",
            "garbage",
        ];
        let part = partition_urls(batch, &platforms());
        assert_eq!(part.valid, vec!["https://youtu.be/a", "https://soundcloud.com/b"]);
        assert_eq!(part.skipped.len(), 2);
    }

    #[test]
    fn test_parse_batch_file() {
        let urls = parse_batch_file("https://youtu.be/a\n\n  https://youtu.be/b  \n");
        assert_eq!(urls, vec!["https://youtu.be/a", "https://youtu.be/b"]);
    }

    #[test]
    fn test_sanitize_dot_only_titles() {
        for title in [".", "..", "...", " .. ", "./..", "\\.."] {
            assert_eq!(sanitize_title(title), "untitled", "input {title:?}");
        }
    }

    #[test]
    fn test_sanitize_trims_outer_dots() {
        assert_eq!(sanitize_title("..hidden"), "hidden");
        assert_eq!(sanitize_title("Live at Wembley..."), "Live_at_Wembley");
        assert_eq!(sanitize_title("Mr. Brightside"), "Mr._Brightside");
        assert_eq!(sanitize_title_with_len("abc.def", 4), "abc");
    }

    #[test]
    fn test_sanitized_title_stays_inside_parent() {
        let root = Path::new("/srv/output");
        for title in ["..", ".", "...", "../..", "..wav"] {
            let folder = root.join(sanitize_title(title));
            assert_eq!(folder.parent(), Some(root), "{title:?} escaped to {}", folder.display());
            assert!(!folder.ends_with(".") && !folder.ends_with(".."));
        }
    }

    #[test]
    fn test_local_title() {
        assert_eq!(local_title(Path::new("/music/My Song.mp3")), "My_Song");
        assert_eq!(local_title(Path::new("/music/..wav")), "untitled");
        assert_eq!(local_title(Path::new("/music/...wav")), "untitled");
    }
}
