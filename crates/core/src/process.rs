//! Helpers shared by the subprocess-backed collaborators.

/// Longest stderr excerpt kept in error messages.
const STDERR_EXCERPT: usize = 500;

/// Last `STDERR_EXCERPT` characters of a tool's stderr, trimmed.
///
/// Tools print their real failure reason at the end, after progress noise.
pub fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_EXCERPT {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_EXCERPT).collect()
}
