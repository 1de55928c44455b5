//! Slash-delimited path helpers.
//!
//! Paths handled by this crate are URL-style: `/` separated, with an
//! optional leading and trailing separator. The empty string and `/` both
//! name the root.

/// Path separator.
pub const SEPARATOR: char = '/';

/// Split a path into its segments.
///
/// Leading and trailing separators are trimmed. The root path yields an
/// empty vector.
pub fn split(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split(SEPARATOR).collect()
}

/// Returns true for the empty path and for `/`.
pub fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

/// Rejoin segments into an absolute path.
///
/// An empty slice yields `/`.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from("/");
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// Canonical form of a path: absolute, no trailing separator.
pub fn normalize(path: &str) -> String {
    join(&split(path))
}

/// Last segment of a path, or `""` for the root.
pub fn base_name(path: &str) -> &str {
    path.trim_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or("")
}
