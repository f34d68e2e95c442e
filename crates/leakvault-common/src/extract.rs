//! Combolist line extraction
//!
//! A combolist line has the shape `scheme://authority[/path]:username:password`.
//! The password is the last capture and absorbs everything up to the end of
//! the line, so it may be empty or contain further colons.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9+.-]+://[^:/\s]+(?:/[^:\s]*)?):([^:]+):([^\n]*)")
        .expect("line pattern is a valid regex")
});

/// Credential triple extracted from one line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractedEntry {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Extract a credential triple from a raw line.
///
/// Leading and trailing whitespace is trimmed before matching. Lines that do
/// not match return `None`; callers count them as ignored.
///
/// # Examples
///
/// ```
/// use leakvault_common::extract::extract_entry;
///
/// let entry = extract_entry("ftp://host:bob:pa:ss:w0rd").unwrap();
/// assert_eq!(entry.url, "ftp://host");
/// assert_eq!(entry.username, "bob");
/// assert_eq!(entry.password, "pa:ss:w0rd");
/// ```
pub fn extract_entry(line: &str) -> Option<ExtractedEntry> {
    let captures = LINE_PATTERN.captures(line.trim())?;

    Some(ExtractedEntry {
        url: captures.get(1)?.as_str().to_string(),
        username: captures.get(2)?.as_str().to_string(),
        password: captures.get(3)?.as_str().to_string(),
    })
}
