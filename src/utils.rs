//! src/utils.rs
//! Shared utility functions used across the codebase

use std::path::Path;

/// Truncate a string to max length with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Lossy path-to-string conversion for display and storage.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Current time as an RFC3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Short random suffix for generated names (containers, clusters, temp files).
pub fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        // Must not panic splitting a multi-byte char
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn test_short_id_length() {
        assert_eq!(short_id().len(), 8);
    }
}
