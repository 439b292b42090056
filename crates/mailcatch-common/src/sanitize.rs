//! Filename sanitizer for recipient folders
//!
//! Distinct addresses may collapse to the same segment once illegal
//! characters are stripped. Callers must not treat the result as unique.

/// Longest segment in bytes
const MAX_SEGMENT_BYTES: usize = 255;

/// Used when nothing survives sanitization
const EMPTY_REPLACEMENT: &str = "_";

const WINDOWS_RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com0", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
    "com8", "com9", "lpt0", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

fn is_illegal(c: char) -> bool {
    matches!(c, '/' | '?' | '<' | '>' | '\\' | ':' | '*' | '|' | '"')
        || c.is_control()
}

fn is_windows_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
    WINDOWS_RESERVED.contains(&stem.as_str())
}

/// Map an arbitrary string to a single safe path segment.
pub fn sanitize_filename(input: &str) -> String {
    let mut cleaned: String = input.chars().filter(|c| !is_illegal(*c)).collect();

    if cleaned.chars().all(|c| c == '.') || is_windows_reserved(&cleaned) {
        cleaned.clear();
    }

    let trimmed_len = cleaned.trim_end_matches(['.', ' ']).len();
    cleaned.truncate(trimmed_len);

    if cleaned.len() > MAX_SEGMENT_BYTES {
        let mut end = MAX_SEGMENT_BYTES;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }

    if cleaned.is_empty() {
        EMPTY_REPLACEMENT.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_address_is_unchanged() {
        assert_eq!(sanitize_filename("user@example.com"), "user@example.com");
        assert_eq!(sanitize_filename("First.Last+tag@Example.COM"), "First.Last+tag@Example.COM");
    }

    #[test]
    fn test_strips_path_and_control_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(sanitize_filename("tab\there\u{0}"), "tabhere");
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(sanitize_filename(".."), "_");
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename("CON"), "_");
        assert_eq!(sanitize_filename("lpt1.txt"), "_");
        assert_eq!(sanitize_filename("console"), "console");
        assert_eq!(sanitize_filename("name. . "), "name");
    }

    #[test]
    fn test_collisions_are_possible() {
        assert_eq!(sanitize_filename("a:b@example.com"), sanitize_filename("ab@example.com"));
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= MAX_SEGMENT_BYTES);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
