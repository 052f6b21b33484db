//! Compiled find/filter pattern backed by ripgrep's regex matcher.

use crate::error::{LogtailError, Result};
use crate::search::SearchOptions;
use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use std::fmt;

/// A validated pattern that tests raw line bytes
#[derive(Clone)]
pub struct LineMatcher {
    pattern: String,
    options: SearchOptions,
    matcher: RegexMatcher,
}

impl fmt::Debug for LineMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineMatcher")
            .field("pattern", &self.pattern)
            .field("options", &self.options)
            .finish()
    }
}

impl LineMatcher {
    /// Compile `pattern`; a literal unless `options.regex` is set.
    pub fn new(pattern: &str, options: SearchOptions) -> Result<Self> {
        if pattern.is_empty() {
            return Err(LogtailError::invalid_pattern(pattern, "Pattern is empty"));
        }
        let matcher = RegexMatcherBuilder::new()
            .case_insensitive(!options.case_sensitive)
            .fixed_strings(!options.regex)
            .build(pattern)
            .map_err(|e| LogtailError::invalid_pattern(pattern, e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            options,
            matcher,
        })
    }

    pub fn is_match(&self, line: &[u8]) -> bool {
        self.matcher.is_match(line).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(pattern: &str) -> LineMatcher {
        LineMatcher::new(pattern, SearchOptions::default()).unwrap()
    }

    #[test]
    fn test_literal_is_case_insensitive_by_default() {
        let matcher = literal("ERROR");
        assert!(matcher.is_match(b"info a ERROR"));
        assert!(matcher.is_match(b"Error b"));
        assert!(!matcher.is_match(b"info a"));
    }

    #[test]
    fn test_case_sensitive_literal() {
        let matcher = LineMatcher::new("ERROR", SearchOptions::new(false, true)).unwrap();
        assert!(matcher.is_match(b"ERROR c"));
        assert!(!matcher.is_match(b"Error b"));
    }

    #[test]
    fn test_literal_metacharacters_are_plain() {
        let matcher = literal("a.b(");
        assert!(matcher.is_match(b"x a.b( y"));
        assert!(!matcher.is_match(b"axb("));
    }

    #[test]
    fn test_regex() {
        let matcher = LineMatcher::new(r"id=\d+", SearchOptions::new(true, false)).unwrap();
        assert!(matcher.is_match(b"user id=42 logged in"));
        assert!(!matcher.is_match(b"user id=x"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = LineMatcher::new("(unclosed", SearchOptions::new(true, false)).unwrap_err();
        match err {
            LogtailError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "(unclosed"),
            other => panic!("Expected InvalidPattern, got {other:?}"),
        }
        // The same text is fine as a literal
        assert!(LineMatcher::new("(unclosed", SearchOptions::default()).is_ok());
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        assert!(LineMatcher::new("", SearchOptions::default()).is_err());
    }

    #[test]
    fn test_invalid_utf8_line_still_matches() {
        let matcher = literal("end");
        assert!(matcher.is_match(b"\xff\xfe end"));
    }
}
