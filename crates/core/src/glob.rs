//! Glob patterns used by capability headers.
//!
//! `.` is literal and `*` matches any character sequence, including path and
//! qualifier separators. Every other character is matched literally.

use regex::Regex;
use std::fmt;

#[derive(Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let expression = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expression)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn matches_everything(&self) -> bool {
        !self.source.is_empty() && self.source.chars().all(|c| c == '*')
    }
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobPattern").field(&self.source).finish()
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_is_literal() {
        let pattern = GlobPattern::new("a.b.C").unwrap();
        assert!(pattern.is_match("a.b.C"));
        assert!(!pattern.is_match("aXb.C"));
    }

    #[test]
    fn test_star_crosses_separators() {
        let pattern = GlobPattern::new("a.b.*").unwrap();
        assert!(pattern.is_match("a.b.c.D"));
        assert!(pattern.is_match("a.b.E"));
        assert!(!pattern.is_match("a.c.D"));

        let files = GlobPattern::new("*.xml").unwrap();
        assert!(files.is_match("beans.xml"));
        assert!(files.is_match("nested/beans.xml"));
        assert!(!files.is_match("beans.xml.bak"));
    }

    #[test]
    fn test_regex_metacharacters_are_escaped() {
        let pattern = GlobPattern::new("a$b+(c)").unwrap();
        assert!(pattern.is_match("a$b+(c)"));
        assert!(!pattern.is_match("ab"));
    }

    #[test]
    fn test_matches_everything() {
        assert!(GlobPattern::new("*").unwrap().matches_everything());
        assert!(!GlobPattern::new("a.*").unwrap().matches_everything());
    }
}
