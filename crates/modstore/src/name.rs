//! ModuleName: a validated module identifier.
//!
//! Grammar: one or more segments of `[A-Za-z0-9_]+` joined by literal dots.
//! Surrounding whitespace is trimmed before matching. The dots carry no
//! hierarchy; a name is always a single, flat directory key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest name accepted, so the directory key fits a single path component.
pub const MAX_NAME_LEN: usize = 255;

/// A module name that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

/// Errors from module name validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("module name is empty")]
    Empty,

    #[error("module name has an empty segment: {0:?}")]
    EmptySegment(String),

    #[error("module name contains invalid character {ch:?}: {name:?}")]
    InvalidChar { name: String, ch: char },

    #[error("module name is {0} bytes long, limit is {MAX_NAME_LEN}")]
    TooLong(usize),
}

impl ModuleName {
    /// Trim and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(name.len()));
        }

        for segment in name.split('.') {
            if segment.is_empty() {
                return Err(NameError::EmptySegment(name.to_string()));
            }
            if let Some(ch) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            {
                return Err(NameError::InvalidChar {
                    name: name.to_string(),
                    ch,
                });
            }
        }

        Ok(Self(name.to_string()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModuleName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModuleName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_grammar() {
        for raw in ["demo", "a", "A_b_9", "audio.mixer", "a.b.c_d.E9", "_", "0.1"] {
            let name = ModuleName::parse(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
            assert_eq!(name.as_str(), raw);
        }
    }

    #[test]
    fn test_trims_whitespace() {
        let name = ModuleName::parse("  demo.core \n").unwrap();
        assert_eq!(name.as_str(), "demo.core");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ModuleName::parse(""), Err(NameError::Empty));
        assert_eq!(ModuleName::parse("   "), Err(NameError::Empty));
    }

    #[test]
    fn test_rejects_empty_segments() {
        for raw in [".", "..", ".demo", "demo.", "a..b"] {
            assert!(
                matches!(ModuleName::parse(raw), Err(NameError::EmptySegment(_))),
                "{raw} should fail"
            );
        }
    }

    #[test]
    fn test_rejects_foreign_characters() {
        for raw in ["a/b", "etc/passwd", "a\\b", "a-b", "a b", "mödule", "a:b", "a\0b", "~root"] {
            assert!(
                matches!(ModuleName::parse(raw), Err(NameError::InvalidChar { .. })),
                "{raw} should fail"
            );
        }
    }

    #[test]
    fn test_dot_is_literal_not_wildcard() {
        // A permissive `.` would let any single character act as a separator.
        assert!(ModuleName::parse("a-b").is_err());
        assert!(ModuleName::parse("a/b").is_err());
    }

    #[test]
    fn test_rejects_overlong() {
        let raw = "a".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            ModuleName::parse(&raw),
            Err(NameError::TooLong(MAX_NAME_LEN + 1))
        );
        assert!(ModuleName::parse(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let name: ModuleName = serde_json::from_str("\"demo.core\"").unwrap();
        assert_eq!(name.as_str(), "demo.core");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"demo.core\"");

        let bad: Result<ModuleName, _> = serde_json::from_str("\"../x\"");
        assert!(bad.is_err());
    }
}
