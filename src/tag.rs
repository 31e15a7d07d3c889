//! Installation tags.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MAX_TAG_LEN: usize = 32;

/// Errors raised when a tag is not usable as an installation identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TagError {
    /// Raised for blank tags.
    #[error("installation tag must not be empty")]
    Empty,
    /// Raised for tags longer than the limit.
    #[error("installation tag '{tag}' is longer than 32 characters")]
    TooLong {
        /// Offending tag.
        tag: String,
    },
    /// Raised for tags containing characters other than ASCII letters,
    /// digits, and inner hyphens.
    #[error("installation tag '{tag}' may only contain letters, digits, and inner hyphens")]
    InvalidCharacters {
        /// Offending tag.
        tag: String,
    },
}

/// Opaque identifier for one installation.
///
/// The tag names the state directory, prefixes every AWS `Name` tag, and is
/// recorded on disk so a later run cannot silently operate on another
/// installation's state.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstallationTag(String);

impl InstallationTag {
    /// Validates and wraps `value` after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TagError`] when the value is empty, too long, or contains
    /// characters outside `[A-Za-z0-9-]` (or starts/ends with `-`).
    pub fn new(value: &str) -> Result<Self, TagError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(TagError::Empty);
        }
        if trimmed.len() > MAX_TAG_LEN {
            return Err(TagError::TooLong {
                tag: trimmed.to_owned(),
            });
        }
        let valid_chars = trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        if !valid_chars || trimmed.starts_with('-') || trimmed.ends_with('-') {
            return Err(TagError::InvalidCharacters {
                tag: trimmed.to_owned(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InstallationTag {
    type Err = TagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl fmt::Display for InstallationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstallationTag {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("demo", "demo")]
    #[case("  team-a-01 ", "team-a-01")]
    fn new_accepts_valid_tags(#[case] input: &str, #[case] expected: &str) {
        let tag = InstallationTag::new(input).expect("tag should be valid");
        assert_eq!(tag.as_str(), expected);
    }

    #[rstest]
    #[case("", TagError::Empty)]
    #[case("   ", TagError::Empty)]
    #[case("-lead", TagError::InvalidCharacters { tag: String::from("-lead") })]
    #[case("trail-", TagError::InvalidCharacters { tag: String::from("trail-") })]
    #[case("has space", TagError::InvalidCharacters { tag: String::from("has space") })]
    #[case("dots.no", TagError::InvalidCharacters { tag: String::from("dots.no") })]
    fn new_rejects_invalid_tags(#[case] input: &str, #[case] expected: TagError) {
        assert_eq!(InstallationTag::new(input), Err(expected));
    }

    #[test]
    fn new_rejects_long_tags() {
        let long = "a".repeat(MAX_TAG_LEN + 1);
        assert!(matches!(
            InstallationTag::new(&long),
            Err(TagError::TooLong { .. })
        ));
    }
}
