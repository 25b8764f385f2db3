//! Validated content identifiers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest identifier accepted from clients.
pub const MAX_CONTENT_ID_LEN: usize = 64;

/// Opaque identifier naming a playable media item.
///
/// Only `[A-Za-z0-9_-]` is accepted, which keeps identifiers safe to embed in
/// URLs and in the `Content-Disposition` filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_input("content id is empty"));
        }
        if raw.len() > MAX_CONTENT_ID_LEN {
            return Err(Error::invalid_input(format!(
                "content id longer than {} characters",
                MAX_CONTENT_ID_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(Error::invalid_input(format!(
                "content id contains invalid character {:?}",
                bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for ContentId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ids() {
        assert_eq!(ContentId::parse("dQw4w9WgXcQ").unwrap().as_str(), "dQw4w9WgXcQ");
        assert_eq!(ContentId::parse("ZZ5LpwO-An4").unwrap().as_str(), "ZZ5LpwO-An4");
        assert_eq!(ContentId::parse("  abc_1 ").unwrap().as_str(), "abc_1");
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(ContentId::parse("").is_err());
        assert!(ContentId::parse("   ").is_err());
        assert!(ContentId::parse("../etc/passwd").is_err());
        assert!(ContentId::parse("a\"b").is_err());
        assert!(ContentId::parse(&"x".repeat(MAX_CONTENT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_from_str_and_display() {
        let id: ContentId = "kJQP7kiw5Fk".parse().unwrap();
        assert_eq!(id.to_string(), "kJQP7kiw5Fk");
        assert_eq!(&*id, "kJQP7kiw5Fk");
    }
}
