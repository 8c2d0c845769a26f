//! Validation of caller supplied table names
//!
//! A [`TableName`] ends up verbatim in an `INSERT INTO <table>` statement, so the only way to
//! build one is through [`TableName::sanitize`].

use std::{borrow::Borrow, fmt::Display, sync::Arc};

/// The longest identifier the backing store accepts; longer names are truncated to this.
pub const MAX_TABLE_NAME_LENGTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTableName {
    #[error("table name cannot be empty")]
    Empty,
    #[error("table name must start with an ASCII letter or underscore, found {0:?}")]
    InvalidStartChar(char),
    #[error(
        "invalid character {0:?} in table name: must be ASCII, \
        containing only letters, numbers, or underscores"
    )]
    InvalidChar(char),
}

/// A validated, possibly truncated, table identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(Arc<str>);

impl TableName {
    /// Strip surrounding slashes, backslashes, and whitespace from `raw` and validate the rest as
    /// `[A-Za-z_][A-Za-z0-9_]*`, truncated to [`MAX_TABLE_NAME_LENGTH`].
    pub fn sanitize(raw: &str) -> Result<Self, InvalidTableName> {
        let name = raw.trim_matches(|c: char| c == '/' || c == '\\' || c.is_whitespace());

        let mut chars = name.chars();
        match chars.next() {
            None => return Err(InvalidTableName::Empty),
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                return Err(InvalidTableName::InvalidStartChar(c));
            }
            Some(_) => (),
        }
        if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(InvalidTableName::InvalidChar(c));
        }

        // all ASCII at this point, so any byte offset is a char boundary
        let name = &name[..name.len().min(MAX_TABLE_NAME_LENGTH)];
        Ok(Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(TableName::sanitize("events").unwrap().as_str(), "events");
        assert_eq!(TableName::sanitize("/events/").unwrap().as_str(), "events");
        assert_eq!(TableName::sanitize(" \\_t1 ").unwrap().as_str(), "_t1");
        assert_eq!(TableName::sanitize("Page_Views_2").unwrap().as_str(), "Page_Views_2");

        assert_eq!(TableName::sanitize(""), Err(InvalidTableName::Empty));
        assert_eq!(TableName::sanitize("//"), Err(InvalidTableName::Empty));
        assert_eq!(TableName::sanitize(" / \\ "), Err(InvalidTableName::Empty));
        assert_eq!(
            TableName::sanitize("1events"),
            Err(InvalidTableName::InvalidStartChar('1'))
        );
        assert_eq!(
            TableName::sanitize("a/b"),
            Err(InvalidTableName::InvalidChar('/'))
        );
        assert_eq!(
            TableName::sanitize("a\\b"),
            Err(InvalidTableName::InvalidChar('\\'))
        );
        assert_eq!(
            TableName::sanitize("drop table;"),
            Err(InvalidTableName::InvalidChar(' '))
        );
        assert_eq!(
            TableName::sanitize("ünïcode"),
            Err(InvalidTableName::InvalidStartChar('ü'))
        );
        assert_eq!(
            TableName::sanitize("events-2024"),
            Err(InvalidTableName::InvalidChar('-'))
        );
    }

    #[test]
    fn path_traversal_is_rejected() {
        assert_eq!(
            TableName::sanitize("../etc/passwd"),
            Err(InvalidTableName::InvalidStartChar('.'))
        );
    }

    #[test]
    fn long_names_are_truncated() {
        let raw = "a".repeat(70);
        let name = TableName::sanitize(&raw).unwrap();
        assert_eq!(name.as_str().len(), MAX_TABLE_NAME_LENGTH);
        assert_eq!(name.as_str(), &raw[..64]);

        let exact = "b".repeat(64);
        assert_eq!(TableName::sanitize(&exact).unwrap().as_str(), exact);
    }

    #[test]
    fn is_case_sensitive() {
        assert_ne!(
            TableName::sanitize("Events").unwrap(),
            TableName::sanitize("events").unwrap()
        );
    }
}
