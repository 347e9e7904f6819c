//! Identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Identifier attached to one logical call and every retry of it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a random correlation identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::random()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for CorrelationId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(Error::from)?;
        Ok(Self::from_uuid(uuid))
    }
}

/// Deployment environment tag, e.g. `dev` or `prod`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    /// Creates an environment tag after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] if the tag is empty, too long, or
    /// contains characters other than lowercase alphanumerics, dash, or
    /// underscore.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_identifier(&tag)?;
        Ok(Self(tag))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

pub(crate) fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidIdentifier {
            id: String::new(),
            reason: "identifier cannot be empty".into(),
        });
    }

    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier {
            id: id.into(),
            reason: format!("identifier length must be <= {MAX_IDENTIFIER_LEN}"),
        });
    }

    if !id
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_'))
    {
        return Err(Error::InvalidIdentifier {
            id: id.into(),
            reason: "identifier must contain lowercase alphanumeric, dash, or underscore".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_correlation_id() {
        let id = CorrelationId::random();
        let parsed = id.to_string().parse::<CorrelationId>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn environment_validation() {
        assert_eq!(Environment::new("dev").unwrap().as_str(), "dev");
        assert!(Environment::new("").is_err());
        assert!(Environment::new("Prod").is_err());
        assert!(Environment::new("a".repeat(65)).is_err());
    }
}
