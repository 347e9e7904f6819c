//! Error definitions for schema declaration and validation.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

/// Result alias for schema declaration checks.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while checking field declarations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A field declaration was malformed.
    #[error("invalid field `{path}`: {reason}")]
    InvalidField {
        /// Location of the offending declaration.
        path: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl SchemaError {
    pub(crate) fn invalid_field(path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a validated document, e.g. `items[2].name`.
///
/// The empty path renders as `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Returns the root path.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn push_key(&mut self, key: &str) {
        self.segments.push(Segment::Key(key.to_owned()));
    }

    pub(crate) fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    pub(crate) fn pop(&mut self) {
        self.segments.pop();
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("$");
        }
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if position == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// What was wrong with the value at a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    /// A required field was absent.
    #[error("missing required field")]
    MissingField,
    /// A field not declared by the schema was present.
    #[error("unknown field")]
    UnknownField,
    /// The value had the wrong JSON type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Type demanded by the schema.
        expected: &'static str,
        /// Type actually supplied.
        found: &'static str,
    },
    /// A string was outside an enumeration.
    #[error("`{value}` is not one of [{allowed}]")]
    NotInEnum {
        /// Supplied value.
        value: String,
        /// Comma-separated permitted values.
        allowed: String,
    },
}

/// Validation failure naming the first offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{path}`: {issue}")]
pub struct ValidationError {
    path: FieldPath,
    issue: ValidationIssue,
}

impl ValidationError {
    pub(crate) fn new(path: &FieldPath, issue: ValidationIssue) -> Self {
        Self {
            path: path.clone(),
            issue,
        }
    }

    /// Returns the location of the offending value.
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Returns what was wrong with the value.
    #[must_use]
    pub fn issue(&self) -> &ValidationIssue {
        &self.issue
    }
}

/// Errors produced by [`crate::encode`] and [`crate::decode`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value did not conform to the schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The value could not be converted to JSON.
    #[error("failed to encode value: {reason}")]
    Encode {
        /// Serializer message.
        reason: String,
    },
    /// The validated JSON could not be converted to the target type.
    #[error("failed to decode value: {reason}")]
    Decode {
        /// Deserializer message.
        reason: String,
    },
}
