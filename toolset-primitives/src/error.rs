//! Shared error definitions for toolforest primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used by primitive constructors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided correlation identifier could not be parsed.
    #[error("invalid correlation id: {source}")]
    InvalidCorrelationId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// An identifier (environment, process name) failed validation.
    #[error("invalid identifier `{id}`: {reason}")]
    InvalidIdentifier {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A process descriptor was incomplete or malformed.
    #[error("invalid process descriptor: {reason}")]
    InvalidDescriptor {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
