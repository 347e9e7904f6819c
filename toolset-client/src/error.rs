//! Error types surfaced to callers.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;
use toolset_primitives::{DescriptorKey, ErrorKind, ManifestMarker};
use toolset_schema::{CodecError, ValidationError};

use crate::discovery::DiscoveryError;

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// No response within the call deadline.
    Timeout,
    /// The process or its host asked the caller to back off.
    Throttled,
    /// The endpoint could not be reached or the connection dropped.
    Connection,
    /// The peer answered with something that is not a response envelope.
    Protocol,
}

impl TransportErrorKind {
    /// Returns `true` when another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Protocol)
    }

    /// Returns a short label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Throttled => "throttled",
            Self::Connection => "connection",
            Self::Protocol => "protocol",
        }
    }
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to exchange an envelope with a tool process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {reason}")]
pub struct TransportError {
    kind: TransportErrorKind,
    reason: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`TransportErrorKind::Timeout`].
    #[must_use]
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, reason)
    }

    /// Convenience constructor for [`TransportErrorKind::Throttled`].
    #[must_use]
    pub fn throttled(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Throttled, reason)
    }

    /// Convenience constructor for [`TransportErrorKind::Connection`].
    #[must_use]
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, reason)
    }

    /// Convenience constructor for [`TransportErrorKind::Protocol`].
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, reason)
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns `true` when another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Outcome of a failed call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Parameters did not match the stub's schema; nothing was sent.
    #[error("invalid call parameters: {0}")]
    Validation(#[from] ValidationError),

    /// Typed parameters or results could not be converted.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The tool process answered with an error envelope.
    #[error("remote {kind}: {message}")]
    Remote {
        /// Error kind reported by the process.
        kind: ErrorKind,
        /// Message reported by the process.
        message: String,
    },

    /// A transport failure that retrying cannot fix.
    #[error(transparent)]
    Transport(TransportError),

    /// Every attempt failed with a retryable transport error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Failure observed on the final attempt.
        last: TransportError,
    },

    /// A successful response carried an unexpected payload.
    #[error("unexpected response payload: {reason}")]
    Protocol {
        /// Why the payload was rejected.
        reason: String,
    },

    /// The stub was built under a manifest marker that is no longer
    /// published; nothing was sent.
    #[error("stub for `{key}` was built under manifest `{captured}`, which is no longer current")]
    StaleManifest {
        /// Registry identity of the process.
        key: DescriptorKey,
        /// Marker the stub was built under.
        captured: ManifestMarker,
        /// Marker now published, or `None` if the process left the registry.
        current: Option<ManifestMarker>,
    },

    /// Endpoint discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl ClientError {
    /// Convenience constructor for [`ClientError::Protocol`].
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns the remote error kind for [`ClientError::Remote`].
    #[must_use]
    pub fn remote_kind(&self) -> Option<&ErrorKind> {
        match self {
            Self::Remote { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
