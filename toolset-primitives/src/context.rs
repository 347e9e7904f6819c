//! Caller context carried alongside a request.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// header and payload of at least 10 characters, signature of at least 32
const JWT_PATTERN: &str = r"^[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{32,}$";

static JWT_FORMAT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(JWT_PATTERN).ok());

/// Returns `true` when `token` has the three-segment shape of a JWT.
///
/// Only the shape is checked; signatures are not verified.
#[must_use]
pub fn is_jwt_format(token: &str) -> bool {
    JWT_FORMAT
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(token))
}

/// Per-request information about the caller.
///
/// Travels as the optional `context` member of a request envelope. Tools read
/// it while they run; it never takes part in parameter validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_jwt: Option<String>,
}

impl RequestContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the caller's bearer token. Blank tokens are dropped.
    #[must_use]
    pub fn with_user_jwt(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.user_jwt = (!token.trim().is_empty()).then_some(token);
        self
    }

    /// Returns the caller's bearer token, if one was sent.
    #[must_use]
    pub fn user_jwt(&self) -> Option<&str> {
        self.user_jwt.as_deref()
    }

    /// Returns `true` when a token was sent and has the shape of a JWT.
    #[must_use]
    pub fn has_valid_user_jwt(&self) -> bool {
        self.user_jwt().is_some_and(is_jwt_format)
    }

    /// Returns `true` when the context carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_jwt.is_none()
    }

    /// Builds a context from an arbitrary JSON value.
    ///
    /// Anything other than an object yields an empty context; a `user_jwt`
    /// that is not a non-blank string is ignored.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let token = value
            .get("user_jwt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Self::new().with_user_jwt(token)
    }
}

/// Lenient decoder for the envelope's `context` member.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<RequestContext>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let context = RequestContext::from_value(&value);
    Ok((!context.is_empty()).then_some(context))
}
