//! Wire-level structures exchanged between callers and tool processes.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolset_schema::Schema;

use crate::context::{RequestContext, deserialize_lenient};
use crate::ids::CorrelationId;

/// Request envelope sent to a tool process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(flatten)]
    action: RpcAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient"
    )]
    context: Option<RequestContext>,
}

impl RpcRequest {
    /// Builds a `describe_tools` request.
    #[must_use]
    pub fn describe_tools() -> Self {
        Self {
            action: RpcAction::DescribeTools,
            correlation_id: None,
            context: None,
        }
    }

    /// Builds an `invoke` request.
    #[must_use]
    pub fn invoke(method: impl Into<String>, params: Value) -> Self {
        Self {
            action: RpcAction::Invoke {
                method: method.into(),
                params,
            },
            correlation_id: None,
            context: None,
        }
    }

    /// Attaches a correlation identifier.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attaches caller context. An empty context is not sent.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = (!context.is_empty()).then_some(context);
        self
    }

    /// Returns the caller context, if any was sent.
    #[must_use]
    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    /// Returns the requested action.
    #[must_use]
    pub fn action(&self) -> &RpcAction {
        &self.action
    }

    /// Returns the correlation identifier, if the caller supplied one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }
}

/// The two actions a tool process understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RpcAction {
    /// Return the toolset manifest.
    DescribeTools,
    /// Run one tool.
    Invoke {
        /// Tool name.
        method: String,
        /// Raw parameter object.
        #[serde(default = "empty_params")]
        params: Value,
    },
}

impl RpcAction {
    /// Returns the wire label of the action.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DescribeTools => "describe_tools",
            Self::Invoke { .. } => "invoke",
        }
    }
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// Response envelope: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    /// Successful outcome.
    Result(Value),
    /// Failed outcome.
    Error(RpcErrorBody),
}

impl RpcResponse {
    /// Wraps a successful value.
    #[must_use]
    pub fn result(value: Value) -> Self {
        Self::Result(value)
    }

    /// Builds an error response.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(RpcErrorBody {
            kind,
            message: message.into(),
        })
    }

    /// Returns `true` for error responses.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Converts the envelope into a standard result.
    ///
    /// # Errors
    ///
    /// Returns the error body for error responses.
    pub fn into_result(self) -> Result<Value, RpcErrorBody> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(body) => Err(body),
        }
    }
}

/// Error payload carried by [`RpcResponse::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: String,
}

impl RpcErrorBody {
    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Declared error kinds. Handler-defined subtypes travel as [`ErrorKind::Handler`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// The requested method is not registered.
    UnknownMethod,
    /// Parameters failed schema validation.
    Validation,
    /// The envelope itself was malformed.
    BadRequest,
    /// The process failed in a way it does not describe further.
    Internal,
    /// A handler reported a business failure of the named subtype.
    Handler(String),
}

impl ErrorKind {
    /// Returns the wire label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::UnknownMethod => "UnknownMethodError",
            Self::Validation => "ValidationError",
            Self::BadRequest => "BadRequest",
            Self::Internal => "InternalError",
            Self::Handler(subtype) => subtype.as_str(),
        }
    }
}

impl From<String> for ErrorKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "UnknownMethodError" => Self::UnknownMethod,
            "ValidationError" => Self::Validation,
            "BadRequest" => Self::BadRequest,
            "InternalError" => Self::Internal,
            _ => Self::Handler(value),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::Handler(subtype) => subtype,
            other => other.as_str().to_owned(),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Introspection record for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Human-readable documentation.
    #[serde(default)]
    pub doc: String,
    /// Schema of the parameter object.
    pub params_schema: Schema,
    /// Schema of the result object.
    pub result_schema: Schema,
}

/// Payload of a successful `describe_tools` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsetManifest {
    /// Toolset name reported by the process.
    pub toolset: String,
    /// Toolset build version.
    pub toolset_version: String,
    /// Timestamp at which the manifest was produced.
    pub manifest_version: String,
    /// Tools in registration order.
    pub tools: Vec<ToolSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let request = RpcRequest::invoke("add", json!({"x": 2, "y": 3}));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"action": "invoke", "method": "add", "params": {"x": 2, "y": 3}})
        );

        let parsed: RpcRequest =
            serde_json::from_value(json!({"action": "describe_tools"})).unwrap();
        assert_eq!(parsed, RpcRequest::describe_tools());

        let parsed: RpcRequest =
            serde_json::from_value(json!({"action": "invoke", "method": "noop"})).unwrap();
        assert!(matches!(
            parsed.action(),
            RpcAction::Invoke { params, .. } if params == &json!({})
        ));
    }

    #[test]
    fn context_travels_with_the_request() {
        let request = RpcRequest::invoke("whoami", json!({}))
            .with_context(RequestContext::new().with_user_jwt("token"));
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["context"], json!({"user_jwt": "token"}));

        let parsed: RpcRequest = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.context().and_then(RequestContext::user_jwt), Some("token"));

        let parsed: RpcRequest = serde_json::from_value(
            json!({"action": "invoke", "method": "whoami", "context": "ignored"}),
        )
        .unwrap();
        assert!(parsed.context().is_none());
        assert!(serde_json::to_value(&parsed).unwrap().get("context").is_none());
    }

    #[test]
    fn response_is_exactly_one_of_result_or_error() {
        let error = RpcResponse::error(ErrorKind::Validation, "`x`: missing required field");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"error": {"type": "ValidationError", "message": "`x`: missing required field"}})
        );

        let both = json!({"result": 1, "error": {"type": "InternalError", "message": "x"}});
        assert!(serde_json::from_value::<RpcResponse>(both).is_err());
        assert!(serde_json::from_value::<RpcResponse>(json!({})).is_err());
    }

    #[test]
    fn handler_subtypes_round_trip() {
        let kind: ErrorKind = serde_json::from_value(json!("InsufficientFunds")).unwrap();
        assert_eq!(kind, ErrorKind::Handler("InsufficientFunds".into()));
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("InsufficientFunds"));
        assert_eq!(ErrorKind::from("UnknownMethodError".to_owned()), ErrorKind::UnknownMethod);
    }
}
