//! Handler abstraction bound to each tool definition.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Result alias for handler execution.
pub type HandlerResult<T = Value> = Result<T, HandlerError>;

const GENERIC_KIND: &str = "HandlerError";
const INTERNAL_KIND: &str = "InternalError";
const RESERVED_KINDS: [&str; 3] = ["UnknownMethodError", "ValidationError", "BadRequest"];

/// Business failure reported by a tool handler.
///
/// The `kind` travels to the caller as the error `type`; the message should
/// be safe to show to callers and must not carry internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    kind: String,
    message: String,
}

impl HandlerError {
    /// Creates an error of the given subtype.
    ///
    /// Blank subtypes and the kinds the dispatcher reserves for its own
    /// failures (`UnknownMethodError`, `ValidationError`, `BadRequest`) are
    /// reported as the generic `HandlerError`.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        let kind = if kind.trim().is_empty() || RESERVED_KINDS.contains(&kind.as_str()) {
            GENERIC_KIND.to_owned()
        } else {
            kind
        };
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an error with the generic `HandlerError` subtype.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(GENERIC_KIND, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_KIND, message)
    }

    /// Returns the error subtype.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the caller-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Trait implemented by tool executors. Parameters arrive already validated
/// against the tool's parameter schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool.
    async fn call(&self, params: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, params: Value) -> HandlerResult {
        (self)(params).await
    }
}

/// Adapts a strongly typed function to [`ToolHandler`].
pub(crate) struct TypedHandler<P, R, F> {
    func: F,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R, F> TypedHandler<P, R, F> {
    pub(crate) fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P, R, F, Fut> ToolHandler for TypedHandler<P, R, F>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<R>> + Send,
{
    async fn call(&self, params: Value) -> HandlerResult {
        // Params were validated against the declared fields; a decode failure
        // means the declaration and the Rust type disagree.
        let params: P = serde_json::from_value(params).map_err(|err| {
            warn!(error = %err, "validated parameters do not fit the handler type");
            HandlerError::internal("tool parameters could not be decoded")
        })?;
        let output = (self.func)(params).await?;
        serde_json::to_value(output).map_err(|err| {
            warn!(error = %err, "handler result could not be serialized");
            HandlerError::internal("tool result could not be encoded")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    #[derive(Serialize)]
    struct Reply {
        text: String,
    }

    #[test]
    fn reserved_kinds_become_generic() {
        assert_eq!(HandlerError::new("ValidationError", "m").kind(), "HandlerError");
        assert_eq!(HandlerError::new("UnknownMethodError", "m").kind(), "HandlerError");
        assert_eq!(HandlerError::new(" ", "m").kind(), "HandlerError");
        assert_eq!(HandlerError::new("OutOfStock", "m").kind(), "OutOfStock");
        assert_eq!(HandlerError::internal("m").kind(), "InternalError");
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |params: Value| async move { Ok::<_, HandlerError>(params) };
        let output = handler.call(json!({"a": 1})).await.unwrap();
        assert_eq!(output, json!({"a": 1}));
    }

    #[tokio::test]
    async fn typed_handler_round_trips() {
        let handler = TypedHandler::new(|greeting: Greeting| async move {
            Ok(Reply {
                text: format!("hello {}", greeting.name),
            })
        });

        let output = handler.call(json!({"name": "ada"})).await.unwrap();
        assert_eq!(output, json!({"text": "hello ada"}));

        let err = handler.call(json!({"nom": "ada"})).await.unwrap_err();
        assert_eq!(err.kind(), "InternalError");
        assert_eq!(err.message(), "tool parameters could not be decoded");
    }
}
