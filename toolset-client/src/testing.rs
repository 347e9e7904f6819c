//! Fixtures shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use toolset_primitives::{
    CorrelationId, Endpoint, Environment, RequestContext, RpcAction, RpcRequest, RpcResponse,
    ToolProcessDescriptor,
};
use toolset_runtime::{HandlerError, RequestDispatcher, ToolDefinition, ToolRegistry};
use toolset_schema::{Field, FieldType};

use crate::error::TransportError;
use crate::transport::{LocalTransport, Transport};

pub(crate) const MATH_ENDPOINT: &str = "local://math";

pub(crate) fn dev() -> Environment {
    Environment::new("dev").unwrap()
}

fn numbers(names: &[&str]) -> Vec<Field> {
    names
        .iter()
        .map(|name| Field::required(*name, FieldType::number()))
        .collect()
}

pub(crate) fn math_dispatcher() -> Arc<RequestDispatcher> {
    let mut builder = ToolRegistry::builder("math", "0.1.0");
    builder
        .register(
            ToolDefinition::new(
                "add",
                "Add two numbers",
                numbers(&["x", "y"]),
                numbers(&["value"]),
                |params: Value| async move {
                    let x = params["x"].as_f64().unwrap_or_default();
                    let y = params["y"].as_f64().unwrap_or_default();
                    Ok::<_, HandlerError>(json!({"value": x + y}))
                },
            )
            .unwrap(),
        )
        .unwrap();
    builder
        .register(
            ToolDefinition::new(
                "divide",
                "Divide x by y",
                numbers(&["x", "y"]),
                numbers(&["value"]),
                |params: Value| async move {
                    let y = params["y"].as_f64().unwrap_or_default();
                    if y == 0.0 {
                        return Err(HandlerError::new("DivisionByZero", "y must be non-zero"));
                    }
                    Ok(json!({"value": params["x"].as_f64().unwrap_or_default() / y}))
                },
            )
            .unwrap(),
        )
        .unwrap();
    Arc::new(RequestDispatcher::new(Arc::new(builder.build())))
}

pub(crate) fn math_descriptor(marker: &str) -> ToolProcessDescriptor {
    descriptor("math", MATH_ENDPOINT, marker)
}

pub(crate) fn descriptor(name: &str, endpoint: &str, marker: &str) -> ToolProcessDescriptor {
    ToolProcessDescriptor::builder(dev())
        .name(name)
        .unwrap()
        .endpoint(endpoint)
        .unwrap()
        .version(1)
        .manifest_marker(marker)
        .build()
        .unwrap()
}

/// Wraps a local math process, failing the first sends with scripted errors
/// and recording what it saw.
pub(crate) struct ScriptedTransport {
    inner: LocalTransport,
    failures: Mutex<VecDeque<TransportError>>,
    delay: Duration,
    sends: AtomicUsize,
    describes: AtomicUsize,
    correlation_ids: Mutex<Vec<Option<CorrelationId>>>,
    contexts: Mutex<Vec<Option<RequestContext>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        let endpoint = Endpoint::new(MATH_ENDPOINT).unwrap();
        Self {
            inner: LocalTransport::new().with_route(endpoint, math_dispatcher()),
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            sends: AtomicUsize::new(0),
            describes: AtomicUsize::new(0),
            correlation_ids: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Serves the math process at one more endpoint.
    pub(crate) fn with_math_at(mut self, endpoint: &str) -> Self {
        self.inner.mount(Endpoint::new(endpoint).unwrap(), math_dispatcher());
        self
    }

    pub(crate) fn failing_with(self, failures: impl IntoIterator<Item = TransportError>) -> Self {
        self.failures.lock().unwrap().extend(failures);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub(crate) fn describes(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }

    pub(crate) fn correlation_ids(&self) -> Vec<Option<CorrelationId>> {
        self.correlation_ids.lock().unwrap().clone()
    }

    pub(crate) fn contexts(&self) -> Vec<Option<RequestContext>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
    ) -> Result<RpcResponse, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if matches!(request.action(), RpcAction::DescribeTools) {
            self.describes.fetch_add(1, Ordering::SeqCst);
        }
        self.correlation_ids
            .lock()
            .unwrap()
            .push(request.correlation_id());
        self.contexts.lock().unwrap().push(request.context().cloned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.failures.lock().unwrap().pop_front();
        match scripted {
            Some(failure) => Err(failure),
            None => self.inner.send(endpoint, request).await,
        }
    }
}
