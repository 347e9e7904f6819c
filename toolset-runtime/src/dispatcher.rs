//! Request dispatch pipeline: envelope in, envelope out.
//!
//! Each request moves through [`DispatchStage`]s. Whatever happens inside the
//! pipeline, the caller receives exactly one [`RpcResponse`]; failures are
//! mapped to the declared error kinds and panics raised by handlers are
//! contained.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use toolset_config::ServerSettings;
use toolset_primitives::{
    CorrelationId, ErrorKind, RequestContext, RpcAction, RpcRequest, RpcResponse,
};
use toolset_schema::{UnknownFields, encode, validate};
use tracing::{debug, info, warn};

use crate::context;
use crate::registry::ToolRegistry;

const SERIALIZATION_FALLBACK: &[u8] =
    br#"{"error":{"type":"InternalError","message":"response serialization failed"}}"#;

/// Tunables for a [`RequestDispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    unknown_fields: UnknownFields,
    max_in_flight: NonZeroUsize,
}

impl DispatchOptions {
    /// Sets the policy applied to undeclared parameter keys.
    #[must_use]
    pub const fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    /// Sets how many handlers may run at once.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: NonZeroUsize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Returns the unknown-field policy.
    #[must_use]
    pub const fn unknown_fields(self) -> UnknownFields {
        self.unknown_fields
    }

    /// Returns the execution slot count.
    #[must_use]
    pub const fn max_in_flight(self) -> NonZeroUsize {
        self.max_in_flight
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFields::Reject,
            max_in_flight: NonZeroUsize::MIN,
        }
    }
}

impl From<&ServerSettings> for DispatchOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self::default()
            .with_unknown_fields(settings.unknown_fields())
            .with_max_in_flight(settings.max_in_flight())
    }
}

/// Pipeline stages a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchStage {
    /// Envelope decoded.
    Received,
    /// Action routed; for `invoke`, the method resolved.
    Routed,
    /// Parameters validated against the tool's schema.
    Validated,
    /// Handler returned a conforming result.
    Executed,
    /// Response produced.
    Responded,
}

/// Summary of one dispatched request, handed to [`DispatchObserver`]s.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    correlation_id: Option<CorrelationId>,
    action: &'static str,
    method: Option<String>,
    has_user_jwt: bool,
    reached: DispatchStage,
    error: Option<ErrorKind>,
    duration: Duration,
}

impl DispatchRecord {
    /// Correlation identifier supplied by the caller.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Action label (`describe_tools` or `invoke`).
    #[must_use]
    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Method name for `invoke` requests.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Whether the caller sent a bearer token in the request context.
    #[must_use]
    pub fn has_user_jwt(&self) -> bool {
        self.has_user_jwt
    }

    /// Last stage completed before the response was produced.
    #[must_use]
    pub fn reached(&self) -> DispatchStage {
        self.reached
    }

    /// Error kind returned to the caller, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    /// Wall time spent inside the dispatcher.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns `true` when the response carried a result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Observer invoked once per dispatched request.
pub trait DispatchObserver: Send + Sync {
    /// Records the outcome of a request.
    fn on_dispatch(&self, record: &DispatchRecord);
}

/// Observer that emits dispatch outcomes to the tracing system.
#[derive(Debug, Default)]
pub struct TracingDispatchObserver;

impl DispatchObserver for TracingDispatchObserver {
    fn on_dispatch(&self, record: &DispatchRecord) {
        let correlation_id = record.correlation_id.map(|id| id.to_string());
        let duration_ms = u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX);
        match &record.error {
            None => info!(
                action = record.action,
                method = record.method.as_deref(),
                correlation_id = correlation_id.as_deref(),
                has_user_jwt = record.has_user_jwt,
                duration_ms,
                "request handled"
            ),
            Some(kind) => warn!(
                action = record.action,
                method = record.method.as_deref(),
                correlation_id = correlation_id.as_deref(),
                has_user_jwt = record.has_user_jwt,
                duration_ms,
                error = %kind,
                stage = ?record.reached,
                "request failed"
            ),
        }
    }
}

/// Routes decoded envelopes to registered tools.
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<ToolRegistry>,
    options: DispatchOptions,
    observer: Arc<dyn DispatchObserver>,
    slots: Arc<Semaphore>,
}

impl fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("toolset", &self.registry.toolset())
            .field("tools", &self.registry.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RequestDispatcher {
    /// Creates a dispatcher with default options and tracing observation.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_options(registry, DispatchOptions::default())
    }

    /// Creates a dispatcher with explicit options.
    #[must_use]
    pub fn with_options(registry: Arc<ToolRegistry>, options: DispatchOptions) -> Self {
        Self {
            registry,
            options,
            observer: Arc::new(TracingDispatchObserver),
            slots: Arc::new(Semaphore::new(options.max_in_flight().get())),
        }
    }

    /// Replaces the dispatch observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the registry served by this dispatcher.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Returns the configured options.
    #[must_use]
    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Handles one decoded request.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let started = Instant::now();
        let mut trace = Trace::new(&request);

        let response = match request.action() {
            RpcAction::DescribeTools => self.describe(&mut trace),
            RpcAction::Invoke { method, params } => {
                let caller = request.context().cloned().unwrap_or_default();
                self.invoke(method, params, caller, &mut trace).await
            }
        };

        let record = DispatchRecord {
            correlation_id: request.correlation_id(),
            action: trace.action,
            method: trace.method,
            has_user_jwt: request
                .context()
                .is_some_and(|caller| caller.user_jwt().is_some()),
            reached: trace.reached,
            error: match &response {
                RpcResponse::Error(body) => Some(body.kind().clone()),
                RpcResponse::Result(_) => None,
            },
            duration: started.elapsed(),
        };
        debug!(stage = ?DispatchStage::Responded, action = record.action, "dispatch complete");
        self.observer.on_dispatch(&record);
        response
    }

    /// Handles a request that has been parsed as JSON but not yet decoded
    /// into an envelope.
    pub async fn handle_value(&self, raw: Value) -> RpcResponse {
        match serde_json::from_value::<RpcRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                debug!(error = %err, "rejecting malformed envelope");
                self.reject(format!("malformed request envelope: {err}"))
            }
        }
    }

    /// Handles raw request bytes and returns the serialized response.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Vec<u8> {
        let response = match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.handle_value(value).await,
            Err(err) => self.reject(format!("request body is not valid JSON: {err}")),
        };

        serde_json::to_vec(&response).unwrap_or_else(|err| {
            warn!(error = %err, "failed to serialize response");
            SERIALIZATION_FALLBACK.to_vec()
        })
    }

    fn reject(&self, message: String) -> RpcResponse {
        let record = DispatchRecord {
            correlation_id: None,
            action: "unknown",
            method: None,
            has_user_jwt: false,
            reached: DispatchStage::Received,
            error: Some(ErrorKind::BadRequest),
            duration: Duration::ZERO,
        };
        self.observer.on_dispatch(&record);
        RpcResponse::error(ErrorKind::BadRequest, message)
    }

    fn describe(&self, trace: &mut Trace) -> RpcResponse {
        trace.reach(DispatchStage::Routed);
        match serde_json::to_value(self.registry.manifest()) {
            Ok(manifest) => {
                trace.reach(DispatchStage::Executed);
                RpcResponse::result(manifest)
            }
            Err(err) => {
                warn!(error = %err, "failed to serialize manifest");
                RpcResponse::error(ErrorKind::Internal, "manifest unavailable")
            }
        }
    }

    async fn invoke(
        &self,
        method: &str,
        params: &Value,
        caller: RequestContext,
        trace: &mut Trace,
    ) -> RpcResponse {
        trace.method = Some(method.to_owned());

        let definition = match self.registry.resolve(method) {
            Ok(definition) => Arc::clone(definition),
            Err(err) => return RpcResponse::error(ErrorKind::UnknownMethod, err.to_string()),
        };
        trace.reach(DispatchStage::Routed);

        if !params.is_object() {
            return RpcResponse::error(ErrorKind::BadRequest, "'params' must be an object");
        }

        let params = match validate(
            definition.params_schema(),
            params,
            self.options.unknown_fields(),
        ) {
            Ok(params) => params,
            Err(err) => return RpcResponse::error(ErrorKind::Validation, err.to_string()),
        };
        trace.reach(DispatchStage::Validated);

        let outcome = {
            let Ok(_permit) = self.slots.acquire().await else {
                return RpcResponse::error(ErrorKind::Internal, "dispatcher is shutting down");
            };
            AssertUnwindSafe(context::scope(caller, definition.execute(params)))
                .catch_unwind()
                .await
        };

        match outcome {
            Err(_) => {
                warn!(method, "tool handler panicked");
                RpcResponse::error(ErrorKind::Internal, "tool handler failed unexpectedly")
            }
            Ok(Err(err)) => RpcResponse::error(ErrorKind::from(err.kind().to_owned()), err.message()),
            Ok(Ok(value)) => match encode(definition.result_schema(), &value) {
                Ok(result) => {
                    trace.reach(DispatchStage::Executed);
                    RpcResponse::result(result)
                }
                Err(err) => {
                    warn!(method, error = %err, "tool result does not match its declared schema");
                    RpcResponse::error(
                        ErrorKind::Internal,
                        format!("tool `{method}` produced a malformed result"),
                    )
                }
            },
        }
    }
}

struct Trace {
    action: &'static str,
    method: Option<String>,
    reached: DispatchStage,
}

impl Trace {
    fn new(request: &RpcRequest) -> Self {
        debug!(
            stage = ?DispatchStage::Received,
            action = request.action().label(),
            "request received"
        );
        Self {
            action: request.action().label(),
            method: None,
            reached: DispatchStage::Received,
        }
    }

    fn reach(&mut self, stage: DispatchStage) {
        debug!(stage = ?stage, action = self.action, method = self.method.as_deref(), "stage reached");
        self.reached = stage;
    }
}
