//! Remote call execution with bounded retries.
//!
//! Handlers are expected to be idempotent: a retried call may execute more
//! than once if an earlier attempt reached the process but its response was
//! lost. Every attempt of one call carries the same correlation id so
//! duplicates can be matched in logs on both sides.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use toolset_config::{ClientSettings, RetrySettings};
use toolset_primitives::{CorrelationId, Endpoint, RequestContext, RpcRequest, ToolsetManifest};
use toolset_schema::{CodecError, UnknownFields, decode, validate};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult, TransportError};
use crate::proxy::ProxyStub;
use crate::transport::Transport;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy. The multiplier is clamped to at least `1.0` and the
    /// initial delay to at most `max_backoff`.
    #[must_use]
    pub fn new(
        max_attempts: NonZeroU32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff: initial_backoff.min(max_backoff),
            max_backoff,
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(NonZeroU32::MIN, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Total attempts per call, including the first.
    #[must_use]
    pub const fn max_attempts(self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Delay before the first retry, before jitter.
    #[must_use]
    pub const fn initial_backoff(self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound on any delay.
    #[must_use]
    pub const fn max_backoff(self) -> Duration {
        self.max_backoff
    }

    /// Un-jittered delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn backoff(self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
    }

    /// Jittered delay, uniform in `[backoff / 2, backoff]`.
    #[must_use]
    pub fn jittered_backoff(self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        delay.mul_f64(0.5 + rand::random::<f64>() / 2.0)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts(),
            settings.initial_backoff(),
            settings.max_backoff(),
            settings.multiplier(),
        )
    }
}

/// States a call moves through; emitted at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call accepted, nothing done yet.
    Idle,
    /// Parameters being validated and encoded.
    Serializing,
    /// Envelope handed to the transport.
    Sent,
    /// A result arrived.
    Succeeded,
    /// A retryable transport failure; the call will be sent again.
    RecoverableFailure,
    /// A failure that ends the call.
    FatalFailure,
    /// No further transitions.
    Terminal,
}

/// Sends envelopes through a [`Transport`] with deadline and retry handling.
///
/// The deadline bounds each attempt, not the call: a call that keeps timing
/// out can take up to `max_attempts` deadlines plus the backoff between them.
#[derive(Clone)]
pub struct InvocationClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    deadline: Duration,
    unknown_fields: UnknownFields,
    context: RequestContext,
}

impl fmt::Debug for InvocationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationClient")
            .field("retry", &self.retry)
            .field("deadline", &self.deadline)
            .field("unknown_fields", &self.unknown_fields)
            .field("has_user_jwt", &self.context.user_jwt().is_some())
            .finish_non_exhaustive()
    }
}

impl InvocationClient {
    /// Creates a client with the default retry policy and a 10 second
    /// per-attempt deadline.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            deadline: Duration::from_secs(10),
            unknown_fields: UnknownFields::Reject,
            context: RequestContext::default(),
        }
    }

    /// Creates a client configured from settings.
    #[must_use]
    pub fn from_settings(transport: Arc<dyn Transport>, settings: &ClientSettings) -> Self {
        Self::new(transport)
            .with_retry_policy(RetryPolicy::from(settings.retry()))
            .with_deadline(settings.call_timeout())
            .with_unknown_fields(settings.unknown_fields())
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the caller context sent with every `invoke` request.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the policy for undeclared keys in parameters and typed results.
    #[must_use]
    pub fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Calls the tool behind `stub`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::StaleManifest`] if the stub's process has published a
    ///   new manifest marker since the stub was built; nothing is sent.
    /// - [`ClientError::Validation`] if `params` do not match the stub's
    ///   parameter schema; nothing is sent.
    /// - [`ClientError::Remote`] if the process answered with an error.
    /// - [`ClientError::RetriesExhausted`] if every attempt hit a retryable
    ///   transport failure.
    /// - [`ClientError::Transport`] for non-retryable transport failures.
    pub async fn invoke(&self, stub: &ProxyStub, params: Value) -> ClientResult<Value> {
        let correlation_id = CorrelationId::random();
        trace_state(correlation_id, CallState::Idle);
        if let Err(err) = stub.ensure_current() {
            debug!(%correlation_id, error = %err, "refusing call through stale stub");
            trace_state(correlation_id, CallState::FatalFailure);
            trace_state(correlation_id, CallState::Terminal);
            return Err(err);
        }
        trace_state(correlation_id, CallState::Serializing);

        let params = match validate(&stub.spec().params_schema, &params, self.unknown_fields) {
            Ok(params) => params,
            Err(err) => {
                trace_state(correlation_id, CallState::FatalFailure);
                trace_state(correlation_id, CallState::Terminal);
                return Err(ClientError::Validation(err));
            }
        };

        let request = RpcRequest::invoke(stub.name(), params)
            .with_correlation_id(correlation_id)
            .with_context(self.context.clone());
        self.call(stub.endpoint(), request, correlation_id).await
    }

    /// Calls the tool with typed parameters and decodes the typed result.
    ///
    /// # Errors
    ///
    /// As [`InvocationClient::invoke`], plus [`ClientError::Codec`] when the
    /// parameters cannot be serialized or the result does not decode.
    pub async fn invoke_typed<P, R>(&self, stub: &ProxyStub, params: &P) -> ClientResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|err| {
            ClientError::Codec(CodecError::Encode {
                reason: err.to_string(),
            })
        })?;
        let result = self.invoke(stub, params).await?;
        Ok(decode(&stub.spec().result_schema, &result, self.unknown_fields)?)
    }

    /// Fetches the manifest of the process at `endpoint`.
    ///
    /// # Errors
    ///
    /// Same transport and remote outcomes as [`InvocationClient::invoke`];
    /// [`ClientError::Protocol`] if the manifest does not decode.
    pub async fn describe(&self, endpoint: &Endpoint) -> ClientResult<ToolsetManifest> {
        let correlation_id = CorrelationId::random();
        trace_state(correlation_id, CallState::Idle);
        let request = RpcRequest::describe_tools().with_correlation_id(correlation_id);
        let manifest = self.call(endpoint, request, correlation_id).await?;
        serde_json::from_value(manifest).map_err(|err| {
            ClientError::protocol(format!("malformed manifest from `{endpoint}`: {err}"))
        })
    }

    async fn call(
        &self,
        endpoint: &Endpoint,
        request: RpcRequest,
        correlation_id: CorrelationId,
    ) -> ClientResult<Value> {
        let max_attempts = self.retry.max_attempts().get();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            trace_state(correlation_id, CallState::Sent);
            let sent = timeout(self.deadline, self.transport.send(endpoint, &request)).await;
            let outcome = match sent {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::timeout(format!(
                    "no response within {} ms",
                    self.deadline.as_millis()
                ))),
            };

            let failure = match outcome {
                Ok(response) => {
                    return match response.into_result() {
                        Ok(value) => {
                            trace_state(correlation_id, CallState::Succeeded);
                            trace_state(correlation_id, CallState::Terminal);
                            Ok(value)
                        }
                        Err(body) => {
                            trace_state(correlation_id, CallState::FatalFailure);
                            trace_state(correlation_id, CallState::Terminal);
                            Err(ClientError::Remote {
                                kind: body.kind().clone(),
                                message: body.message().to_owned(),
                            })
                        }
                    };
                }
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                trace_state(correlation_id, CallState::FatalFailure);
                trace_state(correlation_id, CallState::Terminal);
                return Err(ClientError::Transport(failure));
            }

            if attempt >= max_attempts {
                warn!(
                    %correlation_id,
                    %endpoint,
                    attempts = attempt,
                    error = %failure,
                    "retry budget exhausted"
                );
                trace_state(correlation_id, CallState::FatalFailure);
                trace_state(correlation_id, CallState::Terminal);
                return Err(ClientError::RetriesExhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            trace_state(correlation_id, CallState::RecoverableFailure);
            let delay = self.retry.jittered_backoff(attempt - 1);
            warn!(
                %correlation_id,
                %endpoint,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "call failed; retrying"
            );
            sleep(delay).await;
        }
    }
}

fn trace_state(correlation_id: CorrelationId, state: CallState) {
    debug!(%correlation_id, state = ?state, "call state");
}
