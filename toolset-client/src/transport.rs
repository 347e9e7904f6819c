//! Envelope transports.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use toolset_primitives::{Endpoint, RpcRequest, RpcResponse};
use toolset_runtime::RequestDispatcher;

use crate::error::TransportError;

/// Moves one request envelope to a tool process and returns its response.
///
/// Implementations classify failures with
/// [`TransportErrorKind`](crate::TransportErrorKind); the invocation client
/// decides whether to retry from that classification alone.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and awaits the response envelope.
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
    ) -> Result<RpcResponse, TransportError>;
}

/// Routes endpoints to dispatchers living in the same process.
///
/// Requests still travel as serialized JSON so the wire format is exercised
/// exactly as it would be over the network.
#[derive(Clone, Default)]
pub struct LocalTransport {
    routes: HashMap<Endpoint, Arc<RequestDispatcher>>,
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("endpoints", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalTransport {
    /// Creates a transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts a dispatcher at the endpoint, replacing any previous one.
    pub fn mount(&mut self, endpoint: Endpoint, dispatcher: Arc<RequestDispatcher>) {
        self.routes.insert(endpoint, dispatcher);
    }

    /// Mounts a dispatcher, returning the transport for chaining.
    #[must_use]
    pub fn with_route(mut self, endpoint: Endpoint, dispatcher: Arc<RequestDispatcher>) -> Self {
        self.mount(endpoint, dispatcher);
        self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
    ) -> Result<RpcResponse, TransportError> {
        let dispatcher = self.routes.get(endpoint).ok_or_else(|| {
            TransportError::connection(format!("no tool process mounted at `{endpoint}`"))
        })?;

        let raw = serde_json::to_vec(request)
            .map_err(|err| TransportError::protocol(format!("failed to encode request: {err}")))?;
        let response = dispatcher.handle_bytes(&raw).await;
        serde_json::from_slice(&response)
            .map_err(|err| TransportError::protocol(format!("malformed response envelope: {err}")))
    }
}
