//! HTTP binding for a [`RequestDispatcher`].
//!
//! `POST /` carries one JSON request envelope and always answers `200` with a
//! JSON response envelope. Any other method gets `405`; bodies larger than
//! the configured limit get `413`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use hyper::body::HttpBody;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatcher::RequestDispatcher;

/// Default cap on request body size.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while binding or running the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying hyper error.
        source: hyper::Error,
    },

    /// The server loop terminated with an error.
    #[error("server error: {0}")]
    Serve(#[from] hyper::Error),
}

/// HTTP listener bound to a local address.
#[derive(Debug)]
pub struct HttpServer {
    dispatcher: Arc<RequestDispatcher>,
    incoming: AddrIncoming,
    local_addr: SocketAddr,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Binds a listener. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub fn bind(dispatcher: Arc<RequestDispatcher>, addr: SocketAddr) -> ServerResult<Self> {
        let incoming =
            AddrIncoming::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = incoming.local_addr();
        Ok(Self {
            dispatcher,
            incoming,
            local_addr,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Sets the largest request body accepted.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Returns the bound address; useful when binding port `0`.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves requests until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] if the listener fails.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves requests until `signal` resolves, then drains open connections.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] if the listener fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher;
        let limit = self.max_body_bytes;
        let make_service = make_service_fn(move |_conn| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    route(Arc::clone(&dispatcher), request, limit)
                }))
            }
        });

        info!(addr = %self.local_addr, "tool process listening");
        Server::builder(self.incoming)
            .serve(make_service)
            .with_graceful_shutdown(signal)
            .await?;
        info!(addr = %self.local_addr, "tool process stopped");
        Ok(())
    }
}

async fn route(
    dispatcher: Arc<RequestDispatcher>,
    request: Request<Body>,
    limit: usize,
) -> Result<Response<Body>, Infallible> {
    if request.method() != Method::POST || request.uri().path() != "/" {
        debug!(method = %request.method(), path = request.uri().path(), "rejecting request");
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED));
    }

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|length| length > limit) {
        debug!(?declared, limit, "rejecting oversized request");
        return Ok(status(StatusCode::PAYLOAD_TOO_LARGE));
    }

    let body = match read_body(request.into_body(), limit).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            debug!(limit, "request body exceeded the limit");
            return Ok(status(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return Ok(status(StatusCode::BAD_REQUEST));
        }
    };

    let payload = dispatcher.handle_bytes(&body).await;
    Ok(json(Bytes::from(payload)))
}

/// Collects the body, or `None` once it grows past `limit`.
async fn read_body(mut body: Body, limit: usize) -> Result<Option<Bytes>, hyper::Error> {
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if collected.len() + chunk.len() > limit {
            return Ok(None);
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Some(collected.freeze()))
}

fn json(payload: Bytes) -> Response<Body> {
    let mut response = Response::new(Body::from(payload));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    if code == StatusCode::METHOD_NOT_ALLOWED {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::Client;
    use serde_json::{Value, json};
    use tokio::sync::oneshot;
    use toolset_schema::{Field, FieldType};

    use crate::handler::HandlerError;
    use crate::registry::{ToolDefinition, ToolRegistry};

    fn dispatcher() -> Arc<RequestDispatcher> {
        let mut builder = ToolRegistry::builder("echo", "0.1.0");
        builder
            .register(
                ToolDefinition::new(
                    "echo",
                    "Echo the message",
                    vec![Field::required("message", FieldType::string())],
                    vec![Field::required("message", FieldType::string())],
                    |params: Value| async move { Ok::<_, HandlerError>(params) },
                )
                .unwrap(),
            )
            .unwrap();
        Arc::new(RequestDispatcher::new(Arc::new(builder.build())))
    }

    #[tokio::test]
    async fn serves_envelopes_over_http() {
        let server = HttpServer::bind(dispatcher(), ([127, 0, 0, 1], 0).into()).unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = stopped.await;
        }));

        let client = Client::new();
        let request = Request::post(format!("http://{addr}/"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"action": "invoke", "method": "echo", "params": {"message": "hi"}})
                    .to_string(),
            ))
            .unwrap();
        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"result": {"message": "hi"}}));

        let response = client
            .get(format!("http://{addr}/").parse().unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let server = HttpServer::bind(dispatcher(), ([127, 0, 0, 1], 0).into())
            .unwrap()
            .with_max_body_bytes(64);
        let addr = server.local_addr();
        let task = tokio::spawn(server.serve());

        let client = Client::new();
        let envelope = json!({
            "action": "invoke",
            "method": "echo",
            "params": {"message": "x".repeat(128)}
        });
        let request = Request::post(format!("http://{addr}/"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(envelope.to_string()))
            .unwrap();
        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (mut sender, body) = Body::channel();
        let request = Request::post(format!("http://{addr}/"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let pending = tokio::spawn(client.request(request));
        for _ in 0..4 {
            if sender.send_data(Bytes::from(vec![b' '; 32])).await.is_err() {
                break;
            }
        }
        drop(sender);
        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        task.abort();
    }
}
