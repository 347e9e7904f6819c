//! HTTP transport backed by hyper.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use toolset_primitives::{Endpoint, RpcRequest, RpcResponse};
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::error::TransportError;
use crate::transport::Transport;

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Sends envelopes as `POST` requests to `http://` or `https://` endpoints.
#[derive(Clone)]
pub struct HttpTransport {
    client: HyperClient,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport trusting the bundled web PKI roots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: build_https_client(),
        }
    }
}

fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));
    Client::builder().build::<_, Body>(connector)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &RpcRequest,
    ) -> Result<RpcResponse, TransportError> {
        let uri: Uri = endpoint.as_str().parse().map_err(|err| {
            TransportError::protocol(format!("endpoint `{endpoint}` is not a URI: {err}"))
        })?;
        let body = serde_json::to_vec(request)
            .map_err(|err| TransportError::protocol(format!("failed to encode request: {err}")))?;
        let req = Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| TransportError::protocol(format!("failed to build request: {err}")))?;

        let response = self.client.request(req).await.map_err(classify)?;
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            TransportError::connection(format!("failed to read response body: {err}"))
        })?;
        debug!(%endpoint, %status, bytes = bytes.len(), "received response");

        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                return Err(TransportError::throttled(format!(
                    "`{endpoint}` answered {status}"
                )));
            }
            status if !status.is_success() => {
                return Err(TransportError::protocol(format!(
                    "`{endpoint}` answered {status}"
                )));
            }
            _ => {}
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::protocol(format!("malformed response envelope: {err}")))
    }
}

fn classify(err: hyper::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else {
        TransportError::connection(err.to_string())
    }
}
