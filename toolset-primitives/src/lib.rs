//! Core shared types for toolforest tool processes and their callers.

#![warn(missing_docs, clippy::pedantic)]

mod context;
mod descriptor;
mod envelope;
mod error;
mod ids;

/// Caller context attached to requests.
pub use context::{RequestContext, is_jwt_format};
/// Registry entries describing deployed tool processes.
pub use descriptor::{
    DescriptorKey, Endpoint, ManifestMarker, ToolProcessDescriptor,
    ToolProcessDescriptorBuilder,
};
/// Request and response envelopes exchanged with tool processes.
pub use envelope::{ErrorKind, RpcAction, RpcErrorBody, RpcRequest, RpcResponse, ToolSpec, ToolsetManifest};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers carried across process boundaries.
pub use ids::{CorrelationId, Environment};
