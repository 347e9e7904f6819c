//! Server side of a toolforest tool process.
//!
//! A process declares its tools on a [`ToolRegistryBuilder`] during start-up,
//! freezes the result into a [`ToolRegistry`], and hands it to a
//! [`RequestDispatcher`] which answers `describe_tools` and `invoke`
//! envelopes. [`HttpServer`] exposes the dispatcher over HTTP. Handlers read
//! the caller's [`RequestContext`](toolset_primitives::RequestContext) with
//! [`current_context`].

#![warn(missing_docs, clippy::pedantic)]

mod context;
mod dispatcher;
mod handler;
mod registry;
mod server;

pub use context::{current_context, current_user_jwt};
pub use dispatcher::{
    DispatchObserver, DispatchOptions, DispatchRecord, DispatchStage, RequestDispatcher,
    TracingDispatchObserver,
};
pub use handler::{HandlerError, HandlerResult, ToolHandler};
pub use registry::{
    RegistryError, RegistryResult, ToolDefinition, ToolRegistry, ToolRegistryBuilder,
};
pub use server::{DEFAULT_MAX_BODY_BYTES, HttpServer, ServerError, ServerResult};
