//! Remote tool invocation facade.
//!
//! Depend on this crate to get the server runtime, the discovery and proxy
//! client, configuration loading and logging setup in one place. Each piece
//! sits behind a feature flag so tool processes and callers can pull in only
//! what they use.

#![warn(missing_docs, clippy::pedantic)]

/// Field declarations, schemas, and the validating codec.
pub use toolset_schema as schema;

/// Wire envelopes, descriptors, and identifiers.
pub use toolset_primitives as primitives;

/// Tool registry, dispatcher, and HTTP server (enabled by `runtime` feature).
#[cfg(feature = "runtime")]
pub use toolset_runtime as runtime;

/// Discovery, proxy stubs, and invocation (enabled by `client` feature).
#[cfg(feature = "client")]
pub use toolset_client as client;

/// Settings files and environment overrides (enabled by `config` feature).
#[cfg(feature = "config")]
pub use toolset_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use toolset_telemetry as telemetry;
