//! Settings for toolforest tool processes and callers.
//!
//! Settings are read from an optional JSON document, overridden from the
//! process environment, and validated before use.

#![warn(missing_docs, clippy::pedantic)]

mod loader;
mod settings;

pub use loader::{load_client_settings, load_server_settings};
pub use settings::{ClientSettings, RetrySettings, ServerSettings};
