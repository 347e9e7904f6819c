//! Observability setup shared by toolforest binaries.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    default_directive: String,
    show_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: DEFAULT_DIRECTIVE.into(),
            show_target: false,
        }
    }
}

impl TelemetryConfig {
    /// Sets the filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Toggles display of event targets.
    #[must_use]
    pub fn with_target(mut self, show_target: bool) -> Self {
        self.show_target = show_target;
        self
    }

    /// Returns the fallback filter directive.
    #[must_use]
    pub fn default_directive(&self) -> &str {
        &self.default_directive
    }

    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_directive)
                .with_context(|| format!("invalid log directive `{}`", self.default_directive)),
        }
    }
}

/// Installs the global fmt subscriber writing to stderr, leaving stdout to
/// command output.
///
/// # Errors
///
/// Returns an error if the fallback directive does not parse or a global
/// subscriber is already installed.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = config.filter()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
