//! Strongly typed settings for tool processes and callers.

use std::net::{Ipv4Addr, SocketAddr};
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use toolset_primitives::Environment;
use toolset_schema::UnknownFields;

const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_PORT: u16 = 8700;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Settings for a process serving a toolset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub(crate) environment: String,
    pub(crate) bind: SocketAddr,
    pub(crate) unknown_fields: UnknownFields,
    pub(crate) max_in_flight: NonZeroUsize,
    pub(crate) max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.into(),
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            unknown_fields: UnknownFields::Reject,
            max_in_flight: NonZeroUsize::MIN,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerSettings {
    /// Environment the process is deployed into.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured tag is not a valid environment.
    pub fn environment(&self) -> Result<Environment> {
        Environment::new(self.environment.as_str())
            .with_context(|| format!("invalid environment `{}`", self.environment))
    }

    /// Address the HTTP listener binds to.
    #[must_use]
    pub fn bind(&self) -> SocketAddr {
        self.bind
    }

    /// Overrides the bind address.
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Policy for parameter keys a tool does not declare.
    #[must_use]
    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    /// Number of handlers allowed to run at once.
    #[must_use]
    pub fn max_in_flight(&self) -> NonZeroUsize {
        self.max_in_flight
    }

    /// Largest request body the listener accepts, in bytes.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.environment()?;
        ensure!(self.max_body_bytes > 0, "max_body_bytes must be positive");
        Ok(())
    }
}

/// Retry behaviour for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub(crate) max_attempts: NonZeroU32,
    pub(crate) initial_backoff_ms: u64,
    pub(crate) max_backoff_ms: u64,
    pub(crate) multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Total attempts per call, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Upper bound on any single delay.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Growth factor applied after each failed attempt.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the backoff bounds are inverted or the multiplier
    /// would shrink delays.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.initial_backoff_ms <= self.max_backoff_ms,
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms"
        );
        ensure!(
            self.multiplier.is_finite() && self.multiplier >= 1.0,
            "retry.multiplier must be a finite value >= 1.0"
        );
        Ok(())
    }
}

/// Settings for a caller that discovers and invokes tool processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    pub(crate) environment: String,
    pub(crate) registry_root: PathBuf,
    pub(crate) cache_ttl_secs: u64,
    pub(crate) refresh_interval_secs: Option<u64>,
    pub(crate) call_timeout_ms: u64,
    pub(crate) unknown_fields: UnknownFields,
    pub(crate) retry: RetrySettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.into(),
            registry_root: PathBuf::from("registry"),
            cache_ttl_secs: 60,
            refresh_interval_secs: None,
            call_timeout_ms: 10_000,
            unknown_fields: UnknownFields::Reject,
            retry: RetrySettings::default(),
        }
    }
}

impl ClientSettings {
    /// Environment whose toolsets are discovered.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured tag is not a valid environment.
    pub fn environment(&self) -> Result<Environment> {
        Environment::new(self.environment.as_str())
            .with_context(|| format!("invalid environment `{}`", self.environment))
    }

    /// Root directory of the file-backed registry.
    #[must_use]
    pub fn registry_root(&self) -> &Path {
        &self.registry_root
    }

    /// How long a discovery listing stays fresh.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Background refresh period, if enabled.
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }

    /// Per-attempt deadline for remote calls.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Policy for result keys a tool does not declare.
    #[must_use]
    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    /// Retry behaviour.
    #[must_use]
    pub fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.environment()?;
        ensure!(self.cache_ttl_secs > 0, "cache_ttl_secs must be greater than 0");
        ensure!(self.call_timeout_ms > 0, "call_timeout_ms must be greater than 0");
        if let Some(interval) = self.refresh_interval_secs {
            ensure!(interval > 0, "refresh_interval_secs must be greater than 0");
        }
        self.retry.validate()
    }
}
