//! Loading settings from JSON files and environment variables.
//!
//! Recognised variables:
//! - `TOOLFOREST_ENV` (falling back to `ENV`): environment tag
//! - `TOOLFOREST_BIND`: listener address for tool processes
//! - `TOOLFOREST_REGISTRY_ROOT`: root of the file-backed registry
//! - `TOOLFOREST_CALL_TIMEOUT_MS`: per-attempt call deadline
//! - `TOOLFOREST_MAX_ATTEMPTS`: attempts per call

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::settings::{ClientSettings, ServerSettings};

const ENV_ENVIRONMENT: &str = "TOOLFOREST_ENV";
const ENV_ENVIRONMENT_FALLBACK: &str = "ENV";
const ENV_BIND: &str = "TOOLFOREST_BIND";
const ENV_REGISTRY_ROOT: &str = "TOOLFOREST_REGISTRY_ROOT";
const ENV_CALL_TIMEOUT: &str = "TOOLFOREST_CALL_TIMEOUT_MS";
const ENV_MAX_ATTEMPTS: &str = "TOOLFOREST_MAX_ATTEMPTS";

/// Loads server settings from an optional JSON file, then applies
/// process environment overrides and validates the result.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, an override is
/// malformed, or validation fails.
pub fn load_server_settings(path: Option<&Path>) -> Result<ServerSettings> {
    let mut settings: ServerSettings = read_or_default(path)?;
    apply_server_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

/// Loads client settings from an optional JSON file, then applies
/// process environment overrides and validates the result.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, an override is
/// malformed, or validation fails.
pub fn load_client_settings(path: Option<&Path>) -> Result<ClientSettings> {
    let mut settings: ClientSettings = read_or_default(path)?;
    apply_client_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

fn read_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    debug!(path = %path.display(), "loaded settings file");
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))
}

pub(crate) fn apply_server_overrides<F>(settings: &mut ServerSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(environment) = environment_override(&lookup) {
        settings.environment = environment;
    }
    if let Some(bind) = lookup(ENV_BIND) {
        settings.bind = bind
            .parse()
            .with_context(|| format!("{ENV_BIND} is not a socket address: `{bind}`"))?;
    }
    Ok(())
}

pub(crate) fn apply_client_overrides<F>(settings: &mut ClientSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(environment) = environment_override(&lookup) {
        settings.environment = environment;
    }
    if let Some(root) = lookup(ENV_REGISTRY_ROOT) {
        settings.registry_root = PathBuf::from(root);
    }
    if let Some(timeout) = lookup(ENV_CALL_TIMEOUT) {
        settings.call_timeout_ms = timeout
            .parse()
            .with_context(|| format!("{ENV_CALL_TIMEOUT} is not an integer: `{timeout}`"))?;
    }
    if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
        settings.retry.max_attempts = attempts.parse().with_context(|| {
            format!("{ENV_MAX_ATTEMPTS} is not a positive integer: `{attempts}`")
        })?;
    }
    Ok(())
}

fn environment_override<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_ENVIRONMENT).or_else(|| lookup(ENV_ENVIRONMENT_FALLBACK))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn environment_prefers_namespaced_variable() {
        let mut settings = ClientSettings::default();
        apply_client_overrides(
            &mut settings,
            lookup(&[("ENV", "staging"), ("TOOLFOREST_ENV", "prod")]),
        )
        .unwrap();
        assert_eq!(settings.environment().unwrap().as_str(), "prod");

        let mut settings = ClientSettings::default();
        apply_client_overrides(&mut settings, lookup(&[("ENV", "staging")])).unwrap();
        assert_eq!(settings.environment().unwrap().as_str(), "staging");
    }

    #[test]
    fn client_overrides_apply() {
        let mut settings = ClientSettings::default();
        apply_client_overrides(
            &mut settings,
            lookup(&[
                ("TOOLFOREST_REGISTRY_ROOT", "/srv/registry"),
                ("TOOLFOREST_CALL_TIMEOUT_MS", "250"),
                ("TOOLFOREST_MAX_ATTEMPTS", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.registry_root(), Path::new("/srv/registry"));
        assert_eq!(settings.call_timeout(), Duration::from_millis(250));
        assert_eq!(settings.retry().max_attempts().get(), 1);

        let mut settings = ClientSettings::default();
        assert!(
            apply_client_overrides(&mut settings, lookup(&[("TOOLFOREST_MAX_ATTEMPTS", "0")]))
                .is_err()
        );
    }

    #[test]
    fn server_bind_override() {
        let mut settings = ServerSettings::default();
        apply_server_overrides(&mut settings, lookup(&[("TOOLFOREST_BIND", "0.0.0.0:9000")]))
            .unwrap();
        assert_eq!(settings.bind().port(), 9000);

        assert!(
            apply_server_overrides(&mut settings, lookup(&[("TOOLFOREST_BIND", "nowhere")]))
                .is_err()
        );
    }

    #[test]
    fn reads_settings_file() {
        let path = std::env::temp_dir().join(format!("toolforest-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{"bind": "127.0.0.1:0", "max_in_flight": 4}"#).unwrap();

        let settings: ServerSettings = read_or_default(Some(&path)).unwrap();
        assert_eq!(settings.max_in_flight().get(), 4);
        assert_eq!(settings.bind().port(), 0);

        fs::remove_file(&path).unwrap();
        assert!(read_or_default::<ServerSettings>(Some(&path)).is_err());
        assert_eq!(
            read_or_default::<ServerSettings>(None).unwrap(),
            ServerSettings::default()
        );
    }
}
