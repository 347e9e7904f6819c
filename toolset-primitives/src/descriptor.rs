//! Registry entries advertising deployed tool processes.
//!
//! Descriptors are written by the deployment pipeline and only ever read by
//! the runtime. Documents produced by the pipeline use `alias`, `alias_arn`,
//! and `manifest_version` for the environment, endpoint, and marker; both
//! spellings are accepted on input, and `lambda_function_arn` stands in for a
//! missing or blank endpoint. Decoded documents pass the same checks as the
//! builder.

use std::fmt::{self, Display, Formatter};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::ids::{Environment, validate_identifier};

/// Opaque address of a tool process, resolved by the transport.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Creates an endpoint reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when the reference is blank.
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(Error::InvalidDescriptor {
                reason: "endpoint cannot be empty".into(),
            });
        }
        Ok(Self(reference))
    }

    /// Returns the raw reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version or timestamp stamped on a registry entry at publish time.
///
/// Markers are only compared for equality; a different marker means any
/// proxies built against the old one are stale.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestMarker(String);

impl ManifestMarker {
    /// Wraps a marker string.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Returns the raw marker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ManifestMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a registry entry: unique per (environment, process name).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DescriptorKey {
    environment: Environment,
    name: String,
}

impl DescriptorKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(environment: Environment, name: impl Into<String>) -> Self {
        Self {
            environment,
            name: name.into(),
        }
    }

    /// Returns the environment component.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Returns the process name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for DescriptorKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.name)
    }
}

/// Registry entry describing one deployed tool process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorDocument")]
pub struct ToolProcessDescriptor {
    name: String,
    environment: Environment,
    endpoint: Endpoint,
    version: u64,
    manifest_marker: ManifestMarker,
    #[serde(skip_serializing_if = "Option::is_none")]
    toolset_id: Option<String>,
}

/// Wire form of a descriptor before validation.
#[derive(Deserialize)]
struct DescriptorDocument {
    name: String,
    #[serde(alias = "alias")]
    environment: String,
    #[serde(default, alias = "alias_arn")]
    endpoint: Option<String>,
    #[serde(default)]
    lambda_function_arn: Option<String>,
    #[serde(deserialize_with = "deserialize_version")]
    version: u64,
    #[serde(default, alias = "manifest_version")]
    manifest_marker: String,
    #[serde(default)]
    toolset_id: Option<String>,
}

impl TryFrom<DescriptorDocument> for ToolProcessDescriptor {
    type Error = Error;

    fn try_from(document: DescriptorDocument) -> Result<Self> {
        let endpoint = document
            .endpoint
            .filter(|endpoint| !endpoint.trim().is_empty())
            .or(document.lambda_function_arn)
            .unwrap_or_default();

        let mut builder = ToolProcessDescriptor::builder(Environment::new(document.environment)?)
            .name(document.name)?
            .endpoint(endpoint)?
            .version(document.version)
            .manifest_marker(document.manifest_marker);
        if let Some(toolset_id) = document.toolset_id {
            builder = builder.toolset_id(toolset_id);
        }
        builder.build()
    }
}

impl ToolProcessDescriptor {
    /// Starts building a descriptor for the given environment.
    #[must_use]
    pub fn builder(environment: Environment) -> ToolProcessDescriptorBuilder {
        ToolProcessDescriptorBuilder {
            environment,
            name: None,
            endpoint: None,
            version: 0,
            manifest_marker: ManifestMarker::default(),
            toolset_id: None,
        }
    }

    /// Returns the process (toolset) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the environment tag.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Returns the endpoint reference.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the published version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the manifest marker.
    #[must_use]
    pub fn manifest_marker(&self) -> &ManifestMarker {
        &self.manifest_marker
    }

    /// Returns the deployment-assigned toolset identifier, if any.
    #[must_use]
    pub fn toolset_id(&self) -> Option<&str> {
        self.toolset_id.as_deref()
    }

    /// Returns the (environment, name) identity of this entry.
    #[must_use]
    pub fn key(&self) -> DescriptorKey {
        DescriptorKey::new(self.environment.clone(), self.name.clone())
    }
}

/// Builder for [`ToolProcessDescriptor`].
#[derive(Debug)]
pub struct ToolProcessDescriptorBuilder {
    environment: Environment,
    name: Option<String>,
    endpoint: Option<Endpoint>,
    version: u64,
    manifest_marker: ManifestMarker,
    toolset_id: Option<String>,
}

impl ToolProcessDescriptorBuilder {
    /// Sets the process name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] when the name is not a valid
    /// identifier.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the endpoint reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when the reference is blank.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Result<Self> {
        self.endpoint = Some(Endpoint::new(endpoint)?);
        Ok(self)
    }

    /// Sets the published version.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Sets the manifest marker.
    #[must_use]
    pub fn manifest_marker(mut self, marker: impl Into<String>) -> Self {
        self.manifest_marker = ManifestMarker::new(marker);
        self
    }

    /// Sets the deployment-assigned toolset identifier.
    #[must_use]
    pub fn toolset_id(mut self, toolset_id: impl Into<String>) -> Self {
        self.toolset_id = Some(toolset_id.into());
        self
    }

    /// Consumes the builder and returns the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if the name or endpoint is missing.
    pub fn build(self) -> Result<ToolProcessDescriptor> {
        let name = self.name.ok_or_else(|| Error::InvalidDescriptor {
            reason: "descriptor name must be provided".into(),
        })?;
        let endpoint = self.endpoint.ok_or_else(|| Error::InvalidDescriptor {
            reason: "descriptor endpoint must be provided".into(),
        })?;

        Ok(ToolProcessDescriptor {
            name,
            environment: self.environment,
            endpoint,
            version: self.version,
            manifest_marker: self.manifest_marker,
            toolset_id: self.toolset_id,
        })
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawVersion {
        Number(u64),
        Text(String),
    }

    match RawVersion::deserialize(deserializer)? {
        RawVersion::Number(version) => Ok(version),
        RawVersion::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("version `{text}` is not numeric"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dev() -> Environment {
        Environment::new("dev").unwrap()
    }

    #[test]
    fn builds_descriptor() {
        let descriptor = ToolProcessDescriptor::builder(dev())
            .name("math")
            .unwrap()
            .endpoint("http://127.0.0.1:9000/")
            .unwrap()
            .version(3)
            .manifest_marker("2025-01-01T00:00:00Z")
            .build()
            .unwrap();

        assert_eq!(descriptor.name(), "math");
        assert_eq!(descriptor.version(), 3);
        assert_eq!(descriptor.key().to_string(), "dev/math");
        assert_eq!(descriptor.manifest_marker().as_str(), "2025-01-01T00:00:00Z");
    }

    #[test]
    fn endpoint_is_required() {
        let result = ToolProcessDescriptor::builder(dev())
            .name("math")
            .unwrap()
            .build();
        assert!(matches!(result, Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn accepts_pipeline_document_spelling() {
        let document = json!({
            "toolset_id": "ts-math",
            "name": "math",
            "alias": "dev",
            "alias_arn": "arn:aws:lambda:us-east-1:123:function:math:dev",
            "version": "7",
            "manifest_version": ""
        });

        let descriptor: ToolProcessDescriptor = serde_json::from_value(document).unwrap();
        assert_eq!(descriptor.environment(), &dev());
        assert_eq!(descriptor.version(), 7);
        assert_eq!(descriptor.toolset_id(), Some("ts-math"));
        assert!(descriptor.endpoint().as_str().ends_with("math:dev"));
    }

    #[test]
    fn function_arn_backs_up_a_blank_endpoint() {
        let document = json!({
            "name": "math",
            "alias": "dev",
            "alias_arn": "",
            "lambda_function_arn": "arn:aws:lambda:us-east-1:123:function:math",
            "version": 1
        });
        let descriptor: ToolProcessDescriptor = serde_json::from_value(document).unwrap();
        assert!(descriptor.endpoint().as_str().ends_with("function:math"));

        let round_trip: ToolProcessDescriptor =
            serde_json::from_value(serde_json::to_value(&descriptor).unwrap()).unwrap();
        assert_eq!(round_trip, descriptor);
    }

    #[test]
    fn decoded_documents_are_validated() {
        let blank_endpoint = json!({"name": "math", "environment": "dev", "endpoint": " ", "version": 1});
        assert!(serde_json::from_value::<ToolProcessDescriptor>(blank_endpoint).is_err());

        let bad_name = json!({"name": "Math Tools", "environment": "dev", "endpoint": "local://m", "version": 1});
        assert!(serde_json::from_value::<ToolProcessDescriptor>(bad_name).is_err());

        let bad_environment = json!({"name": "math", "environment": "", "endpoint": "local://m", "version": 1});
        assert!(serde_json::from_value::<ToolProcessDescriptor>(bad_environment).is_err());
    }
}
