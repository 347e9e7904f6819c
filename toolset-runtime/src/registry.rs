//! Registration-time catalogue of the tools a process exposes.
//!
//! Tools are declared on a [`ToolRegistryBuilder`] while the process starts.
//! [`ToolRegistryBuilder::build`] freezes the set into a [`ToolRegistry`],
//! which has no mutating methods and can be shared freely between tasks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use toolset_primitives::{ToolSpec, ToolsetManifest};
use toolset_schema::{Field, Record, Schema, SchemaError, check_fields, to_schema};

use crate::handler::{HandlerResult, ToolHandler, TypedHandler};

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

const MANIFEST_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A named tool: its declared parameter and result fields plus the handler
/// that executes it.
pub struct ToolDefinition {
    name: String,
    description: String,
    params: Vec<Field>,
    result: Vec<Field>,
    params_schema: Schema,
    result_schema: Schema,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Creates a definition from explicit field declarations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDefinition`] if the name is blank and
    /// [`RegistryError::Schema`] if either field list is malformed.
    pub fn new<H>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<Field>,
        result: Vec<Field>,
        handler: H,
    ) -> RegistryResult<Self>
    where
        H: ToolHandler + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition {
                reason: "tool name cannot be empty".into(),
            });
        }

        check_fields(&params)?;
        check_fields(&result)?;

        Ok(Self {
            params_schema: to_schema(&params),
            result_schema: to_schema(&result),
            name,
            description: description.into(),
            params,
            result,
            handler: Arc::new(handler),
        })
    }

    /// Creates a definition whose fields come from the [`Record`]
    /// declarations of its parameter and result types.
    ///
    /// # Errors
    ///
    /// Same as [`ToolDefinition::new`].
    pub fn typed<P, R, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> RegistryResult<Self>
    where
        P: Record + DeserializeOwned + Send + 'static,
        R: Record + Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            P::fields(),
            R::fields(),
            TypedHandler::<P, R, F>::new(handler),
        )
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the documentation string.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the declared parameter fields.
    #[must_use]
    pub fn params(&self) -> &[Field] {
        &self.params
    }

    /// Returns the declared result fields.
    #[must_use]
    pub fn result(&self) -> &[Field] {
        &self.result
    }

    /// Returns the derived parameter schema.
    #[must_use]
    pub fn params_schema(&self) -> &Schema {
        &self.params_schema
    }

    /// Returns the derived result schema.
    #[must_use]
    pub fn result_schema(&self) -> &Schema {
        &self.result_schema
    }

    /// Builds the introspection record for this tool.
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            doc: self.description.clone(),
            params_schema: self.params_schema.clone(),
            result_schema: self.result_schema.clone(),
        }
    }

    pub(crate) async fn execute(&self, params: Value) -> HandlerResult {
        self.handler.call(params).await
    }
}

/// Mutable registration phase of a [`ToolRegistry`].
#[derive(Debug)]
pub struct ToolRegistryBuilder {
    toolset: String,
    toolset_version: String,
    tools: Vec<Arc<ToolDefinition>>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is already taken;
    /// the builder is left unchanged in that case.
    pub fn register(&mut self, definition: ToolDefinition) -> RegistryResult<&mut Self> {
        if self.index.contains_key(definition.name()) {
            return Err(RegistryError::DuplicateName {
                name: definition.name().to_owned(),
            });
        }

        self.index
            .insert(definition.name().to_owned(), self.tools.len());
        self.tools.push(Arc::new(definition));
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        let specs = self.tools.iter().map(|tool| tool.spec()).collect();
        ToolRegistry {
            toolset: self.toolset,
            toolset_version: self.toolset_version,
            manifest_version: Utc::now().format(MANIFEST_TIMESTAMP_FORMAT).to_string(),
            tools: self.tools,
            index: self.index,
            specs,
        }
    }
}

/// Frozen, name-indexed set of tool definitions.
#[derive(Debug)]
pub struct ToolRegistry {
    toolset: String,
    toolset_version: String,
    manifest_version: String,
    tools: Vec<Arc<ToolDefinition>>,
    index: HashMap<String, usize>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Starts a registry for the named toolset.
    #[must_use]
    pub fn builder(
        toolset: impl Into<String>,
        toolset_version: impl Into<String>,
    ) -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            toolset: toolset.into(),
            toolset_version: toolset_version.into(),
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the toolset name.
    #[must_use]
    pub fn toolset(&self) -> &str {
        &self.toolset
    }

    /// Returns the toolset build version.
    #[must_use]
    pub fn toolset_version(&self) -> &str {
        &self.toolset_version
    }

    /// Returns one introspection record per tool, in registration order.
    #[must_use]
    pub fn describe(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Returns the `describe_tools` payload.
    #[must_use]
    pub fn manifest(&self) -> ToolsetManifest {
        ToolsetManifest {
            toolset: self.toolset.clone(),
            toolset_version: self.toolset_version.clone(),
            manifest_version: self.manifest_version.clone(),
            tools: self.specs.clone(),
        }
    }

    /// Looks up a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownMethod`] if no tool has that name.
    pub fn resolve(&self, name: &str) -> RegistryResult<&Arc<ToolDefinition>> {
        self.index
            .get(name)
            .map(|&position| &self.tools[position])
            .ok_or_else(|| RegistryError::UnknownMethod {
                name: name.to_owned(),
            })
    }

    /// Returns tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name())
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Errors produced by tool registration and lookup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Tool definition failed validation.
    #[error("invalid tool definition: {reason}")]
    InvalidDefinition {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Field declarations were malformed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    DuplicateName {
        /// Name of the offending tool.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("unknown method `{name}`")]
    UnknownMethod {
        /// Name that failed to resolve.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;
    use toolset_schema::FieldType;

    use crate::handler::HandlerError;

    fn echo(name: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "Echo the message back",
            vec![Field::required("message", FieldType::string())],
            vec![Field::required("message", FieldType::string())],
            |params: Value| async move { Ok::<_, HandlerError>(params) },
        )
        .unwrap()
    }

    #[derive(Deserialize)]
    struct AddParams {
        x: f64,
        y: f64,
    }

    impl Record for AddParams {
        fn fields() -> Vec<Field> {
            vec![
                Field::required("x", FieldType::number()),
                Field::required("y", FieldType::number()),
            ]
        }
    }

    #[derive(Serialize)]
    struct Sum {
        value: f64,
    }

    impl Record for Sum {
        fn fields() -> Vec<Field> {
            vec![Field::required("value", FieldType::number())]
        }
    }

    #[test]
    fn duplicate_registration_leaves_registry_unchanged() {
        let mut builder = ToolRegistry::builder("demo", "0.1.0");
        builder.register(echo("a")).unwrap();
        builder.register(echo("b")).unwrap();

        let err = builder.register(echo("a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { name } if name == "a"));

        let registry = builder.build();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn describe_preserves_registration_order() {
        let mut builder = ToolRegistry::builder("demo", "0.1.0");
        for name in ["zeta", "alpha", "mid"] {
            builder.register(echo(name)).unwrap();
        }
        let registry = builder.build();

        let names: Vec<_> = registry.describe().iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.describe(), registry.describe());
        assert_eq!(registry.manifest(), registry.manifest());
    }

    #[test]
    fn resolve_reports_unknown_method() {
        let mut builder = ToolRegistry::builder("demo", "0.1.0");
        builder.register(echo("echo")).unwrap();
        let registry = builder.build();

        assert_eq!(registry.resolve("echo").unwrap().name(), "echo");
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMethod { name } if name == "missing"));
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        let err = ToolDefinition::new("", "", vec![], vec![], |v: Value| async move {
            Ok::<_, HandlerError>(v)
        })
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition { .. }));

        let err = ToolDefinition::new(
            "dup",
            "",
            vec![
                Field::required("x", FieldType::number()),
                Field::required("x", FieldType::string()),
            ],
            vec![],
            |v: Value| async move { Ok::<_, HandlerError>(v) },
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Schema(_)));
    }

    #[tokio::test]
    async fn typed_definitions_derive_schemas() {
        let definition = ToolDefinition::typed("add", "Add two numbers", |p: AddParams| async move {
            Ok(Sum { value: p.x + p.y })
        })
        .unwrap();

        assert!(definition.params_schema().is_required("x"));
        assert_eq!(definition.result_schema().properties().len(), 1);

        let output = definition.execute(json!({"x": 2.0, "y": 3.0})).await.unwrap();
        assert_eq!(output, json!({"value": 5.0}));
    }
}
