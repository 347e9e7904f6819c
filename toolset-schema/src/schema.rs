//! Structural schema representation exchanged in tool manifests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural description of a value.
///
/// Object properties are kept as an ordered list so that declaration order
/// survives a round trip through JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    /// UTF-8 text.
    String,
    /// Any JSON number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// The inner schema, or `null`.
    Nullable {
        /// Schema applied to non-null values.
        inner: Box<Schema>,
    },
    /// Record with named properties.
    Object {
        /// Properties in declaration order.
        properties: Vec<Property>,
        /// Names of properties callers must supply.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
    /// Ordered list of items.
    Array {
        /// Schema applied to every item.
        items: Box<Schema>,
    },
    /// Closed set of string values.
    Enum {
        /// Permitted values.
        values: Vec<String>,
    },
}

impl Schema {
    /// Returns the JSON-level type label used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Nullable { .. } => "nullable",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
            Self::Enum { .. } => "enum",
        }
    }

    /// Returns the object properties, or an empty slice for other schemas.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        match self {
            Self::Object { properties, .. } => properties,
            _ => &[],
        }
    }

    /// Looks up an object property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties().iter().find(|property| property.name() == name)
    }

    /// Returns `true` if the named property must be supplied.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        match self {
            Self::Object { required, .. } => required.iter().any(|candidate| candidate == name),
            _ => false,
        }
    }
}

/// A named member of an object schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    name: String,
    schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
}

impl Property {
    pub(crate) fn new(
        name: String,
        schema: Schema,
        description: Option<String>,
        default: Option<Value>,
    ) -> Self {
        Self {
            name,
            schema,
            description,
            default,
        }
    }

    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the property schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the value substituted when the property is omitted.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_type_tag() {
        let schema = Schema::Array {
            items: Box::new(Schema::Nullable {
                inner: Box::new(Schema::Integer),
            }),
        };

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({"type": "array", "items": {"type": "nullable", "inner": {"type": "integer"}}})
        );

        let parsed: Schema = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, schema);
    }
}
