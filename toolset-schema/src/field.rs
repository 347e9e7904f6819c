//! Declarative field descriptors used to describe tool inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar value kinds understood by the codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// UTF-8 text.
    String,
    /// Any JSON number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
}

/// Semantic type of a declared field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    /// Scalar value.
    Primitive(PrimitiveType),
    /// Nested record with its own ordered fields.
    Record(Vec<Field>),
    /// Ordered list whose items share one type.
    List(Box<FieldType>),
    /// Closed set of string values.
    Enum(Vec<String>),
    /// Value that may also be `null`.
    Optional(Box<FieldType>),
}

impl FieldType {
    /// Text field type.
    #[must_use]
    pub const fn string() -> Self {
        Self::Primitive(PrimitiveType::String)
    }

    /// Numeric field type.
    #[must_use]
    pub const fn number() -> Self {
        Self::Primitive(PrimitiveType::Number)
    }

    /// Integral field type.
    #[must_use]
    pub const fn integer() -> Self {
        Self::Primitive(PrimitiveType::Integer)
    }

    /// Boolean field type.
    #[must_use]
    pub const fn boolean() -> Self {
        Self::Primitive(PrimitiveType::Boolean)
    }

    /// Nested record type.
    #[must_use]
    pub fn record(fields: Vec<Field>) -> Self {
        Self::Record(fields)
    }

    /// List type with the supplied item type.
    #[must_use]
    pub fn list(item: FieldType) -> Self {
        Self::List(Box::new(item))
    }

    /// Enumeration over the supplied values.
    #[must_use]
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    /// Nullable wrapper around the supplied type.
    #[must_use]
    pub fn optional(inner: FieldType) -> Self {
        Self::Optional(Box::new(inner))
    }
}

/// A named, typed member of a parameter or result record.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: String,
    ty: FieldType,
    required: bool,
    default: Option<Value>,
    description: Option<String>,
}

impl Field {
    /// Declares a field that callers must always supply.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
        }
    }

    /// Declares a field that callers may omit.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    /// Sets the value used when the field is omitted. A field with a default is
    /// never required.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self.required = false;
        self
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    #[must_use]
    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    /// Returns `true` when callers must supply the field.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Returns the default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Implemented by types that declare their own field layout.
///
/// Parameter and result types of typed tools implement this explicitly so that
/// schemas are derived from declarations rather than discovered at runtime.
pub trait Record {
    /// Returns the ordered field declarations for this record.
    fn fields() -> Vec<Field>;
}
