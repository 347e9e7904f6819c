//! Schema derivation and validation.
//!
//! Everything here is a pure function of its inputs and may be called from
//! any number of tasks concurrently.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{
    CodecError, FieldPath, SchemaError, SchemaResult, ValidationError, ValidationIssue,
};
use crate::field::{Field, FieldType, PrimitiveType, Record};
use crate::schema::{Property, Schema};

/// How validation treats object members the schema does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFields {
    /// Fail with [`ValidationIssue::UnknownField`].
    #[default]
    Reject,
    /// Drop undeclared members from the validated value.
    Ignore,
}

/// Derives the object schema for an ordered field set.
#[must_use]
pub fn to_schema(fields: &[Field]) -> Schema {
    Schema::Object {
        properties: fields.iter().map(property_for).collect(),
        required: fields
            .iter()
            .filter(|field| field.is_required())
            .map(|field| field.name().to_owned())
            .collect(),
    }
}

/// Derives the schema declared by a [`Record`] implementation.
#[must_use]
pub fn schema_of<R: Record>() -> Schema {
    to_schema(&R::fields())
}

fn property_for(field: &Field) -> Property {
    Property::new(
        field.name().to_owned(),
        schema_for(field.ty()),
        field.description().map(str::to_owned),
        field.default_value().cloned(),
    )
}

fn schema_for(ty: &FieldType) -> Schema {
    match ty {
        FieldType::Primitive(PrimitiveType::String) => Schema::String,
        FieldType::Primitive(PrimitiveType::Number) => Schema::Number,
        FieldType::Primitive(PrimitiveType::Integer) => Schema::Integer,
        FieldType::Primitive(PrimitiveType::Boolean) => Schema::Boolean,
        FieldType::Record(fields) => to_schema(fields),
        FieldType::List(item) => Schema::Array {
            items: Box::new(schema_for(item)),
        },
        FieldType::Enum(values) => Schema::Enum {
            values: values.clone(),
        },
        FieldType::Optional(inner) => Schema::Nullable {
            inner: Box::new(schema_for(inner)),
        },
    }
}

/// Checks that a field set is well formed: names are non-empty and unique per
/// record, enumerations are non-empty, and defaults conform to their field.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidField`] naming the first bad declaration.
pub fn check_fields(fields: &[Field]) -> SchemaResult<()> {
    let mut path = FieldPath::root();
    check_record(fields, &mut path)
}

fn check_record(fields: &[Field], path: &mut FieldPath) -> SchemaResult<()> {
    let mut seen = HashSet::new();
    for field in fields {
        if field.name().trim().is_empty() {
            return Err(SchemaError::invalid_field(path, "field name cannot be empty"));
        }
        path.push_key(field.name());
        if !seen.insert(field.name()) {
            return Err(SchemaError::invalid_field(path, "duplicate field name"));
        }
        check_type(field.ty(), path)?;
        if let Some(default) = field.default_value() {
            validate(&schema_for(field.ty()), default, UnknownFields::Reject).map_err(|err| {
                SchemaError::invalid_field(path, format!("default does not conform: {err}"))
            })?;
        }
        path.pop();
    }
    Ok(())
}

fn check_type(ty: &FieldType, path: &mut FieldPath) -> SchemaResult<()> {
    match ty {
        FieldType::Primitive(_) => Ok(()),
        FieldType::Record(fields) => check_record(fields, path),
        FieldType::List(item) | FieldType::Optional(item) => check_type(item, path),
        FieldType::Enum(values) if values.is_empty() => Err(SchemaError::invalid_field(
            path,
            "enumeration must declare at least one value",
        )),
        FieldType::Enum(_) => Ok(()),
    }
}

/// Validates a raw value against a schema.
///
/// Returns the normalized value: defaults are filled in for omitted
/// properties and, under [`UnknownFields::Ignore`], undeclared members are
/// dropped. Declared properties are checked in declaration order before any
/// undeclared member is considered, so the reported path is deterministic.
///
/// # Errors
///
/// Returns [`ValidationError`] naming the first offending field path.
pub fn validate(schema: &Schema, raw: &Value, mode: UnknownFields) -> Result<Value, ValidationError> {
    let mut path = FieldPath::root();
    validate_at(schema, raw, mode, &mut path)
}

fn validate_at(
    schema: &Schema,
    raw: &Value,
    mode: UnknownFields,
    path: &mut FieldPath,
) -> Result<Value, ValidationError> {
    match schema {
        Schema::String if raw.is_string() => Ok(raw.clone()),
        Schema::Number if raw.is_number() => Ok(raw.clone()),
        Schema::Integer => integral(raw).ok_or_else(|| mismatch(path, "integer", raw)),
        Schema::Boolean if raw.is_boolean() => Ok(raw.clone()),
        Schema::Nullable { .. } if raw.is_null() => Ok(Value::Null),
        Schema::Nullable { inner } => validate_at(inner, raw, mode, path),
        Schema::Enum { values } => match raw.as_str() {
            Some(candidate) if values.iter().any(|value| value == candidate) => Ok(raw.clone()),
            Some(candidate) => Err(ValidationError::new(
                path,
                ValidationIssue::NotInEnum {
                    value: candidate.to_owned(),
                    allowed: values.join(", "),
                },
            )),
            None => Err(mismatch(path, "string", raw)),
        },
        Schema::Array { items } => {
            let entries = raw
                .as_array()
                .ok_or_else(|| mismatch(path, "array", raw))?;
            let mut validated = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                path.push_index(index);
                validated.push(validate_at(items, entry, mode, path)?);
                path.pop();
            }
            Ok(Value::Array(validated))
        }
        Schema::Object {
            properties,
            required,
        } => validate_object(properties, required, raw, mode, path),
        other => Err(mismatch(path, other.type_name(), raw)),
    }
}

fn validate_object(
    properties: &[Property],
    required: &[String],
    raw: &Value,
    mode: UnknownFields,
    path: &mut FieldPath,
) -> Result<Value, ValidationError> {
    let members = raw
        .as_object()
        .ok_or_else(|| mismatch(path, "object", raw))?;

    let mut validated = Map::new();
    for property in properties {
        path.push_key(property.name());
        match members.get(property.name()) {
            Some(value) => {
                let value = validate_at(property.schema(), value, mode, path)?;
                validated.insert(property.name().to_owned(), value);
            }
            None => {
                if let Some(default) = property.default_value() {
                    validated.insert(property.name().to_owned(), default.clone());
                } else if required.iter().any(|name| name == property.name()) {
                    return Err(ValidationError::new(path, ValidationIssue::MissingField));
                }
            }
        }
        path.pop();
    }

    if mode == UnknownFields::Reject {
        if let Some(unknown) = members
            .keys()
            .find(|key| !properties.iter().any(|property| property.name() == key.as_str()))
        {
            path.push_key(unknown);
            return Err(ValidationError::new(path, ValidationIssue::UnknownField));
        }
    }

    Ok(Value::Object(validated))
}

// 2^63; `i64::MAX as f64` rounds up to this value.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Returns the value as a JSON integer. Whole floats inside the `i64` range
/// are normalized so `1.0` decodes into integer types.
#[allow(clippy::cast_possible_truncation)]
fn integral(value: &Value) -> Option<Value> {
    if value.is_i64() || value.is_u64() {
        return Some(value.clone());
    }
    value
        .as_f64()
        .filter(|number| number.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(number))
        .map(|number| Value::from(number as i64))
}

fn mismatch(path: &FieldPath, expected: &'static str, found: &Value) -> ValidationError {
    ValidationError::new(
        path,
        ValidationIssue::TypeMismatch {
            expected,
            found: json_type(found),
        },
    )
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates a raw value and deserializes it into `T`.
///
/// # Errors
///
/// Returns [`CodecError::Validation`] when the value does not conform, or
/// [`CodecError::Decode`] when the validated value does not fit `T`.
pub fn decode<T: DeserializeOwned>(
    schema: &Schema,
    raw: &Value,
    mode: UnknownFields,
) -> Result<T, CodecError> {
    let validated = validate(schema, raw, mode)?;
    serde_json::from_value(validated).map_err(|err| CodecError::Decode {
        reason: err.to_string(),
    })
}

/// Serializes a value and checks it against the schema.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialization fails, or
/// [`CodecError::Validation`] when the serialized form does not conform.
pub fn encode<T: Serialize + ?Sized>(schema: &Schema, value: &T) -> Result<Value, CodecError> {
    let raw = serde_json::to_value(value).map_err(|err| CodecError::Encode {
        reason: err.to_string(),
    })?;
    Ok(validate(schema, &raw, UnknownFields::Reject)?)
}
