//! Structural schemas for tool parameters and results.
//!
//! Tools declare their inputs and outputs as ordered [`Field`] lists. The
//! codec derives a deterministic [`Schema`] from those declarations once, and
//! the same schema is later used to validate raw JSON on both sides of the
//! wire.

#![warn(missing_docs, clippy::pedantic)]

mod codec;
mod error;
mod field;
mod schema;

/// Schema derivation and validation entry points.
pub use codec::{UnknownFields, check_fields, decode, encode, schema_of, to_schema, validate};
/// Error types produced while declaring or validating schemas.
pub use error::{
    CodecError, FieldPath, SchemaError, SchemaResult, ValidationError, ValidationIssue,
};
/// Declarative field descriptors.
pub use field::{Field, FieldType, PrimitiveType, Record};
/// Structural schema representation.
pub use schema::{Property, Schema};
