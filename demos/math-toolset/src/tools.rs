//! The `math` toolset.

use serde::{Deserialize, Serialize};
use toolforest::runtime::{
    HandlerError, HandlerResult, RegistryResult, ToolDefinition, ToolRegistry,
};
use toolforest::schema::{Field, FieldType, Record};

pub const TOOLSET: &str = "math";

#[derive(Debug, Deserialize)]
pub struct Operands {
    x: f64,
    y: f64,
}

impl Record for Operands {
    fn fields() -> Vec<Field> {
        vec![
            Field::required("x", FieldType::number()).with_description("First operand"),
            Field::required("y", FieldType::number()).with_description("Second operand"),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct Outcome {
    value: f64,
}

impl Record for Outcome {
    fn fields() -> Vec<Field> {
        vec![Field::required("value", FieldType::number()).with_description("Result")]
    }
}

async fn add(params: Operands) -> HandlerResult<Outcome> {
    Ok(Outcome {
        value: params.x + params.y,
    })
}

async fn divide(params: Operands) -> HandlerResult<Outcome> {
    if params.y == 0.0 {
        return Err(HandlerError::new("DivisionByZero", "cannot divide by zero"));
    }
    Ok(Outcome {
        value: params.x / params.y,
    })
}

/// Builds the frozen registry served by this process.
pub fn registry() -> RegistryResult<ToolRegistry> {
    let mut builder = ToolRegistry::builder(TOOLSET, env!("CARGO_PKG_VERSION"));
    builder
        .register(ToolDefinition::typed("add", "Add two numbers.", add)?)?
        .register(ToolDefinition::typed("divide", "Divide x by y.", divide)?)?;
    Ok(builder.build())
}
