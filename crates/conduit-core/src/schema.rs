//! Input schema extraction.
//!
//! Two strategies are chosen at registration time:
//!
//! - **Descriptor**: the operation names a typed input (`schemars::JsonSchema`)
//!   or supplies a JSON schema object directly; the schema is taken as-is and
//!   typed inputs are validated by deserialisation before the handler runs.
//! - **Declared parameters**: the operation lists its formal parameters. The
//!   receiver and any keyword catch-all are skipped, parameters without a
//!   default are required, and every property is typed `object`. This schema
//!   is deliberately permissive and is never used to reject input.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// How a declared parameter participates in the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// The service instance the callable is bound to.
    Receiver,
    /// A parameter without a default value.
    Required,
    /// A parameter with a default value.
    Optional,
    /// A catch-all collecting any remaining keyword arguments.
    KeywordCatchAll,
}

/// A formal parameter of an exposed callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn receiver() -> Self {
        Self::new("self", ParamKind::Receiver)
    }

    pub fn required(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Required)
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Optional)
    }

    pub fn keyword_catch_all(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::KeywordCatchAll)
    }

    /// Whether the parameter becomes a schema property.
    pub fn is_input(&self) -> bool {
        matches!(self.kind, ParamKind::Required | ParamKind::Optional)
    }
}

/// Build the permissive object schema for a declared parameter list.
pub fn schema_from_params(params: &[Param]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params.iter().filter(|p| p.is_input()) {
        properties.insert(param.name.clone(), json!({ "type": "object" }));
        if param.kind == ParamKind::Required {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Generate the schema of a typed input descriptor.
pub fn schema_for_type<I: JsonSchema>() -> Result<Value, serde_json::Error> {
    serde_json::to_value(schemars::schema_for!(I))
}

/// Check that a directly supplied descriptor is usable as an input schema.
pub fn check_descriptor(schema: &Value) -> Result<(), String> {
    match schema {
        Value::Object(obj) => match obj.get("type") {
            None => Ok(()),
            Some(Value::String(t)) if t == "object" => Ok(()),
            Some(other) => Err(format!("input schema must describe an object, got type {other}")),
        },
        Value::Bool(true) => Ok(()),
        other => Err(format!("input schema must be a JSON object, got {other}")),
    }
}
