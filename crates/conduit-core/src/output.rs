//! Result normalisation for tool and resource callables.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object: the input and output shape of every operation.
pub type Mapping = Map<String, Value>;

/// What a resource read yields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContent {
    Mapping(Mapping),
    Sequence(Vec<Mapping>),
}

impl ResourceContent {
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            ResourceContent::Mapping(m) => Some(m),
            ResourceContent::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Mapping]> {
        match self {
            ResourceContent::Sequence(s) => Some(s),
            ResourceContent::Mapping(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ResourceContent::Mapping(m) => Value::Object(m),
            ResourceContent::Sequence(s) => {
                Value::Array(s.into_iter().map(Value::Object).collect())
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn wrap(value: Value) -> Mapping {
    let mut map = Mapping::new();
    map.insert("result".to_string(), value);
    map
}

/// Split an array into mappings if every element is an object.
fn into_mappings(items: Vec<Value>) -> Result<Vec<Mapping>, Vec<Value>> {
    if !items.iter().all(Value::is_object) {
        return Err(items);
    }
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .collect())
}

/// Normalise what a tool returned into the mapping handed to the caller.
///
/// Mappings pass through, null and empty values become an empty mapping and
/// anything else is wrapped as `{"result": value}`.
pub fn normalize_tool_output(value: Value) -> Mapping {
    if is_empty(&value) {
        return Mapping::new();
    }
    match value {
        Value::Object(map) => map,
        other => wrap(other),
    }
}

/// Normalise what a resource returned.
///
/// Same rules as [`normalize_tool_output`], except that a non-empty array
/// whose elements are all objects passes through as a sequence.
pub fn normalize_resource_output(value: Value) -> ResourceContent {
    if is_empty(&value) {
        return ResourceContent::Mapping(Mapping::new());
    }
    match value {
        Value::Object(map) => ResourceContent::Mapping(map),
        Value::Array(items) => match into_mappings(items) {
            Ok(seq) => ResourceContent::Sequence(seq),
            Err(items) => ResourceContent::Mapping(wrap(Value::Array(items))),
        },
        other => ResourceContent::Mapping(wrap(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_output_rules() {
        assert_eq!(
            Value::Object(normalize_tool_output(json!({"pong": true}))),
            json!({"pong": true})
        );
        assert!(normalize_tool_output(Value::Null).is_empty());
        assert!(normalize_tool_output(json!("")).is_empty());
        assert!(normalize_tool_output(json!([])).is_empty());
        assert_eq!(
            Value::Object(normalize_tool_output(json!(42))),
            json!({"result": 42})
        );
        assert_eq!(
            Value::Object(normalize_tool_output(json!([{"a": 1}]))),
            json!({"result": [{"a": 1}]})
        );
    }

    #[test]
    fn test_resource_output_rules() {
        let seq = normalize_resource_output(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(seq.as_sequence().map(<[Mapping]>::len), Some(2));

        let mixed = normalize_resource_output(json!([{"id": 1}, 2]));
        assert_eq!(mixed.into_value(), json!({"result": [{"id": 1}, 2]}));

        let empty = normalize_resource_output(Value::Null);
        assert_eq!(empty, ResourceContent::Mapping(Mapping::new()));

        let text = normalize_resource_output(json!("hello"));
        assert_eq!(text.into_value(), json!({"result": "hello"}));
    }

    #[test]
    fn test_resource_content_serializes_untagged() {
        let seq = ResourceContent::Sequence(vec![Mapping::new()]);
        assert_eq!(serde_json::to_value(&seq).unwrap(), json!([{}]));
        let back: ResourceContent = serde_json::from_value(json!({"k": "v"})).unwrap();
        assert!(back.as_mapping().is_some());
    }
}
