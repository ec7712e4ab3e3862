//! Small services used by tests and demos.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use conduit_core::{BoxError, ExposureTable, InvalidInput, Mapping, Param, Service};

/// Replies to `ping`, echoes input and fails on demand.
#[derive(Debug, Default)]
pub struct EchoService {
    calls: AtomicUsize,
}

impl EchoService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tool invocations handled.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Service for EchoService {
    fn expose(table: &mut ExposureTable<Self>) {
        table
            .tool(
                "ping",
                "Replies with pong",
                &[Param::receiver()],
                |svc: Arc<Self>, _input| async move {
                    svc.called();
                    Ok(json!({ "pong": true }))
                },
            )
            .tool(
                "echo",
                "Returns its input unchanged",
                &[Param::receiver(), Param::keyword_catch_all("input")],
                |svc: Arc<Self>, input: Mapping| async move {
                    svc.called();
                    Ok(Value::Object(input))
                },
            )
            .tool(
                "fail",
                "Always raises",
                &[Param::receiver()],
                |svc: Arc<Self>, _input| async move {
                    svc.called();
                    Err::<Value, BoxError>("echo failure requested".into())
                },
            )
            .resource(
                "greeting",
                "Greets the given name",
                &[Param::receiver(), Param::optional("name")],
                |_svc, params: Mapping| async move {
                    let name = params
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("world")
                        .to_string();
                    Ok(json!({ "text": format!("hello {name}") }))
                },
            );
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StoreInput {
    /// Key to write
    pub key: String,
    /// Value to store
    pub value: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecallParams {
    pub key: String,
}

/// Key-value store exposing typed tools and resources.
#[derive(Debug, Default)]
pub struct MemoryService {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Service for MemoryService {
    fn expose(table: &mut ExposureTable<Self>) {
        table
            .typed_tool(
                "store",
                "Store a value under a key",
                |svc: Arc<Self>, input: StoreInput| async move {
                    if input.key.trim().is_empty() {
                        let err = InvalidInput::new("key cannot be empty");
                        return Err::<Value, BoxError>(Box::new(err));
                    }
                    let replaced = svc.entries().insert(input.key, input.value).is_some();
                    Ok(json!({ "stored": true, "replaced": replaced }))
                },
            )
            .tool(
                "clear",
                "Remove every entry",
                &[Param::receiver()],
                |svc: Arc<Self>, _input| async move {
                    svc.entries().clear();
                    Ok(Value::Null)
                },
            )
            .typed_resource(
                "recall",
                "Read one value",
                |svc: Arc<Self>, params: RecallParams| async move {
                    Ok(svc.entries().get(&params.key).cloned().unwrap_or(Value::Null))
                },
            )
            .resource(
                "entries",
                "Every stored entry",
                &[Param::receiver()],
                |svc: Arc<Self>, _params| async move {
                    let rows: Vec<Value> = svc
                        .entries()
                        .iter()
                        .map(|(key, value)| json!({ "key": key, "value": value }))
                        .collect();
                    Ok(Value::Array(rows))
                },
            );
    }
}
