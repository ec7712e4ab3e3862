//! JSON bodies exchanged between the network client and a service host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ConduitError, ErrorKind, RemoteFailure};
use crate::output::Mapping;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub input: Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadResourceRequest {
    #[serde(default)]
    pub params: Mapping,
}

/// Successful invocation body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResponse {
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesResponse {
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl WireError {
    /// Reason text without the kind-specific prefix added by `Display`.
    fn detail(err: &ConduitError) -> String {
        match err {
            ConduitError::Validation { reason, .. }
            | ConduitError::ServiceInitialization { reason, .. } => reason.clone(),
            ConduitError::ToolExecution { source, .. }
            | ConduitError::ResourceAccess { source, .. } => source.to_string(),
            ConduitError::Transport { message, .. } => message.clone(),
            _ => err.to_string(),
        }
    }

    /// Rebuild the typed error on the calling side.
    ///
    /// `endpoint` is recorded on transport errors reported by the remote end.
    pub fn into_error(self, endpoint: &str) -> ConduitError {
        let service = self.service;
        let name = self.name.unwrap_or_default();
        match self.kind {
            ErrorKind::ServiceNotFound => ConduitError::service_not_found(service),
            ErrorKind::ToolNotFound => ConduitError::tool_not_found(service, name),
            ErrorKind::ResourceNotFound => ConduitError::resource_not_found(service, name),
            ErrorKind::ValidationError => ConduitError::validation(service, name, self.message),
            ErrorKind::ToolExecutionError => {
                ConduitError::tool_execution(service, name, RemoteFailure(self.message))
            }
            ErrorKind::ResourceAccessError => {
                ConduitError::resource_access(service, name, RemoteFailure(self.message))
            }
            ErrorKind::ServiceInitializationError => {
                ConduitError::service_initialization(service, self.message)
            }
            ErrorKind::TransportError => ConduitError::transport(service, endpoint, self.message),
            ErrorKind::ServiceUnavailable => ConduitError::service_unavailable(
                service,
                Duration::from_millis(self.retry_after_ms.unwrap_or_default()),
            ),
        }
    }
}

impl From<&ConduitError> for WireError {
    fn from(err: &ConduitError) -> Self {
        let retry_after_ms = match err {
            ConduitError::ServiceUnavailable { retry_after, .. } => {
                Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: Self::detail(err),
            service: err.service().to_string(),
            name: err.operation().map(str::to_string),
            retry_after_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as _;

    #[test]
    fn test_execution_error_survives_the_wire() {
        let original = ConduitError::tool_execution("echo", "boom", "kaboom");
        let body = serde_json::to_value(WireError::from(&original)).unwrap();
        assert_eq!(
            body,
            json!({
                "kind": "tool_execution_error",
                "message": "kaboom",
                "service": "echo",
                "name": "boom",
            })
        );

        let wire: WireError = serde_json::from_value(body).unwrap();
        let rebuilt = wire.into_error("http://echo:8080");
        assert!(matches!(rebuilt, ConduitError::ToolExecution { .. }));
        assert_eq!(rebuilt.source().unwrap().to_string(), "kaboom");
        assert_eq!(rebuilt.to_string(), original.to_string());
    }

    #[test]
    fn test_not_found_kinds_keep_names() {
        let wire = WireError::from(&ConduitError::resource_not_found("memory", "notes"));
        let rebuilt = wire.into_error("http://memory");
        match rebuilt {
            ConduitError::ResourceNotFound { service, resource } => {
                assert_eq!(service, "memory");
                assert_eq!(resource, "notes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_request_bodies_default_to_empty() {
        let req: CallToolRequest = serde_json::from_str("{}").unwrap();
        assert!(req.input.is_empty());
        let req: ReadResourceRequest = serde_json::from_str("{}").unwrap();
        assert!(req.params.is_empty());
    }
}
