//! Error taxonomy shared by every client implementation.
//!
//! Both the in-process and the network client fail with the same
//! [`ConduitError`] kinds, so callers can match on a failure without knowing
//! which deployment mode is active. Each variant carries the names it was
//! raised for and, where one exists, the underlying cause.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type returned by tool and resource handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for runtime operations.
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Errors raised while resolving, validating or invoking an operation.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// No service is registered under this name.
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// The service exists but exposes no tool with this name.
    #[error("Tool not found: {service}/{tool}")]
    ToolNotFound { service: String, tool: String },

    /// The service exists but exposes no resource with this name.
    #[error("Resource not found: {service}/{resource}")]
    ResourceNotFound { service: String, resource: String },

    /// The input or params did not satisfy the operation's schema.
    #[error("Invalid input for {service}/{name}: {reason}")]
    Validation {
        service: String,
        name: String,
        reason: String,
    },

    /// The tool callable raised.
    #[error("Tool {service}/{tool} failed: {source}")]
    ToolExecution {
        service: String,
        tool: String,
        #[source]
        source: BoxError,
    },

    /// The resource callable raised.
    #[error("Resource {service}/{resource} failed: {source}")]
    ResourceAccess {
        service: String,
        resource: String,
        #[source]
        source: BoxError,
    },

    /// A service could not be registered.
    #[error("Service {service} failed to initialize: {reason}")]
    ServiceInitialization { service: String, reason: String },

    /// The remote call failed at the transport level.
    #[error("Transport error for {service} at {endpoint}: {message}")]
    Transport {
        service: String,
        endpoint: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The circuit breaker for the service's endpoint is open.
    #[error(
        "Service unavailable: {service} (circuit open, retry after {}ms)",
        retry_after.as_millis()
    )]
    ServiceUnavailable {
        service: String,
        retry_after: Duration,
    },
}

/// Stable, serialisable discriminant of a [`ConduitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServiceNotFound,
    ToolNotFound,
    ResourceNotFound,
    ValidationError,
    ToolExecutionError,
    ResourceAccessError,
    ServiceInitializationError,
    TransportError,
    ServiceUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ServiceNotFound => "service_not_found",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::ToolExecutionError => "tool_execution_error",
            ErrorKind::ResourceAccessError => "resource_access_error",
            ErrorKind::ServiceInitializationError => "service_initialization_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
        };
        f.write_str(s)
    }
}

impl ConduitError {
    pub fn service_not_found(service: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            service: service.into(),
        }
    }

    pub fn tool_not_found(service: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::ToolNotFound {
            service: service.into(),
            tool: tool.into(),
        }
    }

    pub fn resource_not_found(service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            service: service.into(),
            resource: resource.into(),
        }
    }

    pub fn validation(
        service: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            service: service.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn tool_execution(
        service: impl Into<String>,
        tool: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ToolExecution {
            service: service.into(),
            tool: tool.into(),
            source: source.into(),
        }
    }

    pub fn resource_access(
        service: impl Into<String>,
        resource: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ResourceAccess {
            service: service.into(),
            resource: resource.into(),
            source: source.into(),
        }
    }

    pub fn service_initialization(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceInitialization {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error without an underlying cause.
    pub fn transport(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            service: service.into(),
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping the cause.
    pub fn transport_with_source(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            service: service.into(),
            endpoint: endpoint.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn service_unavailable(service: impl Into<String>, retry_after: Duration) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            retry_after,
        }
    }

    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConduitError::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            ConduitError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            ConduitError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            ConduitError::Validation { .. } => ErrorKind::ValidationError,
            ConduitError::ToolExecution { .. } => ErrorKind::ToolExecutionError,
            ConduitError::ResourceAccess { .. } => ErrorKind::ResourceAccessError,
            ConduitError::ServiceInitialization { .. } => ErrorKind::ServiceInitializationError,
            ConduitError::Transport { .. } => ErrorKind::TransportError,
            ConduitError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
        }
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            ErrorKind::ResourceAccessError => "RESOURCE_ACCESS_ERROR",
            ErrorKind::ServiceInitializationError => "SERVICE_INITIALIZATION_ERROR",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Whether the same call might succeed later.
    ///
    /// The runtime never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConduitError::Transport { .. } | ConduitError::ServiceUnavailable { .. }
        )
    }

    /// Lookup failures: the named service, tool or resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConduitError::ServiceNotFound { .. }
                | ConduitError::ToolNotFound { .. }
                | ConduitError::ResourceNotFound { .. }
        )
    }

    /// The service named in the error context, if any.
    pub fn service(&self) -> &str {
        match self {
            ConduitError::ServiceNotFound { service }
            | ConduitError::ToolNotFound { service, .. }
            | ConduitError::ResourceNotFound { service, .. }
            | ConduitError::Validation { service, .. }
            | ConduitError::ToolExecution { service, .. }
            | ConduitError::ResourceAccess { service, .. }
            | ConduitError::ServiceInitialization { service, .. }
            | ConduitError::Transport { service, .. }
            | ConduitError::ServiceUnavailable { service, .. } => service,
        }
    }

    /// The tool or resource named in the error context, if any.
    pub fn operation(&self) -> Option<&str> {
        match self {
            ConduitError::ToolNotFound { tool, .. } | ConduitError::ToolExecution { tool, .. } => {
                Some(tool)
            }
            ConduitError::ResourceNotFound { resource, .. }
            | ConduitError::ResourceAccess { resource, .. } => Some(resource),
            ConduitError::Validation { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Error a handler returns to report that its input was unusable.
///
/// The runtime surfaces it as [`ConduitError::Validation`] instead of wrapping
/// it as an execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct InvalidInput {
    reason: String,
}

impl InvalidInput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A failure reported by a remote service, reconstructed from its message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RemoteFailure(pub String);
