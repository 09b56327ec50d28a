//! # Error Handling Module
//!
//! This module defines every error the gateway can produce, from fatal startup
//! problems (bad configuration, missing container engine) to per-request
//! failures (unknown route, function timeout, unparseable function output).
//!
//! ## Two Classes of Errors
//!
//! - **Startup errors** (`Configuration`, `Dependency`) abort the process before
//!   the listener is bound. The gateway never serves in an invalid state.
//! - **Per-request errors** are converted into an HTTP response shaped like the
//!   one the cloud gateway returns for the same condition. They never escape the
//!   request handler.
//!
//! ## Rust Error Handling Concepts
//!
//! - `Result<T, E>` instead of exceptions; `?` propagates errors to the caller
//! - `thiserror` derives `Display` and `std::error::Error` from the
//!   `#[error("...")]` attributes
//! - `From` implementations let `?` convert library errors automatically
//! - `IntoResponse` lets axum handlers return `GatewayError` directly

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the function gateway
///
/// Each variant represents a different category of error. The `#[error("...")]`
/// attribute from `thiserror` implements `Display` with the given message.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Malformed or contradictory route/function configuration
    /// (duplicate route, unresolvable handler, unsupported runtime)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Required external tooling is unavailable (container engine, runtime image)
    #[error("Missing dependency \"{dependency}\": {message}")]
    Dependency { dependency: String, message: String },

    /// No declared route matches the inbound request
    #[error("No route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// The function exceeded its configured deadline
    #[error("Function '{function}' timed out after {timeout_ms}ms")]
    InvocationTimeout { function: String, timeout_ms: u64 },

    /// The sandbox terminated abnormally or the function raised an unhandled error
    #[error("Function '{function}' failed ({error_type}): {message}")]
    InvocationFailure {
        function: String,
        error_type: String,
        message: String,
    },

    /// The function output could not be parsed into a gateway response
    #[error("Function '{function}' returned a malformed response: {reason}")]
    ResponseFormat { function: String, reason: String },

    /// Request body larger than the configured limit
    #[error("Request body of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, process spawning, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a dependency error naming the missing dependency
    pub fn dependency<D: Into<String>, M: Into<String>>(dependency: D, message: M) -> Self {
        Self::Dependency {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Create a route-not-found error
    pub fn route_not_found<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self::RouteNotFound {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Create an invocation failure error
    pub fn invocation_failure<F, T, M>(function: F, error_type: T, message: M) -> Self
    where
        F: Into<String>,
        T: Into<String>,
        M: Into<String>,
    {
        Self::InvocationFailure {
            function: function.into(),
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Create a response format error
    pub fn response_format<F: Into<String>, R: Into<String>>(function: F, reason: R) -> Self {
        Self::ResponseFormat {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Dependency { .. })
    }

    /// Get the HTTP status code the cloud gateway uses for the analogous condition
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvocationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvocationFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::ResponseFormat { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Dependency { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for logs and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Dependency { .. } => "dependency_error",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::InvocationTimeout { .. } => "invocation_timeout",
            Self::InvocationFailure { .. } => "invocation_failure",
            Self::ResponseFormat { .. } => "response_format_error",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    /// Body the cloud gateway returns for this condition
    ///
    /// Function failures use the Lambda error object (`errorMessage`/`errorType`);
    /// everything else uses the gateway's own `{"message": ...}` shape.
    pub fn response_body(&self) -> Value {
        match self {
            Self::RouteNotFound { .. } => json!({ "message": "Not Found" }),
            Self::InvocationTimeout { .. } => json!({ "message": "Endpoint request timed out" }),
            Self::InvocationFailure {
                error_type, message, ..
            } => json!({
                "errorMessage": message,
                "errorType": error_type,
            }),
            Self::PayloadTooLarge { .. } => json!({ "message": "Request Entity Too Large" }),
            Self::Dependency { .. } => json!({ "message": "Service Unavailable" }),
            _ => json!({ "message": "Internal Server Error" }),
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Implement `IntoResponse` so handlers can return `GatewayError` directly
///
/// The body never leaks internal details: clients see exactly what the cloud
/// gateway would show them, while the full error goes to the logs.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.response_body())).into_response()
    }
}
