//! # Core Types Module
//!
//! Data structures describing the functions the gateway fronts. A
//! `FunctionDescriptor` is built once at startup from the service manifest and
//! is never mutated afterwards; the route table and the sandbox pools share it
//! through `Arc`.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// HTTP method a route is bound to
///
/// `Any` corresponds to the gateway's `ANY` (or `*`) method and matches every
/// request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Exact(Method),
    Any,
}

impl FromStr for RouteMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "*" | "ANY" => Ok(RouteMethod::Any),
            "GET" | "POST" | "PUT" | "DELETE" | "PATCH" | "HEAD" | "OPTIONS" => upper
                .parse::<Method>()
                .map(RouteMethod::Exact)
                .map_err(|e| GatewayError::config(format!("Invalid HTTP method '{}': {}", s, e))),
            _ => Err(GatewayError::config(format!("Invalid HTTP method: {}", s))),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Any => write!(f, "ANY"),
            RouteMethod::Exact(m) => write!(f, "{}", m),
        }
    }
}

/// One HTTP route declared by a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub method: RouteMethod,
    /// Path pattern in gateway syntax, e.g. `/items/{id}` or `/files/{path+}`
    pub path: String,
}

impl RouteBinding {
    pub fn new(method: RouteMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self { method, path }
    }

    /// Route key as it appears in the invocation event (`"GET /items/{id}"`)
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Reference to the handler entry point: `<file>.<export>`
///
/// `file` may contain directories (`src/api/handler.main`); the last `.`
/// separates the file stem from the exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRef {
    pub file: String,
    pub export: String,
}

impl HandlerRef {
    pub fn parse(handler: &str) -> GatewayResult<Self> {
        match handler.trim().rsplit_once('.') {
            Some((file, export))
                if !file.is_empty() && !export.is_empty() && !export.contains('/') =>
            {
                Ok(Self {
                    file: file.to_string(),
                    export: export.to_string(),
                })
            }
            _ => Err(GatewayError::config(format!(
                "Invalid handler reference '{}': expected <file>.<function>",
                handler
            ))),
        }
    }

    /// Find the handler source file under `code_dir` for one of the extensions
    pub fn resolve(&self, code_dir: &Path, extensions: &[String]) -> Option<PathBuf> {
        extensions
            .iter()
            .map(|ext| code_dir.join(format!("{}.{}", self.file, ext.trim_start_matches('.'))))
            .find(|candidate| candidate.is_file())
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.file, self.export)
    }
}

/// Declarative definition of one invokable function
///
/// Immutable after load; owned by the route table.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// Function name as declared in the manifest
    pub name: String,

    /// Handler entry point
    pub handler: HandlerRef,

    /// Runtime identifier (e.g. `python3.12`, `nodejs20.x`)
    pub runtime: String,

    /// Directory holding the function's code, mounted into the sandbox
    pub code_dir: PathBuf,

    /// HTTP routes bound to this function
    pub routes: Vec<RouteBinding>,

    /// Environment variables passed to the sandbox
    pub environment: BTreeMap<String, String>,

    /// Invocation deadline
    pub timeout: Duration,
}

impl FunctionDescriptor {
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_method_parsing() {
        assert_eq!("get".parse::<RouteMethod>().unwrap(), RouteMethod::Exact(Method::GET));
        assert_eq!("*".parse::<RouteMethod>().unwrap(), RouteMethod::Any);
        assert_eq!("any".parse::<RouteMethod>().unwrap(), RouteMethod::Any);
        assert!("FETCH".parse::<RouteMethod>().is_err());
    }

    #[test]
    fn test_route_key() {
        let binding = RouteBinding::new(RouteMethod::Exact(Method::GET), "items/{id}");
        assert_eq!(binding.path, "/items/{id}");
        assert_eq!(binding.route_key(), "GET /items/{id}");
        assert_eq!(RouteBinding::new(RouteMethod::Any, "/x").route_key(), "ANY /x");
    }

    #[test]
    fn test_handler_parsing() {
        let handler = HandlerRef::parse("src/api/handler.main").unwrap();
        assert_eq!(handler.file, "src/api/handler");
        assert_eq!(handler.export, "main");
        assert_eq!(handler.to_string(), "src/api/handler.main");

        assert!(HandlerRef::parse("handler").is_err());
        assert!(HandlerRef::parse(".main").is_err());
        assert!(HandlerRef::parse("handler.").is_err());
    }

    #[test]
    fn test_handler_resolution() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.mjs"), "export const handler = () => {}").unwrap();

        let handler = HandlerRef::parse("index.handler").unwrap();
        let exts = vec!["js".to_string(), "mjs".to_string()];
        assert_eq!(handler.resolve(dir.path(), &exts), Some(dir.path().join("index.mjs")));
        assert_eq!(handler.resolve(dir.path(), &["py".to_string()]), None);
    }
}
