//! # Function Gateway - Core Library Crate
//!
//! A local emulator of an HTTP API gateway (payload format 2.0) in front of
//! containerized function handlers. Requests are matched against routes
//! declared in a service manifest, translated into invocation events and run
//! inside per-function sandbox containers.
//!
//! ## Request Flow
//!
//! 1. `gateway` accepts the HTTP request
//! 2. `routing` matches it to a function and extracts path parameters
//! 3. `invocation::event` builds the payload 2.0 event
//! 4. `invocation::dispatcher` leases a sandbox and runs the handler
//! 5. `invocation::response` turns the handler output into the HTTP response

/// Errors, settings, the service manifest and function descriptors
pub mod core;

/// HTTP front
pub mod gateway;

/// Sandboxes, dispatch and the request/response translators
pub mod invocation;

/// Logging setup and metric recording
pub mod observability;

/// Route table with path parameter extraction
pub mod routing;

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{FunctionDescriptor, HandlerRef, RouteBinding, RouteMethod};
pub use gateway::server::{GatewayContext, GatewayServer};
pub use invocation::{ContainerEngine, DockerEngine, RuntimeRegistry, SandboxPool};
pub use routing::router::RouteTable;
