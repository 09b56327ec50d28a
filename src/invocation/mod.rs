//! # Invocation Module
//!
//! Everything between a matched route and an HTTP response:
//!
//! 1. `event` translates the request into the payload 2.0 event
//! 2. `dispatcher` leases a sandbox from `sandbox` and runs the event through
//!    the runtime shim via the `engine`
//! 3. `response` translates the output (or the failure) back into HTTP
//!
//! `runtime` maps runtime identifiers to images and shim commands.

pub mod dispatcher;
pub mod engine;
pub mod event;
pub mod response;
pub mod runtime;
pub mod sandbox;

pub use dispatcher::Dispatcher;
pub use engine::{ContainerEngine, ContainerId, DockerEngine, ExecOutput, SandboxSpec};
pub use event::{build_event, InboundRequest, InvocationEvent, RequestMeta};
pub use response::{InvocationFailure, InvocationResult};
pub use runtime::{RuntimeRegistry, RuntimeSpec};
pub use sandbox::{PoolStats, SandboxPool};
