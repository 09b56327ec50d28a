//! # Core Module
//!
//! Foundation types shared by every other module: errors, settings, the
//! service manifest, function descriptors and the startup dependency checks.

pub mod config;
pub mod dependencies;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use manifest::ServiceManifest;
pub use types::{FunctionDescriptor, HandlerRef, RouteBinding, RouteMethod};
