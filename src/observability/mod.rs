//! # Observability Module
//!
//! Structured logging setup and the gateway's metric series.

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
