//! # Gateway Module
//!
//! The HTTP front: binds the listener and drives each request through the
//! route table, the translators and the dispatcher.

pub mod server;

pub use server::{build_app, GatewayContext, GatewayServer};
