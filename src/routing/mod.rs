//! # Routing Module
//!
//! The immutable route table mapping HTTP requests to functions.

pub mod router;

pub use router::{RouteEntry, RouteMatch, RouteTable};
