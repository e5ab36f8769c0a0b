//! # Beeline REST
//!
//! Axum HTTP boundary for the Beeline job queue: the worker lease
//! protocol, job submission and inspection, health checks, and the
//! OpenAPI document.

pub mod controllers;
pub mod middleware;
pub mod openapi;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
