//! # Beeline Core
//!
//! Job model, store contract, and error definitions for the Beeline job
//! queue. Everything above the store (the lease engine, the HTTP API,
//! worker clients) builds on the types in this crate.

pub mod error;
pub mod job;
pub mod store;

pub use error::*;
pub use job::*;
pub use store::*;
