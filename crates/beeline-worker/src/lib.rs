//! # Beeline Worker
//!
//! Polling worker client for the Beeline job queue: leases jobs over
//! HTTP, dispatches them to registered handlers, heartbeats long jobs,
//! and reports completion or failure.

pub mod client;
pub mod worker;

pub use client::{LeasedJob, QueueClient};
pub use worker::{JobFailure, JobHandler, Worker, WorkerConfig};
