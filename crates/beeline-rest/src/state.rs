//! Shared application state for HTTP handlers.

use beeline_queue::QueueService;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The queue service facade.
    pub queue: Arc<QueueService>,
}

impl AppState {
    /// Creates application state over a queue service.
    #[must_use]
    pub fn new(queue: Arc<QueueService>) -> Self {
        Self { queue }
    }
}
