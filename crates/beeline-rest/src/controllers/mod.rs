//! REST API controllers.

pub mod health_controller;
pub mod jobs_controller;
pub mod queue_controller;
