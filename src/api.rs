//! HTTP API over the conversation pipeline

mod handlers;
mod types;

pub use handlers::create_router;

use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}
