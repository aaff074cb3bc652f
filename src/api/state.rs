use crate::pipeline::Pipeline;
use crate::window::Lookback;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Lookback applied when a filter update does not name one.
    pub default_days: Lookback,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, default_days: Lookback) -> Self {
        Self { pipeline, default_days }
    }
}
