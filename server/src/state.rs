use std::sync::Arc;

use crate::broker::Broker;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// The single in-process broker owning all real-time routing state
    pub broker: Arc<Broker>,
}
