use std::sync::Arc;

use threadpulse_core::{AnalysisPipeline, AppContext, ChatAgent};

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owns the query cache and classifier for the process lifetime.
    pub pipeline: Arc<AnalysisPipeline>,
    pub chat: Arc<ChatAgent>,
}

impl From<AppContext> for AppState {
    fn from(ctx: AppContext) -> Self {
        Self {
            pipeline: ctx.pipeline,
            chat: ctx.chat,
        }
    }
}
