pub mod analyze;
pub mod cache;
pub mod chat;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn analysis_router() -> Router<AppState> {
    Router::new()
        .merge(analyze::router())
        .merge(cache::router())
}

pub fn chat_router() -> Router<AppState> {
    chat::router()
}
