use axum::{extract::State, routing::post, Json, Router};
use threadpulse_schema::{ChatRequest, ChatResponse};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Json<ChatResponse> {
    tracing::debug!(
        "Chat request: {} chars, {} history messages",
        req.user_input.len(),
        req.chat_history.len()
    );
    Json(state.chat.respond(&req.user_input, req.chat_history).await)
}
