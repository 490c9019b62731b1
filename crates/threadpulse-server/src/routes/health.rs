use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub classifier: &'static str,
    pub chat: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

fn readiness(ready: bool) -> &'static str {
    if ready {
        "ready"
    } else {
        "unavailable"
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        classifier: readiness(state.pipeline.classifier().is_available()),
        chat: readiness(state.chat.is_available()),
    })
}
