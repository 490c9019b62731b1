use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::delete,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateParams {
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResult {
    pub status: &'static str,
    pub removed: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/cache", delete(invalidate))
}

/// With both parameters, drop that one entry; with neither, drop everything.
async fn invalidate(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<InvalidateResult>, StatusCode> {
    let cache = state.pipeline.cache();
    let removed = match (params.subreddit, params.topic) {
        (Some(subreddit), Some(topic)) => usize::from(cache.invalidate(&subreddit, &topic)),
        (None, None) => cache.clear(),
        _ => return Err(StatusCode::BAD_REQUEST),
    };
    tracing::info!("Cache invalidated, {removed} entries removed");
    Ok(Json(InvalidateResult {
        status: "cleared",
        removed,
    }))
}
