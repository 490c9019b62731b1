use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use threadpulse_schema::AnalyzeResponse;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/analyze", get(analyze))
}

async fn analyze(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> (StatusCode, Json<AnalyzeResponse>) {
    let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(subreddit), Some(topic)) = (present(params.subreddit), present(params.topic)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AnalyzeResponse::Error {
                message: "Both 'subreddit' and 'topic' query parameters are required.".into(),
            }),
        );
    };

    let report = state.pipeline.report(&subreddit, &topic).await;
    if !report.is_success() {
        tracing::info!("No analysis data for r/{subreddit} '{topic}'");
    }
    (StatusCode::OK, Json(report))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use axum::body::Body;
    use axum::http::Request;
    use threadpulse_classifier::ClassifierHandle;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::test_support::{json_body, ready_state, state};

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn analyze_returns_success_envelope() {
        let (state, _) = ready_state(3);
        let app = router().with_state(state);

        let response = app
            .oneshot(get_request("/analyze?subreddit=apple&topic=iPhone%2016"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["query"]["subreddit"], "apple");
        assert_eq!(body["query"]["topic"], "iPhone 16");
        assert_eq!(body["results_count"], 3);
        assert_eq!(body["analysis_source"], "fixed-positive");
        assert_eq!(body["data"][0]["id"], "p_0");
        assert_eq!(body["data"][0]["sentiment"], "positive");
        assert!(body["data"][0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn no_data_returns_error_envelope_with_ok_status() {
        let (state, _) = ready_state(0);
        let app = router().with_state(state);

        let response = app
            .oneshot(get_request("/analyze?subreddit=apple&topic=nothing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(
            body["message"],
            "Could not fetch data or model failed to load."
        );
    }

    #[tokio::test]
    async fn unavailable_classifier_still_returns_items() {
        let (state, _) = state(2, ClassifierHandle::unavailable("no model"));
        let app = router().with_state(state);

        let response = app
            .oneshot(get_request("/analyze?subreddit=apple&topic=iPhone"))
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["analysis_source"], "unavailable");
        assert_eq!(body["data"][1]["sentiment"], "unavailable");
        assert_eq!(body["data"][1]["aspect"], "N/A");
    }

    #[tokio::test]
    async fn missing_topic_is_bad_request() {
        let (state, source) = ready_state(3);
        let app = router().with_state(state);

        let response = app
            .oneshot(get_request("/analyze?subreddit=apple"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let (state, source) = ready_state(3);
        let app = router().with_state(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get_request("/analyze?subreddit=apple&topic=iPhone"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }
}
