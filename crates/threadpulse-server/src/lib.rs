pub mod routes;
pub mod state;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Which endpoints a listener exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// `/analyze` and `/cache`.
    Analysis,
    /// `/chat`.
    Chat,
    /// Everything on one listener.
    All,
}

pub fn create_router(state: AppState, role: ServiceRole) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes = match role {
        ServiceRole::Analysis => routes::analysis_router(),
        ServiceRole::Chat => routes::chat_router(),
        ServiceRole::All => routes::analysis_router().merge(routes::chat_router()),
    };

    routes
        .merge(routes::health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, role: ServiceRole, addr: &str) -> Result<()> {
    let app = create_router(state, role);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("threadpulse-server ({role:?}) listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
