//! HTTP surface over the evaluation pipeline: ingest, listing, health.

mod routes;
pub mod state;

pub use self::routes::ApiError;

use axum::http::Method;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::state::AppState;

/// All routes live under `/api/v1`; anything else is a JSON 404.
pub fn router(state: AppState) -> Router {
    // Dashboards poll `/telemetry/latest` from the browser.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(unknown_route)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn unknown_route() -> ApiError {
    ApiError::NotFound("no such route")
}
