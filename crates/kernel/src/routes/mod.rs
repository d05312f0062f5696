//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod query;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router with its middleware.
///
/// CORS depends on deployment configuration and is layered on by the
/// binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(query::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
