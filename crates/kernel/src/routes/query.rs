//! Listing and count endpoints for every registered entity.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::post,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::entities::EntityDefinition;
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::paging::{CountFilteredRequest, CountResponse, LimitedFilteredRequest, PaginatedResponse};
use crate::state::AppState;

/// Create the listing router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/{entity}/query", post(query))
        .route("/api/{entity}/count", post(count))
}

async fn query(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    auth: AuthContext,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<PaginatedResponse<Value, LimitedFilteredRequest>>> {
    let entity = lookup(&state, &entity)?;
    let request: LimitedFilteredRequest = decode(body)?;
    let settings = state.settings().current();

    let page = state
        .pages()
        .fetch_page(entity, &auth, &settings.value, request)
        .await?;
    Ok(Json(page))
}

async fn count(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    auth: AuthContext,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<CountResponse>> {
    let entity = lookup(&state, &entity)?;
    let request: CountFilteredRequest = decode(body)?;

    let count = state.pages().count(entity, &auth, &request).await?;
    Ok(Json(CountResponse { count }))
}

fn lookup(state: &AppState, name: &str) -> AppResult<&'static EntityDefinition> {
    state.entity(name).ok_or(AppError::NotFound)
}

/// Decode a request body.
///
/// Filters are parsed on their own first so a malformed filter is reported
/// as `invalid_filter` rather than as a generic decoding error.
fn decode<T: DeserializeOwned>(body: Result<Json<Value>, JsonRejection>) -> AppResult<T> {
    let Json(body) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    for key in ["filter", "pageFilter"] {
        if let Some(filter) = body.get(key).filter(|v| !v.is_null()) {
            Filter::from_json(filter)?;
        }
    }
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))
}
