#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests drive the REAL kernel router and page service. Rows live in a
//! [`MemoryRowSource`] so no database is needed; the source answers every
//! plan with the same filter and ordering rules the SQL compiler emits.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use roster_kernel::auth::{FULL_ACCESS_HEADER, ORGANIZATION_HEADER, PLATFORM_ACCESS_HEADER};
use roster_kernel::config::PlatformSettings;
use roster_kernel::paging::MemoryRowSource;
use roster_kernel::routes;
use roster_kernel::state::AppState;

/// Who a test request is sent as.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    Platform,
    Organization(&'a str),
    /// Organization caller allowed to see personal data.
    FullAccess(&'a str),
    Anonymous,
}

impl Caller<'_> {
    fn headers(&self) -> Vec<(&'static str, String)> {
        match *self {
            Caller::Platform => vec![(PLATFORM_ACCESS_HEADER, "true".to_string())],
            Caller::Organization(id) => vec![(ORGANIZATION_HEADER, id.to_string())],
            Caller::FullAccess(id) => vec![
                (ORGANIZATION_HEADER, id.to_string()),
                (FULL_ACCESS_HEADER, "true".to_string()),
            ],
            Caller::Anonymous => Vec::new(),
        }
    }
}

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub source: Arc<MemoryRowSource>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(PlatformSettings::default())
    }

    pub fn with_settings(settings: PlatformSettings) -> Self {
        let source = Arc::new(MemoryRowSource::new());
        let state = AppState::with_source(source.clone(), settings)
            .expect("Failed to create test state");
        let router = routes::app(state.clone());
        Self {
            router,
            source,
            state,
        }
    }

    /// Load rows into `table`.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.source.extend(table, rows);
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post(&self, path: &str, caller: Caller<'_>, body: &Value) -> (StatusCode, Value) {
        post_json(&self.router, path, caller, body).await
    }

    pub async fn query(&self, entity: &str, caller: Caller<'_>, body: &Value) -> (StatusCode, Value) {
        self.post(&format!("/api/{entity}/query"), caller, body).await
    }

    pub async fn count(&self, entity: &str, caller: Caller<'_>, body: &Value) -> (StatusCode, Value) {
        self.post(&format!("/api/{entity}/count"), caller, body).await
    }

    /// Follow `next` from `first` until the last page and return every
    /// page's results.
    pub async fn all_pages(&self, entity: &str, caller: Caller<'_>, first: Value) -> Vec<Vec<Value>> {
        all_pages(&self.router, entity, caller, first).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// POST a JSON body to `router` and decode the JSON response.
pub async fn post_json(router: &Router, path: &str, caller: Caller<'_>, body: &Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in caller.headers() {
        builder = builder.header(name, value);
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to send request");
    let status = response.status();
    (status, read_json(response).await)
}

/// Follow `next` from `first` until the last page and return every page's
/// results.
pub async fn all_pages(router: &Router, entity: &str, caller: Caller<'_>, first: Value) -> Vec<Vec<Value>> {
    let path = format!("/api/{entity}/query");
    let mut pages = Vec::new();
    let mut request = Some(first);
    while let Some(body) = request.take() {
        let (status, page) = post_json(router, &path, caller, &body).await;
        assert_eq!(status, StatusCode::OK, "{page}");
        pages.push(page["results"].as_array().cloned().unwrap_or_default());
        request = page.get("next").cloned();
        assert!(pages.len() < 1000, "pagination did not terminate");
    }
    pages
}

/// Decode a response body as JSON; an empty body is `null`.
pub async fn read_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
}

/// The `id` of every row, in order.
pub fn ids(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .map(|row| row["id"].as_str().expect("row without id").to_string())
        .collect()
}
