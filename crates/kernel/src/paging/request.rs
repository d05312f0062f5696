//! Request and response bodies of listing endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Filter;
use crate::sort::SortItem;

/// One page request. `next` cursors are values of this same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitedFilteredRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_filter: Option<Filter>,
    #[serde(default)]
    pub sort: Vec<SortItem>,
    /// Kept as sent and validated against the caller's maximum when the
    /// page is fetched, so any bad value is reported on `limit`.
    #[serde(default)]
    pub limit: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl LimitedFilteredRequest {
    pub fn new(limit: i64) -> Self {
        Self {
            filter: None,
            page_filter: None,
            sort: Vec::new(),
            limit: Value::from(limit),
            search: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortItem>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// Count request: a page request without paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountFilteredRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl From<&LimitedFilteredRequest> for CountFilteredRequest {
    fn from(request: &LimitedFilteredRequest) -> Self {
        Self {
            filter: request.filter.clone(),
            search: request.search.clone(),
        }
    }
}

/// A page of results plus the request for the following page, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T, Q> {
    pub results: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Q>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}
