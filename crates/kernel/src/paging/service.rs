//! Paginated query assembly shared by every listing endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::auth::AuthContext;
use crate::config::PlatformSettings;
use crate::entities::{EntityDefinition, TIEBREAKER};
use crate::error::{AppError, AppResult};
use crate::filter::{Filter, FilterError};
use crate::metrics::Metrics;
use crate::sort::{SortItem, assert_sort, sort_filter};

use super::plan::{FilterPart, QueryPlan};
use super::request::{CountFilteredRequest, LimitedFilteredRequest, PaginatedResponse};
use super::source::RowSource;

/// Runs listing and count queries for any registered entity.
#[derive(Clone)]
pub struct PageService {
    source: Arc<dyn RowSource>,
    metrics: Arc<Metrics>,
}

impl PageService {
    pub fn new(source: Arc<dyn RowSource>, metrics: Arc<Metrics>) -> Self {
        Self { source, metrics }
    }

    pub fn source(&self) -> &Arc<dyn RowSource> {
        &self.source
    }

    /// Fetch one page and the request for the page after it.
    ///
    /// Filters are ANDed as scope, filter, search, then page filter. The
    /// sort always ends in the tiebreaker, and `next` is only present when
    /// the page came back full.
    pub async fn fetch_page(
        &self,
        entity: &'static EntityDefinition,
        auth: &AuthContext,
        settings: &PlatformSettings,
        request: LimitedFilteredRequest,
    ) -> AppResult<PaginatedResponse<Value, LimitedFilteredRequest>> {
        let limit = check_limit(&request.limit, auth.max_limit(settings))?;

        let mut parts = self.filter_parts(entity, auth, request.filter.as_ref(), request.search.as_deref())?;
        if let Some(page_filter) = &request.page_filter {
            parts.push(FilterPart::new(page_filter.clone(), &entity.page_filters));
        }
        let sort = assert_sort(request.sort.clone(), TIEBREAKER);

        let plan = QueryPlan::rows(entity, parts, sort, limit).map_err(|e| self.rejected(entity, e))?;
        debug!(entity = entity.name, sql = %plan.to_sql(), "listing query planned");

        let rows = self.timed(entity, self.source.fetch(&plan)).await?;

        let next = if rows.len() as u64 >= limit {
            self.next_request(entity, &request, plan.sort(), rows.last())?
        } else {
            None
        };

        let results = rows
            .into_iter()
            .map(|row| (entity.present)(row, auth))
            .collect();
        Ok(PaginatedResponse { results, next })
    }

    /// Number of rows the caller would see for `request`, ignoring paging.
    pub async fn count(
        &self,
        entity: &'static EntityDefinition,
        auth: &AuthContext,
        request: &CountFilteredRequest,
    ) -> AppResult<u64> {
        let parts = self.filter_parts(entity, auth, request.filter.as_ref(), request.search.as_deref())?;
        let plan = QueryPlan::count(entity, parts).map_err(|e| self.rejected(entity, e))?;
        self.timed(entity, self.source.count(&plan)).await
    }

    /// Scope, user filter and search, all against the full filter table.
    fn filter_parts(
        &self,
        entity: &'static EntityDefinition,
        auth: &AuthContext,
        filter: Option<&Filter>,
        search: Option<&str>,
    ) -> AppResult<Vec<FilterPart<'static>>> {
        let mut parts = Vec::with_capacity(4);
        if let Some(scope) = (entity.scope)(auth)? {
            parts.push(FilterPart::new(scope, &entity.filters));
        }
        if let Some(filter) = filter {
            parts.push(FilterPart::new(filter.clone(), &entity.filters));
        }
        if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
            let Some(expand) = entity.search else {
                return Err(AppError::SearchNotSupported {
                    entity: entity.name.to_string(),
                });
            };
            parts.push(FilterPart::new(expand(search), &entity.filters));
        }
        Ok(parts)
    }

    fn next_request(
        &self,
        entity: &EntityDefinition,
        request: &LimitedFilteredRequest,
        sort: &[SortItem],
        last: Option<&Value>,
    ) -> AppResult<Option<LimitedFilteredRequest>> {
        let Some(last) = last else {
            return Ok(None);
        };
        let page_filter = sort_filter(last, &entity.sorters, sort)?;

        if request.page_filter.as_ref() == Some(&page_filter) {
            error!(
                entity = entity.name,
                page_filter = %page_filter.to_json(),
                "pagination did not advance; dropping next page"
            );
            self.metrics.record_pagination_loop(entity.name);
            return Ok(None);
        }

        Ok(Some(LimitedFilteredRequest {
            filter: request.filter.clone(),
            page_filter: Some(page_filter),
            sort: sort.to_vec(),
            limit: request.limit.clone(),
            search: request.search.clone(),
        }))
    }

    async fn timed<T>(
        &self,
        entity: &EntityDefinition,
        query: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        let started = Instant::now();
        let result = query.await;
        self.metrics
            .record_query(entity.name, started.elapsed().as_secs_f64());
        if matches!(result, Err(AppError::Timeout)) {
            warn!(entity = entity.name, "listing query timed out");
            self.metrics.record_timeout(entity.name);
        }
        result
    }

    fn rejected(&self, entity: &EntityDefinition, error: FilterError) -> AppError {
        debug!(entity = entity.name, error = %error, "filter rejected");
        self.metrics.record_filter_rejection(entity.name);
        AppError::Filter(error)
    }
}

impl std::fmt::Debug for PageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageService").finish_non_exhaustive()
    }
}

fn check_limit(limit: &Value, max: u64) -> AppResult<u64> {
    let invalid = |message: String| AppError::InvalidField {
        field: "limit".to_string(),
        message,
    };
    let too_small = || invalid("Limit can not be less than 1".to_string());
    let too_large = || invalid(format!("Limit can not be more than {max}"));

    let Value::Number(number) = limit else {
        return Err(if limit.is_null() {
            invalid("Limit is required".to_string())
        } else {
            invalid("Limit must be a number".to_string())
        });
    };
    if let Some(limit) = number.as_u64() {
        return match limit {
            0 => Err(too_small()),
            limit if limit > max => Err(too_large()),
            limit => Ok(limit),
        };
    }
    if number.as_i64().is_some() {
        return Err(too_small());
    }
    match number.as_f64() {
        Some(f) if f.fract() != 0.0 => Err(invalid("Limit must be a whole number".to_string())),
        Some(f) if f < 1.0 => Err(too_small()),
        Some(f) if f <= max as f64 => Ok(f as u64),
        _ => Err(too_large()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entities::{MEMBERS, ORGANIZATIONS, PAYMENTS};
    use crate::filter::CompareOp;
    use crate::paging::source::MemoryRowSource;
    use serde_json::json;

    fn service(source: MemoryRowSource) -> (PageService, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (PageService::new(Arc::new(source), Arc::clone(&metrics)), metrics)
    }

    fn organizations() -> MemoryRowSource {
        let source = MemoryRowSource::new();
        source.extend(
            "organizations",
            [
                json!({ "id": "1", "name": "Scouts" }),
                json!({ "id": "2", "name": "Chiro" }),
                json!({ "id": "3", "name": "Scoutsgroep" }),
                json!({ "id": "4", "name": "Akabe" }),
            ],
        );
        source
    }

    fn ids(results: &[Value]) -> Vec<&str> {
        results.iter().map(|row| row["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(check_limit(&json!(1), 100).unwrap(), 1);
        assert_eq!(check_limit(&json!(100), 100).unwrap(), 100);
        assert_eq!(check_limit(&json!(5.0), 100).unwrap(), 5);

        let err = check_limit(&json!(0), 100).unwrap_err();
        assert_eq!(err.to_string(), "Limit can not be less than 1");
        let err = check_limit(&json!(101), 100).unwrap_err();
        assert_eq!(err.to_string(), "Limit can not be more than 100");
        assert_eq!(err.code(), "invalid_field");
    }

    #[test]
    fn malformed_limits_are_field_errors() {
        for (limit, message) in [
            (json!(-5), "Limit can not be less than 1"),
            (json!(0.5), "Limit must be a whole number"),
            (json!(2.5), "Limit must be a whole number"),
            (json!(1e20), "Limit can not be more than 100"),
            (json!(-1e20), "Limit can not be less than 1"),
            (json!(u64::MAX), "Limit can not be more than 100"),
            (json!("ten"), "Limit must be a number"),
            (Value::Null, "Limit is required"),
        ] {
            let err = check_limit(&limit, 100).unwrap_err();
            assert_eq!(err.code(), "invalid_field", "{limit}");
            assert_eq!(err.to_string(), message, "{limit}");
        }
    }

    #[tokio::test]
    async fn full_page_has_next_and_last_page_does_not() {
        let (service, _) = service(organizations());
        let request = LimitedFilteredRequest::new(2)
            .with_filter(Filter::contains("name", "Sc"))
            .with_sort(vec![SortItem::asc("id")]);

        let page = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &PlatformSettings::default(), request)
            .await
            .unwrap();
        assert_eq!(ids(&page.results), vec!["1", "3"]);
        let next = page.next.unwrap();
        assert_eq!(next.page_filter, Some(Filter::compare("id", CompareOp::Gt, "3")));
        assert_eq!(next.filter, Some(Filter::contains("name", "Sc")));

        let page = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &PlatformSettings::default(), next)
            .await
            .unwrap();
        assert!(page.results.is_empty());
        assert!(page.next.is_none());
    }

    /// Ignores every filter, so the same page comes back forever.
    struct StuckSource(Vec<Value>);

    #[async_trait::async_trait]
    impl RowSource for StuckSource {
        async fn fetch(&self, _plan: &QueryPlan<'_>) -> AppResult<Vec<Value>> {
            Ok(self.0.clone())
        }

        async fn count(&self, _plan: &QueryPlan<'_>) -> AppResult<u64> {
            Ok(self.0.len() as u64)
        }
    }

    #[tokio::test]
    async fn repeated_cursor_is_dropped() {
        let metrics = Arc::new(Metrics::new());
        let source = StuckSource(vec![json!({ "id": "1", "name": "Scouts" })]);
        let service = PageService::new(Arc::new(source), Arc::clone(&metrics));
        let settings = PlatformSettings::default();

        let first = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &settings, LimitedFilteredRequest::new(1))
            .await
            .unwrap();
        let next = first.next.unwrap();
        assert_eq!(next.page_filter, Some(Filter::compare("id", CompareOp::Gt, "1")));
        assert_eq!(next.sort, vec![SortItem::asc("id")]);

        let second = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &settings, next)
            .await
            .unwrap();
        assert_eq!(ids(&second.results), vec!["1"]);
        assert!(second.next.is_none());
        assert!(metrics
            .encode()
            .contains("pagination_loops_total{entity=\"organizations\"} 1"));
    }

    #[tokio::test]
    async fn unknown_field_is_rejected_and_counted() {
        let (service, metrics) = service(organizations());
        let request = LimitedFilteredRequest::new(10).with_filter(Filter::eq("password", "x"));
        let err = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &PlatformSettings::default(), request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Filter(FilterError::UnknownField { .. })));
        assert!(metrics
            .encode()
            .contains("filter_rejections_total{entity=\"organizations\"} 1"));
    }

    #[tokio::test]
    async fn organization_callers_are_scoped() {
        let source = MemoryRowSource::new();
        source.extend(
            "members",
            [
                json!({ "id": "m1", "organization_id": "o1", "first_name": "Ann", "last_name": "A", "email": "ann@example.com" }),
                json!({ "id": "m2", "organization_id": "o2", "first_name": "Bob", "last_name": "B", "email": "bob@example.com" }),
            ],
        );
        let (service, _) = service(source);
        let request = LimitedFilteredRequest::new(10).with_filter(Filter::eq("organizationId", "o2"));

        let page = service
            .fetch_page(&MEMBERS, &AuthContext::organization("o1"), &PlatformSettings::default(), request)
            .await
            .unwrap();
        assert!(page.results.is_empty());

        let count = service
            .count(&MEMBERS, &AuthContext::organization("o1"), &CountFilteredRequest::default())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let err = service
            .count(&MEMBERS, &AuthContext::default(), &CountFilteredRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn presenter_redacts_results() {
        let source = MemoryRowSource::new();
        source.insert(
            "members",
            json!({ "id": "m1", "organization_id": "o1", "first_name": "Ann", "last_name": "A", "email": "ann@example.com" }),
        );
        let (service, _) = service(source);

        let page = service
            .fetch_page(&MEMBERS, &AuthContext::organization("o1"), &PlatformSettings::default(), LimitedFilteredRequest::new(10))
            .await
            .unwrap();
        assert!(page.results[0].get("email").is_none());

        let page = service
            .fetch_page(
                &MEMBERS,
                &AuthContext::organization("o1").with_full_access(),
                &PlatformSettings::default(),
                LimitedFilteredRequest::new(10),
            )
            .await
            .unwrap();
        assert_eq!(page.results[0]["email"], "ann@example.com");
    }

    #[tokio::test]
    async fn search_requires_a_hook() {
        let (service, _) = service(MemoryRowSource::new());
        let err = service
            .count(
                &PAYMENTS,
                &AuthContext::platform(),
                &CountFilteredRequest {
                    filter: None,
                    search: Some("card".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "search_not_supported");

        // Blank searches are ignored.
        let count = service
            .count(
                &PAYMENTS,
                &AuthContext::platform(),
                &CountFilteredRequest {
                    filter: None,
                    search: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn platform_callers_get_the_larger_limit() {
        let (service, _) = service(MemoryRowSource::new());
        let settings = PlatformSettings::default();

        let err = service
            .fetch_page(&ORGANIZATIONS, &AuthContext::organization("o1"), &settings, LimitedFilteredRequest::new(500))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_field");

        service
            .fetch_page(&ORGANIZATIONS, &AuthContext::platform(), &settings, LimitedFilteredRequest::new(500))
            .await
            .unwrap();
    }
}
