//! Prometheus metrics collection.
//!
//! Provides application metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Path label for requests that matched no route.
pub const UNMATCHED_PATH: &str = "<unmatched>";

/// Listing query labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EntityLabels {
    pub entity: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// HTTP request counter by method/path/status.
    pub http_requests: Family<HttpLabels, Counter>,

    /// HTTP request duration histogram.
    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Listing query duration by entity.
    pub query_duration_seconds: Family<EntityLabels, Histogram>,

    /// Queries cancelled by the statement timeout.
    pub query_timeouts: Family<EntityLabels, Counter>,

    /// Requests rejected while compiling filters or sorts.
    pub filter_rejections: Family<EntityLabels, Counter>,

    /// Pages whose continuation was suppressed by the loop guard.
    pub pagination_loops: Family<EntityLabels, Counter>,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let query_duration_seconds =
            Family::<EntityLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0001, 2.0, 18))
            });
        registry.register(
            "listing_query_duration_seconds",
            "Listing query duration in seconds",
            query_duration_seconds.clone(),
        );

        let query_timeouts = Family::<EntityLabels, Counter>::default();
        registry.register(
            "listing_query_timeouts",
            "Listing queries cancelled by the statement timeout",
            query_timeouts.clone(),
        );

        let filter_rejections = Family::<EntityLabels, Counter>::default();
        registry.register(
            "filter_rejections",
            "Requests rejected by the filter or sort compiler",
            filter_rejections.clone(),
        );

        let pagination_loops = Family::<EntityLabels, Counter>::default();
        registry.register(
            "pagination_loops",
            "Pages whose next cursor repeated the current one",
            pagination_loops.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            query_duration_seconds,
            query_timeouts,
            filter_rejections,
            pagination_loops,
        }
    }

    /// Record an HTTP request.
    ///
    /// `path` is a route template or [`UNMATCHED_PATH`], never a raw URI.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a finished listing query.
    pub fn record_query(&self, entity: &str, duration_secs: f64) {
        self.query_duration_seconds
            .get_or_create(&entity_labels(entity))
            .observe(duration_secs);
    }

    pub fn record_timeout(&self, entity: &str) {
        self.query_timeouts.get_or_create(&entity_labels(entity)).inc();
    }

    pub fn record_filter_rejection(&self, entity: &str) {
        self.filter_rejections
            .get_or_create(&entity_labels(entity))
            .inc();
    }

    pub fn record_pagination_loop(&self, entity: &str) {
        self.pagination_loops
            .get_or_create(&entity_labels(entity))
            .inc();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Panics
    ///
    /// Panics if Prometheus metric encoding to a `String` buffer fails.
    /// The `fmt::Write` impl for `String` is infallible, and all metric
    /// labels use derived `EncodeLabelSet` impls that do not produce
    /// `fmt::Error`.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

fn entity_labels(entity: &str) -> EntityLabels {
    EntityLabels {
        entity: entity.to_string(),
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}
