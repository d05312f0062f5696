//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::{Config, PlatformSettings};
use crate::db;
use crate::entities::{EntityDefinition, EntityRegistry};
use crate::metrics::Metrics;
use crate::paging::{PageService, PgRowSource, RowSource};
use crate::snapshot::SnapshotStore;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Listing entities by route name.
    entities: EntityRegistry,

    /// Limits and timeouts, swappable at runtime.
    settings: SnapshotStore<PlatformSettings>,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,

    /// Query execution for every listing route.
    pages: PageService,
}

impl AppState {
    /// Create application state backed by PostgreSQL.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config)
            .await
            .context("failed to create database pool")?;

        info!(
            max_limit = config.max_limit,
            platform_max_limit = config.platform_max_limit,
            query_timeout_ms = config.query_timeout_ms,
            "database pool ready"
        );

        Self::with_pool(pool, config.platform_settings())
    }

    /// Create application state over an existing PostgreSQL pool.
    pub fn with_pool(pool: PgPool, settings: PlatformSettings) -> Result<Self> {
        let settings = SnapshotStore::new(settings);
        let source = PgRowSource::new(pool, settings.clone());
        Self::build(Arc::new(source), settings)
    }

    /// Create application state over any row source.
    pub fn with_source(source: Arc<dyn RowSource>, settings: PlatformSettings) -> Result<Self> {
        Self::build(source, SnapshotStore::new(settings))
    }

    fn build(source: Arc<dyn RowSource>, settings: SnapshotStore<PlatformSettings>) -> Result<Self> {
        let entities = EntityRegistry::builtin().context("invalid entity definition")?;
        let metrics = Arc::new(Metrics::new());
        let pages = PageService::new(source, Arc::clone(&metrics));

        info!(
            entities = ?entities.names().collect::<Vec<_>>(),
            "entity registry loaded"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                entities,
                settings,
                metrics,
                pages,
            }),
        })
    }

    pub fn entity(&self, name: &str) -> Option<&'static EntityDefinition> {
        self.inner.entities.get(name)
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.inner.entities
    }

    /// Get the platform settings store.
    pub fn settings(&self) -> &SnapshotStore<PlatformSettings> {
        &self.inner.settings
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn pages(&self) -> &PageService {
        &self.inner.pages
    }

    /// Check if the row source is reachable.
    pub async fn postgres_healthy(&self) -> bool {
        self.inner.pages.source().healthy().await
    }
}
