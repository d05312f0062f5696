//! Row sources: where compiled listing queries are executed.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use sea_query::{Value as SqlValue, Values};
use serde_json::Value;
use sqlx::{PgPool, Transaction};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use tracing::debug;

use crate::config::PlatformSettings;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::snapshot::SnapshotStore;
use crate::sort::compare_rows;

use super::plan::{PlanKind, QueryPlan};

/// Executes query plans and returns raw rows as JSON objects.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Rows matching a [`PlanKind::Rows`] plan, in sort order.
    async fn fetch(&self, plan: &QueryPlan<'_>) -> AppResult<Vec<Value>>;

    /// Number of rows matching a plan's filters.
    async fn count(&self, plan: &QueryPlan<'_>) -> AppResult<u64>;

    /// Whether the backing store is reachable.
    async fn healthy(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Runs plans against PostgreSQL, one short transaction per query with
/// `statement_timeout` taken from the current settings snapshot.
pub struct PgRowSource {
    pool: PgPool,
    settings: SnapshotStore<PlatformSettings>,
}

impl PgRowSource {
    pub fn new(pool: PgPool, settings: SnapshotStore<PlatformSettings>) -> Self {
        Self { pool, settings }
    }

    /// Start a transaction with the statement timeout applied.
    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        let timeout_ms = self.settings.current().value.query_timeout_ms;
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

fn query_error(error: sqlx::Error) -> AppError {
    if db::is_query_canceled(&error) {
        AppError::Timeout
    } else {
        AppError::Database(error)
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch(&self, plan: &QueryPlan<'_>) -> AppResult<Vec<Value>> {
        let started = Instant::now();

        let mut tx = self.begin().await?;
        let rows = bind_values(sqlx::query_scalar::<_, Value>(plan.sql()), plan.values())?
            .fetch_all(&mut *tx)
            .await
            .map_err(query_error)?;
        tx.commit().await?;

        debug!(
            entity = plan.entity().name,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "listing query executed"
        );
        Ok(rows)
    }

    async fn count(&self, plan: &QueryPlan<'_>) -> AppResult<u64> {
        let mut tx = self.begin().await?;
        let count = bind_values(sqlx::query_scalar::<_, i64>(plan.sql()), plan.values())?
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error)?;
        tx.commit().await?;

        debug!(entity = plan.entity().name, count, "count query executed");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn healthy(&self) -> bool {
        db::check_health(&self.pool).await
    }
}

/// Bind SeaQuery values to a sqlx query in placeholder order.
fn bind_values<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    values: &Values,
) -> AppResult<QueryScalar<'q, Postgres, O, PgArguments>> {
    for value in values.0.iter().cloned() {
        query = match value {
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::TinyInt(v) => query.bind(v.map(i64::from)),
            SqlValue::SmallInt(v) => query.bind(v.map(i64::from)),
            SqlValue::Int(v) => query.bind(v.map(i64::from)),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::TinyUnsigned(v) => query.bind(v.map(i64::from)),
            SqlValue::SmallUnsigned(v) => query.bind(v.map(i64::from)),
            SqlValue::Unsigned(v) => query.bind(v.map(i64::from)),
            SqlValue::BigUnsigned(v) => query.bind(v.map(|n| i64::try_from(n).unwrap_or(i64::MAX))),
            SqlValue::Float(v) => query.bind(v.map(f64::from)),
            SqlValue::Double(v) => query.bind(v),
            SqlValue::String(v) => query.bind(v.map(|s| *s)),
            SqlValue::Json(v) => query.bind(v.map(|j| *j)),
            SqlValue::ChronoDateTimeUtc(v) => query.bind(v.map(|d| *d)),
            SqlValue::Uuid(v) => query.bind(v.map(|u| *u)),
            other => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "unsupported bind value {other:?}"
                )));
            }
        };
    }
    Ok(query)
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps rows in memory per table and answers plans with the in-memory
/// filter evaluator. Ordering follows the same rules as the SQL `ORDER BY`.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Value) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn extend(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    fn matching(&self, plan: &QueryPlan<'_>) -> AppResult<Vec<Value>> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(plan.entity().table) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        for row in rows {
            if plan.matches(row)? {
                matched.push(row.clone());
            }
        }
        Ok(matched)
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn fetch(&self, plan: &QueryPlan<'_>) -> AppResult<Vec<Value>> {
        let mut rows = self.matching(plan)?;
        rows.sort_by(|a, b| compare_rows(a, b, &plan.entity().sorters, plan.sort()));
        if let PlanKind::Rows { limit } = plan.kind() {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(rows)
    }

    async fn count(&self, plan: &QueryPlan<'_>) -> AppResult<u64> {
        Ok(self.matching(plan)?.len() as u64)
    }
}
