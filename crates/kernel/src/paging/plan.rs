//! Compiled listing queries.
//!
//! A [`QueryPlan`] is built and validated before anything touches the
//! database: every filter part is compiled and every sort key resolved up
//! front, so a bad request fails without running SQL.

use sea_query::{Alias, Asterisk, Expr, PostgresQueryBuilder, Query, SelectStatement, Values};
use serde_json::Value;

use crate::entities::EntityDefinition;
use crate::filter::{Filter, FilterError, FilterTable, compile_filter, matches};
use crate::sort::{SortItem, apply_sorter};

/// A filter together with the table it is compiled against.
#[derive(Debug, Clone)]
pub struct FilterPart<'a> {
    pub filter: Filter,
    pub table: &'a FilterTable,
}

impl<'a> FilterPart<'a> {
    pub fn new(filter: Filter, table: &'a FilterTable) -> Self {
        Self { filter, table }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Rows { limit: u64 },
    Count,
}

/// A validated query for one entity.
///
/// The statement is rendered once when the plan is built; only the SQL
/// text and its bind values are kept, so a plan can be shared across
/// await points.
#[derive(Debug)]
pub struct QueryPlan<'a> {
    entity: &'a EntityDefinition,
    parts: Vec<FilterPart<'a>>,
    sort: Vec<SortItem>,
    kind: PlanKind,
    sql: String,
    values: Values,
    inlined: String,
}

impl<'a> QueryPlan<'a> {
    /// `SELECT to_jsonb("t".*) AS "row" FROM "t" WHERE ... ORDER BY ... LIMIT n`
    pub fn rows(
        entity: &'a EntityDefinition,
        parts: Vec<FilterPart<'a>>,
        sort: Vec<SortItem>,
        limit: u64,
    ) -> Result<Self, FilterError> {
        let mut statement = Query::select();
        statement
            .expr_as(
                Expr::cust(format!("to_jsonb(\"{}\".*)", entity.table)),
                Alias::new("row"),
            )
            .from(Alias::new(entity.table));
        Self::add_conditions(&mut statement, &parts)?;
        apply_sorter(&mut statement, &sort, &entity.sorters)?;
        statement.limit(limit);

        Ok(Self::render(entity, parts, sort, PlanKind::Rows { limit }, &statement))
    }

    /// `SELECT COUNT(*) FROM "t" WHERE ...`
    pub fn count(
        entity: &'a EntityDefinition,
        parts: Vec<FilterPart<'a>>,
    ) -> Result<Self, FilterError> {
        let mut statement = Query::select();
        statement
            .expr(Expr::col(Asterisk).count())
            .from(Alias::new(entity.table));
        Self::add_conditions(&mut statement, &parts)?;

        Ok(Self::render(entity, parts, Vec::new(), PlanKind::Count, &statement))
    }

    fn render(
        entity: &'a EntityDefinition,
        parts: Vec<FilterPart<'a>>,
        sort: Vec<SortItem>,
        kind: PlanKind,
        statement: &SelectStatement,
    ) -> Self {
        let (sql, values) = statement.build(PostgresQueryBuilder);
        Self {
            entity,
            parts,
            sort,
            kind,
            sql,
            values,
            inlined: statement.to_string(PostgresQueryBuilder),
        }
    }

    fn add_conditions(
        statement: &mut SelectStatement,
        parts: &[FilterPart<'_>],
    ) -> Result<(), FilterError> {
        for part in parts {
            statement.and_where(compile_filter(&part.filter, part.table)?);
        }
        Ok(())
    }

    pub fn entity(&self) -> &'a EntityDefinition {
        self.entity
    }

    pub fn sort(&self) -> &[SortItem] {
        &self.sort
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn limit(&self) -> Option<u64> {
        match self.kind {
            PlanKind::Rows { limit } => Some(limit),
            PlanKind::Count => None,
        }
    }

    /// Parameterized SQL (`$1`, `$2`, ...).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind values in placeholder order.
    pub fn values(&self) -> &Values {
        &self.values
    }

    /// SQL with values inlined, for logs and tests.
    pub fn to_sql(&self) -> &str {
        &self.inlined
    }

    /// Whether a raw row satisfies every filter part.
    pub fn matches(&self, row: &Value) -> Result<bool, FilterError> {
        for part in &self.parts {
            if !matches(&part.filter, part.table, row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entities::ORGANIZATIONS;
    use crate::filter::CompareOp;
    use serde_json::json;

    #[test]
    fn rows_plan_sql() {
        let entity = &*ORGANIZATIONS;
        let plan = QueryPlan::rows(
            entity,
            vec![
                FilterPart::new(Filter::contains("name", "Sc"), &entity.filters),
                FilterPart::new(
                    Filter::compare("id", CompareOp::Gt, "3"),
                    &entity.page_filters,
                ),
            ],
            vec![SortItem::asc("id")],
            2,
        )
        .unwrap();
        let sql = plan.to_sql();
        assert!(sql.starts_with("SELECT to_jsonb(\"organizations\".*) AS \"row\" FROM \"organizations\""));
        assert!(sql.contains("LOWER(\"organizations\".\"name\") LIKE"));
        assert!(sql.contains("\"organizations\".\"id\" > '3'"));
        assert!(sql.contains("ORDER BY \"organizations\".\"id\" ASC"));
        assert!(sql.ends_with("LIMIT 2"));
        assert_eq!(plan.limit(), Some(2));
    }

    #[test]
    fn rows_plan_binds_values_in_order() {
        let entity = &*ORGANIZATIONS;
        let plan = QueryPlan::rows(
            entity,
            vec![
                FilterPart::new(Filter::contains("name", "Sc"), &entity.filters),
                FilterPart::new(
                    Filter::compare("id", CompareOp::Gt, "3"),
                    &entity.page_filters,
                ),
            ],
            vec![SortItem::asc("id")],
            2,
        )
        .unwrap();
        assert!(plan.sql().contains("LIKE $1"), "{}", plan.sql());
        assert!(plan.sql().contains("\"organizations\".\"id\" > $2"), "{}", plan.sql());
        assert_eq!(plan.values().0.len(), 3);
    }

    #[test]
    fn plans_can_cross_await_points() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueryPlan<'static>>();
    }

    #[test]
    fn count_plan_sql() {
        let entity = &*ORGANIZATIONS;
        let plan = QueryPlan::count(
            entity,
            vec![FilterPart::new(Filter::eq("active", true), &entity.filters)],
        )
        .unwrap();
        let sql = plan.to_sql();
        assert!(sql.contains("COUNT(*)"));
        assert!(!sql.contains("ORDER BY"));
        assert_eq!(plan.limit(), None);
    }

    #[test]
    fn page_filters_cannot_use_unsortable_keys() {
        let entity = &*ORGANIZATIONS;
        let err = QueryPlan::rows(
            entity,
            vec![FilterPart::new(Filter::eq("active", true), &entity.page_filters)],
            vec![SortItem::asc("id")],
            10,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::UnknownField { .. }));
    }

    #[test]
    fn in_memory_match_uses_every_part() {
        let entity = &*ORGANIZATIONS;
        let plan = QueryPlan::count(
            entity,
            vec![
                FilterPart::new(Filter::eq("id", "1"), &entity.filters),
                FilterPart::new(Filter::contains("name", "sc"), &entity.filters),
            ],
        )
        .unwrap();
        assert!(plan.matches(&json!({ "id": "1", "name": "Scouts" })).unwrap());
        assert!(!plan.matches(&json!({ "id": "2", "name": "Scouts" })).unwrap());
    }
}
