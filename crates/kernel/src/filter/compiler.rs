//! Filter compiler: [`Filter`] tree to a parameterized SeaQuery condition.
//!
//! The compiler walks the filter tree against a [`FilterTable`]:
//! - combinators (`$and`, `$or`, `$not`) recurse
//! - field keys resolve to columns, JSONB paths, namespaces or relations
//! - comparisons are type-checked and emitted as bound values
//!
//! Predicates on nullable fields are emitted two-valued, so `NOT` over any
//! compiled predicate behaves like the in-memory evaluator.

use chrono::{DateTime, Utc};
use sea_query::{
    Alias, BinOper, Cond, Expr, ExprTrait, Func, Query, SimpleExpr, Value as SqlValue,
};

use super::error::FilterError;
use super::table::{ColumnFilter, ColumnSource, ExistsFilter, FilterTable, Resolved, ValueType};
use super::types::{CompareOp, Filter, FilterValue};
use super::value::{Scalar, normalize};

/// Maximum number of values accepted by `$in` / `$nin`.
pub const MAX_IN_VALUES: usize = 1000;

/// Compile a filter against a table.
///
/// `$now` is resolved once per call, so every occurrence in one filter
/// sees the same instant.
pub fn compile_filter(filter: &Filter, table: &FilterTable) -> Result<SimpleExpr, FilterError> {
    Compiler { now: Utc::now() }.in_table(filter, table, "")
}

/// SQL expression for a leaf field, shared with the sort compiler.
pub(crate) fn column_expression(column: &ColumnFilter) -> SimpleExpr {
    match &column.source {
        ColumnSource::Column { table, column } => {
            Expr::col((Alias::new(*table), Alias::new(*column))).into()
        }
        ColumnSource::Json {
            table,
            column: json_column,
            path,
        } if column.is_wildcard_path() => {
            let json_path: String = path
                .iter()
                .map(|segment| match *segment {
                    "*" => "[*]".to_string(),
                    key => format!(".{key}"),
                })
                .collect();
            Expr::cust(format!(
                "jsonb_path_query_array(\"{table}\".\"{json_column}\", '${json_path}')"
            ))
        }
        ColumnSource::Json {
            table,
            column: json_column,
            path,
        } => {
            let base = format!("\"{table}\".\"{json_column}\"");
            let path = path.join(",");
            Expr::cust(match column.value_type {
                ValueType::JsonArray => format!("({base} #> '{{{path}}}')"),
                ValueType::JsonNumber => format!("(({base} #>> '{{{path}}}')::numeric)"),
                ValueType::JsonBoolean => format!("(({base} #>> '{{{path}}}')::boolean)"),
                _ => format!("({base} #>> '{{{path}}}')"),
            })
        }
        ColumnSource::Concat {
            table,
            columns,
            separator,
        } => {
            let parts: Vec<String> = columns
                .iter()
                .map(|c| format!("\"{table}\".\"{c}\""))
                .collect();
            Expr::cust(format!("CONCAT_WS('{separator}', {})", parts.join(", ")))
        }
    }
}

/// Expression compared by equality and `$in`: lowercased for
/// case-insensitive fields.
fn match_expression(column: &ColumnFilter) -> SimpleExpr {
    let expr = column_expression(column);
    if !column.case_insensitive {
        return expr;
    }
    if column.value_type == ValueType::JsonArray {
        let text = Func::lower(Func::cast_as(expr, Alias::new("text")));
        Func::cast_as(SimpleExpr::from(text), Alias::new("jsonb")).into()
    } else {
        Func::lower(expr).into()
    }
}

fn constant(value: bool) -> SimpleExpr {
    Expr::cust(if value { "TRUE" } else { "FALSE" })
}

/// Escape SQL LIKE wildcards in user input.
pub(crate) fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

struct Compiler {
    now: DateTime<Utc>,
}

impl Compiler {
    /// Compile a filter at table level, where only combinators and field
    /// keys are allowed.
    fn in_table(
        &self,
        filter: &Filter,
        table: &FilterTable,
        prefix: &str,
    ) -> Result<SimpleExpr, FilterError> {
        match filter {
            Filter::And(items) => self.combine(items, true, |f| self.in_table(f, table, prefix)),
            Filter::Or(items) => self.combine(items, false, |f| self.in_table(f, table, prefix)),
            Filter::Not(inner) => Ok(self.in_table(inner, table, prefix)?.not()),
            Filter::Field { key, filter } => self.field(key, filter, table, prefix),
            other => Err(FilterError::InvalidFilter(format!(
                "{} must be applied to a field{}",
                other.operator(),
                if prefix.is_empty() {
                    String::new()
                } else {
                    format!(" inside '{prefix}'")
                }
            ))),
        }
    }

    fn combine(
        &self,
        items: &[Filter],
        all: bool,
        mut compile: impl FnMut(&Filter) -> Result<SimpleExpr, FilterError>,
    ) -> Result<SimpleExpr, FilterError> {
        if items.is_empty() {
            return Ok(constant(all));
        }
        let mut cond = if all { Cond::all() } else { Cond::any() };
        for item in items {
            cond = cond.add(compile(item)?);
        }
        Ok(cond.into())
    }

    fn field(
        &self,
        key: &str,
        filter: &Filter,
        table: &FilterTable,
        prefix: &str,
    ) -> Result<SimpleExpr, FilterError> {
        let path = join_path(prefix, key);
        match table.resolve(key) {
            None => Err(FilterError::UnknownField { field: path }),
            Some(Resolved::Column(column)) => self.on_column(filter, column, &path),
            Some(Resolved::Namespace(inner)) => self.in_table(filter, inner, &path),
            Some(Resolved::Exists(exists, Some(rest))) => {
                let relation = &path[..path.len() - rest.len() - 1];
                let inner = Filter::field(rest, filter.clone());
                self.exists(exists, &inner, relation)
            }
            Some(Resolved::Exists(exists, None)) => {
                let inner = match filter {
                    Filter::ElemMatch(inner) => inner.as_ref(),
                    other => other,
                };
                self.exists(exists, inner, &path)
            }
        }
    }

    fn exists(
        &self,
        exists: &ExistsFilter,
        inner: &Filter,
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        let condition = self.in_table(inner, &exists.fields, path)?;
        let table = Alias::new(exists.table);

        let mut select = Query::select();
        select.expr(Expr::cust("1")).from(table.clone());
        for c in &exists.correlation {
            select.and_where(
                Expr::col((table.clone(), Alias::new(c.column)))
                    .equals((Alias::new(c.outer_table), Alias::new(c.outer_column))),
            );
        }
        select.and_where(condition);
        Ok(Expr::exists(select))
    }

    /// Compile a filter scoped to a single column.
    fn on_column(
        &self,
        filter: &Filter,
        column: &ColumnFilter,
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        match filter {
            Filter::And(items) => self.combine(items, true, |f| self.on_column(f, column, path)),
            Filter::Or(items) => self.combine(items, false, |f| self.on_column(f, column, path)),
            Filter::Not(inner) => Ok(self.on_column(inner, column, path)?.not()),
            Filter::Field { key, .. } => Err(FilterError::UnknownField {
                field: join_path(path, key),
            }),
            Filter::Compare(op, value) => {
                let scalar = self.normalize(value, column, path)?;
                self.compare(column, *op, scalar, path)
            }
            Filter::In(values) => self.in_values(column, values, path),
            Filter::NotIn(values) => Ok(self.in_values(column, values, path)?.not()),
            Filter::Contains(needle) => self.contains(column, needle, path),
            Filter::ElemMatch(inner) => self.elem_match(column, inner, path),
        }
    }

    fn normalize(
        &self,
        value: &FilterValue,
        column: &ColumnFilter,
        path: &str,
    ) -> Result<Scalar, FilterError> {
        let scalar = normalize(value, column.value_type, path, self.now)?;
        Ok(if column.case_insensitive {
            scalar.folded()
        } else {
            scalar
        })
    }

    fn compare(
        &self,
        column: &ColumnFilter,
        op: CompareOp,
        scalar: Scalar,
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        if column.value_type == ValueType::JsonArray {
            return match op {
                CompareOp::Eq => Ok(self.array_contains(column, &scalar)),
                CompareOp::Neq => Ok(self.array_contains(column, &scalar).not()),
                _ => Err(FilterError::InvalidOperator {
                    field: path.to_string(),
                    operator: op.as_str(),
                }),
            };
        }

        let expr = match_expression(column);
        let nullable = column.nullable;
        let is_null = || {
            if nullable {
                expr.clone().is_null()
            } else {
                constant(false)
            }
        };
        let is_not_null = || {
            if nullable {
                expr.clone().is_not_null()
            } else {
                constant(true)
            }
        };
        let guarded = |predicate: SimpleExpr| -> SimpleExpr {
            if nullable {
                Cond::all()
                    .add(expr.clone().is_not_null())
                    .add(predicate)
                    .into()
            } else {
                predicate
            }
        };
        let or_null = |predicate: SimpleExpr| -> SimpleExpr {
            if nullable {
                Cond::any().add(expr.clone().is_null()).add(predicate).into()
            } else {
                predicate
            }
        };

        Ok(match (op, scalar) {
            (CompareOp::Eq, Scalar::Null) | (CompareOp::Lte, Scalar::Null) => is_null(),
            (CompareOp::Neq, Scalar::Null) | (CompareOp::Gt, Scalar::Null) => is_not_null(),
            (CompareOp::Gte, Scalar::Null) => constant(true),
            (CompareOp::Lt, Scalar::Null) => constant(false),
            (CompareOp::Eq, v) => guarded(expr.clone().eq(v.into_sql())),
            (CompareOp::Neq, v) => guarded(expr.clone().eq(v.into_sql())).not(),
            (CompareOp::Gt, v) => guarded(expr.clone().gt(v.into_sql())),
            (CompareOp::Gte, v) => guarded(expr.clone().gte(v.into_sql())),
            (CompareOp::Lt, v) => or_null(expr.clone().lt(v.into_sql())),
            (CompareOp::Lte, v) => or_null(expr.clone().lte(v.into_sql())),
        })
    }

    fn in_values(
        &self,
        column: &ColumnFilter,
        values: &[FilterValue],
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        if values.len() > MAX_IN_VALUES {
            return Err(FilterError::TooManyValues {
                field: path.to_string(),
                max: MAX_IN_VALUES,
            });
        }
        let scalars = values
            .iter()
            .map(|v| self.normalize(v, column, path))
            .collect::<Result<Vec<_>, _>>()?;
        if scalars.is_empty() {
            return Ok(constant(false));
        }

        if column.value_type == ValueType::JsonArray {
            let mut cond = Cond::any();
            for scalar in &scalars {
                cond = cond.add(self.array_contains(column, scalar));
            }
            return Ok(cond.into());
        }

        let has_null = scalars.iter().any(|s| matches!(s, Scalar::Null));
        let mut present: Vec<Scalar> = scalars
            .into_iter()
            .filter(|s| !matches!(s, Scalar::Null))
            .collect();

        let mut cond = Cond::any();
        if has_null {
            cond = cond.add(self.compare(column, CompareOp::Eq, Scalar::Null, path)?);
        }
        match present.len() {
            0 => {}
            1 => {
                let single = present.remove(0);
                cond = cond.add(self.compare(column, CompareOp::Eq, single, path)?);
            }
            _ => {
                let expr = match_expression(column);
                let predicate = expr
                    .clone()
                    .is_in(present.into_iter().map(Scalar::into_sql));
                cond = cond.add(if column.nullable {
                    Cond::all().add(expr.is_not_null()).add(predicate).into()
                } else {
                    predicate
                });
            }
        }
        Ok(cond.into())
    }

    fn contains(
        &self,
        column: &ColumnFilter,
        needle: &str,
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        if !column.value_type.is_text() {
            return Err(FilterError::TypeMismatch {
                field: path.to_string(),
                message: format!(
                    "$contains needs a text field, this is a {} field",
                    column.value_type.as_str()
                ),
            });
        }
        let expr = column_expression(column);
        let text: SimpleExpr = if column.value_type == ValueType::JsonArray {
            Func::cast_as(expr.clone(), Alias::new("text")).into()
        } else {
            expr.clone()
        };
        let pattern = format!("%{}%", escape_like_wildcards(&needle.to_lowercase()));
        let predicate = SimpleExpr::from(Func::lower(text)).like(pattern);
        Ok(if column.nullable {
            Cond::all().add(expr.is_not_null()).add(predicate).into()
        } else {
            predicate
        })
    }

    fn elem_match(
        &self,
        column: &ColumnFilter,
        inner: &Filter,
        path: &str,
    ) -> Result<SimpleExpr, FilterError> {
        if column.value_type != ValueType::JsonArray {
            return Err(FilterError::InvalidOperator {
                field: path.to_string(),
                operator: "$elemMatch",
            });
        }
        match inner {
            Filter::Compare(CompareOp::Eq, value) => {
                let scalar = self.normalize(value, column, path)?;
                Ok(self.array_contains(column, &scalar))
            }
            Filter::In(values) => self.in_values(column, values, path),
            other => Err(FilterError::InvalidOperator {
                field: path.to_string(),
                operator: other.operator(),
            }),
        }
    }

    /// JSONB containment of a single element: `expr @> '[value]'`.
    fn array_contains(&self, column: &ColumnFilter, scalar: &Scalar) -> SimpleExpr {
        let expr = match_expression(column);
        let element = SqlValue::from(serde_json::Value::Array(vec![scalar.to_json()]));
        let predicate = SimpleExpr::Binary(
            Box::new(expr.clone()),
            BinOper::Custom("@>"),
            Box::new(SimpleExpr::Value(element)),
        );
        if column.nullable {
            Cond::all().add(expr.is_not_null()).add(predicate).into()
        } else {
            predicate
        }
    }
}
