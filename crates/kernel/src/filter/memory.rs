//! In-memory filter evaluation.
//!
//! Evaluates the same filter language as the SQL compiler against raw JSON
//! rows (the shape `to_jsonb(row)` produces). Used by the in-memory row
//! source and to check compiled SQL semantics in tests.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::compiler::MAX_IN_VALUES;
use super::error::FilterError;
use super::table::{ColumnFilter, ColumnSource, ExistsFilter, FilterTable, Resolved, ValueType};
use super::types::{CompareOp, Filter, FilterValue};
use super::value::{Scalar, normalize};

/// Evaluate a filter against a row.
pub fn matches(filter: &Filter, table: &FilterTable, row: &Value) -> Result<bool, FilterError> {
    Evaluator { now: Utc::now() }.in_table(filter, table, row, "")
}

/// Read a field's raw cell from a row.
pub(crate) fn read_cell(column: &ColumnFilter, row: &Value) -> Value {
    match &column.source {
        ColumnSource::Column { column, .. } => row.get(*column).cloned().unwrap_or(Value::Null),
        ColumnSource::Json { column: json_column, path, .. } if column.is_wildcard_path() => {
            match row.get(*json_column) {
                None | Some(Value::Null) => Value::Null,
                Some(root) => {
                    let mut found = Vec::new();
                    collect_path(root, path, &mut found);
                    Value::Array(found)
                }
            }
        }
        ColumnSource::Json { column, path, .. } => {
            let mut current = row.get(*column);
            for segment in path {
                current = current.and_then(|v| v.get(*segment));
            }
            current.cloned().unwrap_or(Value::Null)
        }
        ColumnSource::Concat {
            columns, separator, ..
        } => {
            let parts: Vec<String> = columns
                .iter()
                .filter_map(|c| match row.get(*c) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                })
                .collect();
            Value::String(parts.join(separator))
        }
    }
}

/// Values under `path`, where `*` fans out over array elements. Missing
/// keys contribute nothing.
fn collect_path(value: &Value, path: &[&str], found: &mut Vec<Value>) {
    let Some((segment, rest)) = path.split_first() else {
        found.push(value.clone());
        return;
    };
    match (*segment, value) {
        ("*", Value::Array(items)) => {
            for item in items {
                collect_path(item, rest, found);
            }
        }
        ("*", _) => {}
        (key, value) => {
            if let Some(next) = value.get(key) {
                collect_path(next, rest, found);
            }
        }
    }
}

/// Read a field of a row as a typed scalar.
pub(crate) fn read_scalar(column: &ColumnFilter, row: &Value) -> Scalar {
    Scalar::from_cell(&read_cell(column, row), column.value_type)
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

struct Evaluator {
    now: DateTime<Utc>,
}

impl Evaluator {
    fn all(
        &self,
        items: &[Filter],
        mut eval: impl FnMut(&Filter) -> Result<bool, FilterError>,
    ) -> Result<bool, FilterError> {
        let mut result = true;
        for item in items {
            result &= eval(item)?;
        }
        Ok(result)
    }

    fn any(
        &self,
        items: &[Filter],
        mut eval: impl FnMut(&Filter) -> Result<bool, FilterError>,
    ) -> Result<bool, FilterError> {
        let mut result = false;
        for item in items {
            result |= eval(item)?;
        }
        Ok(result)
    }

    fn in_table(
        &self,
        filter: &Filter,
        table: &FilterTable,
        row: &Value,
        prefix: &str,
    ) -> Result<bool, FilterError> {
        match filter {
            Filter::And(items) => self.all(items, |f| self.in_table(f, table, row, prefix)),
            Filter::Or(items) => self.any(items, |f| self.in_table(f, table, row, prefix)),
            Filter::Not(inner) => Ok(!self.in_table(inner, table, row, prefix)?),
            Filter::Field { key, filter } => self.field(key, filter, table, row, prefix),
            other => Err(FilterError::InvalidFilter(format!(
                "{} must be applied to a field",
                other.operator()
            ))),
        }
    }

    fn field(
        &self,
        key: &str,
        filter: &Filter,
        table: &FilterTable,
        row: &Value,
        prefix: &str,
    ) -> Result<bool, FilterError> {
        let path = join_path(prefix, key);
        match table.resolve(key) {
            None => Err(FilterError::UnknownField { field: path }),
            Some(Resolved::Column(column)) => self.on_column(filter, column, row, &path),
            Some(Resolved::Namespace(inner)) => self.in_table(filter, inner, row, &path),
            Some(Resolved::Exists(exists, Some(rest))) => {
                let relation = &path[..path.len() - rest.len() - 1];
                let inner = Filter::field(rest, filter.clone());
                self.exists(exists, &inner, row, relation)
            }
            Some(Resolved::Exists(exists, None)) => {
                let inner = match filter {
                    Filter::ElemMatch(inner) => inner.as_ref(),
                    other => other,
                };
                self.exists(exists, inner, row, &path)
            }
        }
    }

    fn exists(
        &self,
        exists: &ExistsFilter,
        inner: &Filter,
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        let Some(Value::Array(children)) = row.get(exists.row_key) else {
            return Ok(false);
        };
        for child in children {
            if self.in_table(inner, &exists.fields, child, path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn on_column(
        &self,
        filter: &Filter,
        column: &ColumnFilter,
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        match filter {
            Filter::And(items) => self.all(items, |f| self.on_column(f, column, row, path)),
            Filter::Or(items) => self.any(items, |f| self.on_column(f, column, row, path)),
            Filter::Not(inner) => Ok(!self.on_column(inner, column, row, path)?),
            Filter::Field { key, .. } => Err(FilterError::UnknownField {
                field: join_path(path, key),
            }),
            Filter::Compare(op, value) => {
                let scalar = self.normalize(value, column, path)?;
                self.compare(column, *op, &scalar, row, path)
            }
            Filter::In(values) => self.in_values(column, values, row, path),
            Filter::NotIn(values) => Ok(!self.in_values(column, values, row, path)?),
            Filter::Contains(needle) => self.contains(column, needle, row, path),
            Filter::ElemMatch(inner) => self.elem_match(column, inner, row, path),
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
        scalar: &Scalar,
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        if column.value_type == ValueType::JsonArray {
            return match op {
                CompareOp::Eq => Ok(array_contains(column, scalar, row)),
                CompareOp::Neq => Ok(!array_contains(column, scalar, row)),
                _ => Err(FilterError::InvalidOperator {
                    field: path.to_string(),
                    operator: op.as_str(),
                }),
            };
        }

        let mut cell = read_scalar(column, row);
        if column.case_insensitive {
            cell = cell.folded();
        }
        let Some(ordering) = cell.compare(scalar) else {
            return Ok(op == CompareOp::Neq);
        };
        Ok(match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Neq => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        })
    }

    fn in_values(
        &self,
        column: &ColumnFilter,
        values: &[FilterValue],
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        if values.len() > MAX_IN_VALUES {
            return Err(FilterError::TooManyValues {
                field: path.to_string(),
                max: MAX_IN_VALUES,
            });
        }
        let mut found = false;
        for value in values {
            let scalar = self.normalize(value, column, path)?;
            found |= self.compare(column, CompareOp::Eq, &scalar, row, path)?;
        }
        Ok(found)
    }

    fn contains(
        &self,
        column: &ColumnFilter,
        needle: &str,
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        if !column.value_type.is_text() {
            return Err(FilterError::TypeMismatch {
                field: path.to_string(),
                message: format!(
                    "$contains needs a text field, this is a {} field",
                    column.value_type.as_str()
                ),
            });
        }
        let haystack = match read_cell(column, row) {
            Value::Null => return Ok(false),
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(haystack.to_lowercase().contains(&needle.to_lowercase()))
    }

    fn elem_match(
        &self,
        column: &ColumnFilter,
        inner: &Filter,
        row: &Value,
        path: &str,
    ) -> Result<bool, FilterError> {
        if column.value_type != ValueType::JsonArray {
            return Err(FilterError::InvalidOperator {
                field: path.to_string(),
                operator: "$elemMatch",
            });
        }
        match inner {
            Filter::Compare(CompareOp::Eq, value) => {
                let scalar = self.normalize(value, column, path)?;
                Ok(array_contains(column, &scalar, row))
            }
            Filter::In(values) => self.in_values(column, values, row, path),
            other => Err(FilterError::InvalidOperator {
                field: path.to_string(),
                operator: other.operator(),
            }),
        }
    }
}

fn array_contains(column: &ColumnFilter, scalar: &Scalar, row: &Value) -> bool {
    let Value::Array(items) = read_cell(column, row) else {
        return false;
    };
    let needle = scalar.to_json();
    items.iter().any(|item| match (item, &needle) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) if column.case_insensitive => a.to_lowercase() == *b,
        (a, b) => a == b,
    })
}
