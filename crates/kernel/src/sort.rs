//! Sort compiler and keyset continuation filters.
//!
//! Listing endpoints page with keyset pagination: the next page is the
//! same query plus a filter selecting rows strictly after the last row of
//! the current page in sort order. For that to be exact the sort must end
//! in a unique key, which [`assert_sort`] guarantees.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use sea_query::{NullOrdering, Order, SelectStatement};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::{
    ColumnFilter, CompareOp, Filter, FilterError, FilterTable, Scalar, column_expression,
    memory::read_scalar,
};

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One sort instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    pub key: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortItem {
    pub fn new(key: impl Into<String>, order: SortOrder) -> Self {
        Self {
            key: key.into(),
            order,
        }
    }

    pub fn asc(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Asc)
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Desc)
    }
}

/// Registry of sortable keys.
#[derive(Debug, Clone, Default)]
pub struct SorterTable {
    sorters: BTreeMap<&'static str, ColumnFilter>,
}

impl SorterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, sorter: ColumnFilter) -> Self {
        self.sorters.insert(key, sorter);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ColumnFilter> {
        self.sorters.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sorters.keys().copied()
    }

    /// Filter table exposing exactly the sortable keys. Page filters are
    /// compiled against this table.
    pub fn filter_table(&self) -> FilterTable {
        self.sorters
            .iter()
            .fold(FilterTable::new(), |table, (key, sorter)| {
                table.with(*key, sorter.clone())
            })
    }

    fn lookup(&self, key: &str) -> Result<&ColumnFilter, FilterError> {
        self.get(key).ok_or_else(|| FilterError::UnknownSortKey {
            key: key.to_string(),
        })
    }
}

/// Make the sort end in the unique `tiebreaker` key.
///
/// Items after an existing tiebreaker are dropped since they can never
/// affect the order. A missing tiebreaker is appended using the order of
/// the last item. Repeated keys keep their first occurrence.
pub fn assert_sort(sort: Vec<SortItem>, tiebreaker: &str) -> Vec<SortItem> {
    let mut result: Vec<SortItem> = Vec::with_capacity(sort.len() + 1);
    for item in sort {
        if result.iter().any(|existing| existing.key == item.key) {
            continue;
        }
        let done = item.key == tiebreaker;
        result.push(item);
        if done {
            return result;
        }
    }
    let order = result.last().map(|item| item.order).unwrap_or_default();
    result.push(SortItem::new(tiebreaker, order));
    result
}

/// Add `ORDER BY` clauses for `sort`. Validates every key before touching
/// the statement.
///
/// Nullable keys sort nulls first ascending and last descending, matching
/// the filter compiler where null is the smallest value.
pub fn apply_sorter(
    query: &mut SelectStatement,
    sort: &[SortItem],
    sorters: &SorterTable,
) -> Result<(), FilterError> {
    let resolved = sort
        .iter()
        .map(|item| sorters.lookup(&item.key).map(|sorter| (item, sorter)))
        .collect::<Result<Vec<_>, _>>()?;

    for (item, sorter) in resolved {
        let expr = column_expression(sorter);
        let (order, nulls) = match item.order {
            SortOrder::Asc => (Order::Asc, NullOrdering::First),
            SortOrder::Desc => (Order::Desc, NullOrdering::Last),
        };
        if sorter.nullable {
            query.order_by_expr_with_nulls(expr, order, nulls);
        } else {
            query.order_by_expr(expr, order);
        }
    }
    Ok(())
}

/// Build the filter selecting rows strictly after `row` in `sort` order:
/// `k1 > v1 OR (k1 = v1 AND (k2 > v2 OR (...)))`.
pub fn sort_filter(row: &Value, sorters: &SorterTable, sort: &[SortItem]) -> Result<Filter, FilterError> {
    let mut keys = Vec::with_capacity(sort.len());
    for item in sort {
        let sorter = sorters.lookup(&item.key)?;
        keys.push((item, read_scalar(sorter, row).to_filter_value()));
    }

    let mut keys = keys.into_iter().rev();
    let Some((last, value)) = keys.next() else {
        return Err(FilterError::InvalidFilter(
            "cannot build a page filter without sort keys".to_string(),
        ));
    };
    let after = |order: SortOrder| match order {
        SortOrder::Asc => CompareOp::Gt,
        SortOrder::Desc => CompareOp::Lt,
    };

    let mut filter = Filter::compare(last.key.clone(), after(last.order), value);
    for (item, value) in keys {
        filter = Filter::Or(vec![
            Filter::compare(item.key.clone(), after(item.order), value.clone()),
            Filter::And(vec![
                Filter::compare(item.key.clone(), CompareOp::Eq, value),
                filter,
            ]),
        ]);
    }
    Ok(filter)
}

/// Compare two rows in `sort` order, the way the SQL `ORDER BY` does.
pub fn compare_rows(a: &Value, b: &Value, sorters: &SorterTable, sort: &[SortItem]) -> Ordering {
    for item in sort {
        let Some(sorter) = sorters.get(&item.key) else {
            continue;
        };
        let left: Scalar = read_scalar(sorter, a);
        let right = read_scalar(sorter, b);
        let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
        let ordering = match item.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
