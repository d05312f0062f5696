use std::sync::LazyLock;

use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::filter::{ColumnFilter, ExistsFilter, Filter, FilterTable, ValueType};
use crate::sort::SorterTable;

use super::EntityDefinition;

const TABLE: &str = "organizations";

pub static ORGANIZATIONS: LazyLock<EntityDefinition> = LazyLock::new(|| {
    EntityDefinition::new("organizations", TABLE, filters(), sorters(), scope).with_search(search)
});

fn filters() -> FilterTable {
    FilterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with("uri", ColumnFilter::column(TABLE, "uri", ValueType::String))
        .with("name", ColumnFilter::column(TABLE, "name", ValueType::String))
        .with("active", ColumnFilter::column(TABLE, "active", ValueType::Boolean))
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
        .with(
            "city",
            ColumnFilter::json(TABLE, "address", "city", ValueType::JsonString),
        )
        .with(
            "country",
            ColumnFilter::json(TABLE, "address", "country", ValueType::JsonString),
        )
        .with(
            "type",
            ColumnFilter::json(TABLE, "meta", "type", ValueType::JsonString),
        )
        .with(
            "tags",
            ColumnFilter::json(TABLE, "meta", "tags", ValueType::JsonArray),
        )
        .with(
            "packages",
            ExistsFilter::new(
                "packages",
                "packages",
                FilterTable::new()
                    .with("type", ColumnFilter::column("packages", "type", ValueType::String))
                    .with(
                        "validUntil",
                        ColumnFilter::column("packages", "valid_until", ValueType::Datetime)
                            .nullable(),
                    ),
            )
            .correlate("organization_id", TABLE, "id"),
        )
}

fn sorters() -> SorterTable {
    SorterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with("name", ColumnFilter::column(TABLE, "name", ValueType::String))
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
        .with(
            "city",
            ColumnFilter::json(TABLE, "address", "city", ValueType::JsonString),
        )
}

/// Organization callers only see their own organization.
fn scope(auth: &AuthContext) -> AppResult<Option<Filter>> {
    super::organization_scope(auth, "id")
}

fn search(query: &str) -> Filter {
    Filter::contains("name", query)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::filter::compile_filter;
    use serde_json::json;

    #[test]
    fn package_filters_compile() {
        let filter = Filter::from_json(&json!({
            "packages": { "$elemMatch": { "type": "membership", "validUntil": { "$gt": { "$": "$now" } } } }
        }))
        .unwrap();
        assert!(compile_filter(&filter, &ORGANIZATIONS.filters).is_ok());
    }

    #[test]
    fn search_is_name_contains() {
        assert_eq!(search("Sc"), Filter::contains("name", "Sc"));
    }
}
