use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::filter::{ColumnFilter, ExistsFilter, Filter, FilterTable, ValueType};
use crate::sort::SorterTable;

use super::EntityDefinition;

const TABLE: &str = "members";

/// Columns only shown to callers with full access.
const PERSONAL_COLUMNS: &[&str] = &["email", "birth_day", "details"];

/// Loose e-mail shape used to pick between exact and partial matching.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex literal"));

pub static MEMBERS: LazyLock<EntityDefinition> = LazyLock::new(|| {
    EntityDefinition::new("members", TABLE, filters(), sorters(), scope)
        .with_search(search)
        .with_presenter(present)
});

fn filters() -> FilterTable {
    FilterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with(
            "organizationId",
            ColumnFilter::column(TABLE, "organization_id", ValueType::String),
        )
        .with(
            "firstName",
            ColumnFilter::column(TABLE, "first_name", ValueType::String),
        )
        .with(
            "lastName",
            ColumnFilter::column(TABLE, "last_name", ValueType::String),
        )
        .with(
            "name",
            ColumnFilter::concat(TABLE, &["first_name", "last_name"], " "),
        )
        .with(
            "email",
            ColumnFilter::column(TABLE, "email", ValueType::String)
                .nullable()
                .case_insensitive(),
        )
        .with(
            "parentEmail",
            ColumnFilter::json(TABLE, "details", "parents.*.email", ValueType::JsonArray)
                .case_insensitive(),
        )
        .with(
            "birthDay",
            ColumnFilter::column(TABLE, "birth_day", ValueType::Datetime).nullable(),
        )
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
        .with(
            "details",
            FilterTable::new()
                .with(
                    "phone",
                    ColumnFilter::json(TABLE, "details", "phone", ValueType::JsonString),
                )
                .with(
                    "requiresFinancialSupport",
                    ColumnFilter::json(
                        TABLE,
                        "details",
                        "requiresFinancialSupport",
                        ValueType::JsonBoolean,
                    ),
                ),
        )
        .with(
            "registrations",
            ExistsFilter::new(
                "registrations",
                "registrations",
                FilterTable::new()
                    .with(
                        "groupId",
                        ColumnFilter::column("registrations", "group_id", ValueType::String),
                    )
                    .with(
                        "periodId",
                        ColumnFilter::column("registrations", "period_id", ValueType::String),
                    )
                    .with(
                        "registeredAt",
                        ColumnFilter::column("registrations", "registered_at", ValueType::Datetime)
                            .nullable(),
                    ),
            )
            .correlate("member_id", TABLE, "id"),
        )
}

fn sorters() -> SorterTable {
    SorterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with(
            "firstName",
            ColumnFilter::column(TABLE, "first_name", ValueType::String),
        )
        .with(
            "lastName",
            ColumnFilter::column(TABLE, "last_name", ValueType::String),
        )
        .with(
            "birthDay",
            ColumnFilter::column(TABLE, "birth_day", ValueType::Datetime).nullable(),
        )
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
}

fn scope(auth: &AuthContext) -> AppResult<Option<Filter>> {
    super::organization_scope(auth, "organizationId")
}

/// Anything with an `@` searches the member's and the parents' addresses:
/// a full address matches exactly, anything else partially. Everything
/// else searches the name.
fn search(query: &str) -> Filter {
    if !query.contains('@') {
        return Filter::contains("name", query);
    }
    let email = |key: &str| {
        if EMAIL.is_match(query) {
            Filter::eq(key, query)
        } else {
            Filter::contains(key, query)
        }
    };
    Filter::Or(vec![email("email"), email("parentEmail")])
}

fn present(mut row: Value, auth: &AuthContext) -> Value {
    if !auth.full_access
        && let Value::Object(map) = &mut row
    {
        for column in PERSONAL_COLUMNS {
            map.remove(*column);
        }
    }
    row
}
