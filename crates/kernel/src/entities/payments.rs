use std::sync::LazyLock;

use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::filter::{ColumnFilter, ExistsFilter, Filter, FilterTable, ValueType};
use crate::sort::SorterTable;

use super::EntityDefinition;

const TABLE: &str = "payments";

pub static PAYMENTS: LazyLock<EntityDefinition> =
    LazyLock::new(|| EntityDefinition::new("payments", TABLE, filters(), sorters(), scope));

fn filters() -> FilterTable {
    FilterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with(
            "organizationId",
            ColumnFilter::column(TABLE, "organization_id", ValueType::String),
        )
        .with("status", ColumnFilter::column(TABLE, "status", ValueType::String))
        .with(
            "method",
            ColumnFilter::column(TABLE, "method", ValueType::String).nullable(),
        )
        .with("price", ColumnFilter::column(TABLE, "price", ValueType::Number))
        .with(
            "paidAt",
            ColumnFilter::column(TABLE, "paid_at", ValueType::Datetime).nullable(),
        )
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
        .with(
            "balanceItems",
            ExistsFilter::new(
                "balance_items",
                "balance_items",
                FilterTable::new()
                    .with(
                        "description",
                        ColumnFilter::column("balance_items", "description", ValueType::String),
                    )
                    .with(
                        "price",
                        ColumnFilter::column("balance_items", "price", ValueType::Number),
                    )
                    .with(
                        "status",
                        ColumnFilter::column("balance_items", "status", ValueType::String),
                    ),
            )
            .correlate("payment_id", TABLE, "id"),
        )
}

fn sorters() -> SorterTable {
    SorterTable::new()
        .with("id", ColumnFilter::column(TABLE, "id", ValueType::String))
        .with("price", ColumnFilter::column(TABLE, "price", ValueType::Number))
        .with(
            "paidAt",
            ColumnFilter::column(TABLE, "paid_at", ValueType::Datetime).nullable(),
        )
        .with(
            "createdAt",
            ColumnFilter::column(TABLE, "created_at", ValueType::Datetime),
        )
}

fn scope(auth: &AuthContext) -> AppResult<Option<Filter>> {
    super::organization_scope(auth, "organizationId")
}
