//! Listing entities.
//!
//! Each entity declares, once, which keys clients may filter and sort on,
//! how a caller is scoped, how free-text search expands to a filter and
//! how rows are redacted before they leave the service.

mod members;
mod organizations;
mod payments;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::filter::{Filter, FilterError, FilterTable};
use crate::sort::SorterTable;

pub use members::MEMBERS;
pub use organizations::ORGANIZATIONS;
pub use payments::PAYMENTS;

/// Unique sort key every listing ends its sort with.
pub const TIEBREAKER: &str = "id";

/// Builds the filter that restricts a caller to the rows it may see.
pub type ScopeFn = fn(&AuthContext) -> AppResult<Option<Filter>>;

/// Expands a free-text search into a filter.
pub type SearchFn = fn(&str) -> Filter;

/// Redacts a raw row for a caller.
pub type PresentFn = fn(Value, &AuthContext) -> Value;

fn present_unchanged(row: Value, _auth: &AuthContext) -> Value {
    row
}

/// Static description of a listing entity.
pub struct EntityDefinition {
    pub name: &'static str,
    pub table: &'static str,
    /// Keys accepted in `filter`, scope and search filters.
    pub filters: FilterTable,
    /// Keys accepted in `pageFilter`: the sortable keys only.
    pub page_filters: FilterTable,
    pub sorters: SorterTable,
    pub search: Option<SearchFn>,
    pub scope: ScopeFn,
    pub present: PresentFn,
}

impl EntityDefinition {
    pub fn new(
        name: &'static str,
        table: &'static str,
        filters: FilterTable,
        sorters: SorterTable,
        scope: ScopeFn,
    ) -> Self {
        Self {
            name,
            table,
            filters,
            page_filters: sorters.filter_table(),
            sorters,
            search: None,
            scope,
            present: present_unchanged,
        }
    }

    pub fn with_search(mut self, search: SearchFn) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_presenter(mut self, present: PresentFn) -> Self {
        self.present = present;
        self
    }

    /// Check identifiers and that the tiebreaker is sortable.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.filters.validate()?;
        self.page_filters.validate()?;
        if self.sorters.get(TIEBREAKER).is_none() {
            return Err(FilterError::UnknownSortKey {
                key: TIEBREAKER.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Scope for entities owned by an organization: platform callers see
/// everything, others only rows whose `key` is their organization.
pub(crate) fn organization_scope(auth: &AuthContext, key: &str) -> AppResult<Option<Filter>> {
    Ok(auth
        .require_organization()?
        .map(|organization| Filter::eq(key, organization)))
}

/// Entities by route name.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<&'static str, &'static EntityDefinition>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in entity.
    pub fn builtin() -> Result<Self, FilterError> {
        let mut registry = Self::new();
        registry.register(&ORGANIZATIONS)?;
        registry.register(&MEMBERS)?;
        registry.register(&PAYMENTS)?;
        Ok(registry)
    }

    pub fn register(&mut self, entity: &'static EntityDefinition) -> Result<(), FilterError> {
        entity.validate()?;
        self.entities.insert(entity.name, entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&'static EntityDefinition> {
        self.entities.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entities.keys().copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_entities_validate() {
        let registry = EntityRegistry::builtin().unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["members", "organizations", "payments"]
        );
        assert!(registry.get("invoices").is_none());
    }

    #[test]
    fn page_filters_are_the_sortable_keys() {
        for entity in [&*ORGANIZATIONS, &*MEMBERS, &*PAYMENTS] {
            let page: Vec<_> = entity.page_filters.keys().collect();
            let sortable: Vec<_> = entity.sorters.keys().collect();
            assert_eq!(page, sortable, "{}", entity.name);
            assert!(sortable.contains(&TIEBREAKER));
        }
    }

    #[test]
    fn organization_scope_pins_the_caller() {
        let scope = organization_scope(&AuthContext::organization("o1"), "organizationId").unwrap();
        assert_eq!(scope, Some(Filter::eq("organizationId", "o1")));
        assert_eq!(
            organization_scope(&AuthContext::platform(), "organizationId").unwrap(),
            None
        );
    }
}
