//! Filter compiler tables.
//!
//! A [`FilterTable`] maps the logical keys a client may filter on to the
//! storage that backs them. Clients never see table or column names; a key
//! that is not in the table is rejected by the compiler.

use std::collections::BTreeMap;

use super::error::FilterError;

/// Maximum length of a Postgres identifier.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Check that a table or column name is safe to interpolate into SQL.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

fn check_identifier(name: &str) -> Result<(), FilterError> {
    if is_safe_identifier(name) {
        Ok(())
    } else {
        Err(FilterError::UnsafeIdentifier(name.to_string()))
    }
}

/// Storage type of a filterable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Datetime,
    JsonString,
    JsonNumber,
    JsonBoolean,
    JsonArray,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Datetime => "datetime",
            ValueType::JsonString => "JSON string",
            ValueType::JsonNumber => "JSON number",
            ValueType::JsonBoolean => "JSON boolean",
            ValueType::JsonArray => "JSON array",
        }
    }

    /// Whether `$contains` applies to this type.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::JsonString | ValueType::JsonArray
        )
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    Column {
        table: &'static str,
        column: &'static str,
    },
    /// JSONB path extraction (`"t"."c" #>> '{a,b}'`). A `*` segment
    /// collects the values under every element of an array into one JSON
    /// array (`jsonb_path_query_array`).
    Json {
        table: &'static str,
        column: &'static str,
        path: Vec<&'static str>,
    },
    /// Text columns joined with a separator (`CONCAT_WS`).
    Concat {
        table: &'static str,
        columns: Vec<&'static str>,
        separator: &'static str,
    },
}

/// A leaf field: one SQL expression with a type and nullability.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub source: ColumnSource,
    pub value_type: ValueType,
    pub nullable: bool,
    /// Equality and `$in` ignore case.
    pub case_insensitive: bool,
}

impl ColumnFilter {
    pub fn column(table: &'static str, column: &'static str, value_type: ValueType) -> Self {
        Self {
            source: ColumnSource::Column { table, column },
            value_type,
            nullable: false,
            case_insensitive: false,
        }
    }

    /// A value inside a JSONB column, addressed by a dotted path.
    /// JSON values can always be missing, so these are nullable.
    pub fn json(
        table: &'static str,
        column: &'static str,
        path: &'static str,
        value_type: ValueType,
    ) -> Self {
        Self {
            source: ColumnSource::Json {
                table,
                column,
                path: path.split('.').collect(),
            },
            value_type,
            nullable: true,
            case_insensitive: false,
        }
    }

    pub fn concat(table: &'static str, columns: &[&'static str], separator: &'static str) -> Self {
        Self {
            source: ColumnSource::Concat {
                table,
                columns: columns.to_vec(),
                separator,
            },
            value_type: ValueType::String,
            nullable: false,
            case_insensitive: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Whether this is a JSON path with a `*` segment.
    pub fn is_wildcard_path(&self) -> bool {
        matches!(&self.source, ColumnSource::Json { path, .. } if path.contains(&"*"))
    }

    fn validate(&self) -> Result<(), FilterError> {
        if self.case_insensitive && !self.value_type.is_text() {
            return Err(FilterError::InvalidFilter(format!(
                "case-insensitive matching needs a text field, this is a {} field",
                self.value_type.as_str()
            )));
        }
        if self.is_wildcard_path() && self.value_type != ValueType::JsonArray {
            return Err(FilterError::InvalidFilter(
                "a '*' path segment needs a JSON array field".to_string(),
            ));
        }
        match &self.source {
            ColumnSource::Column { table, column } => {
                check_identifier(table)?;
                check_identifier(column)
            }
            ColumnSource::Json {
                table,
                column,
                path,
            } => {
                check_identifier(table)?;
                check_identifier(column)?;
                path.iter()
                    .filter(|segment| **segment != "*")
                    .try_for_each(|segment| check_identifier(segment))
            }
            ColumnSource::Concat {
                table,
                columns,
                separator,
            } => {
                check_identifier(table)?;
                columns.iter().try_for_each(|c| check_identifier(c))?;
                if separator.contains('\'') {
                    return Err(FilterError::UnsafeIdentifier((*separator).to_string()));
                }
                Ok(())
            }
        }
    }
}

/// Correlation between a relation's rows and the outer row:
/// `"inner_table"."column" = "outer_table"."outer_column"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub column: &'static str,
    pub outer_table: &'static str,
    pub outer_column: &'static str,
}

/// A one-to-many relation filtered through a correlated `EXISTS` subquery.
#[derive(Debug, Clone)]
pub struct ExistsFilter {
    pub table: &'static str,
    pub correlation: Vec<Correlation>,
    pub fields: FilterTable,
    /// Key under which a raw row carries the relation's rows as an array.
    pub row_key: &'static str,
}

impl ExistsFilter {
    pub fn new(table: &'static str, row_key: &'static str, fields: FilterTable) -> Self {
        Self {
            table,
            correlation: Vec::new(),
            fields,
            row_key,
        }
    }

    pub fn correlate(
        mut self,
        column: &'static str,
        outer_table: &'static str,
        outer_column: &'static str,
    ) -> Self {
        self.correlation.push(Correlation {
            column,
            outer_table,
            outer_column,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub enum FieldDescriptor {
    Column(ColumnFilter),
    Namespace(FilterTable),
    Exists(Box<ExistsFilter>),
}

impl From<ColumnFilter> for FieldDescriptor {
    fn from(value: ColumnFilter) -> Self {
        FieldDescriptor::Column(value)
    }
}

impl From<FilterTable> for FieldDescriptor {
    fn from(value: FilterTable) -> Self {
        FieldDescriptor::Namespace(value)
    }
}

impl From<ExistsFilter> for FieldDescriptor {
    fn from(value: ExistsFilter) -> Self {
        FieldDescriptor::Exists(Box::new(value))
    }
}

/// Result of resolving a (possibly dotted) key against a table.
#[derive(Debug)]
pub enum Resolved<'a> {
    Column(&'a ColumnFilter),
    Namespace(&'a FilterTable),
    /// A relation, plus the rest of the path to apply inside it.
    Exists(&'a ExistsFilter, Option<&'a str>),
}

/// Ordered registry of filterable fields.
#[derive(Debug, Clone, Default)]
pub struct FilterTable {
    fields: BTreeMap<&'static str, FieldDescriptor>,
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Later registrations under the same key win.
    pub fn with(mut self, key: &'static str, descriptor: impl Into<FieldDescriptor>) -> Self {
        self.fields.insert(key, descriptor.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a key. Dotted keys walk namespaces segment by segment; a
    /// path that continues past a relation is returned as the remainder.
    pub fn resolve<'a>(&'a self, key: &'a str) -> Option<Resolved<'a>> {
        if let Some(descriptor) = self.fields.get(key) {
            return Some(match descriptor {
                FieldDescriptor::Column(column) => Resolved::Column(column),
                FieldDescriptor::Namespace(table) => Resolved::Namespace(table),
                FieldDescriptor::Exists(exists) => Resolved::Exists(exists, None),
            });
        }
        let (head, rest) = key.split_once('.')?;
        match self.fields.get(head)? {
            FieldDescriptor::Column(_) => None,
            FieldDescriptor::Namespace(table) => table.resolve(rest),
            FieldDescriptor::Exists(exists) => Some(Resolved::Exists(exists, Some(rest))),
        }
    }

    /// Check every identifier in the table, recursively.
    pub fn validate(&self) -> Result<(), FilterError> {
        for descriptor in self.fields.values() {
            match descriptor {
                FieldDescriptor::Column(column) => column.validate()?,
                FieldDescriptor::Namespace(table) => table.validate()?,
                FieldDescriptor::Exists(exists) => {
                    check_identifier(exists.table)?;
                    for c in &exists.correlation {
                        check_identifier(c.column)?;
                        check_identifier(c.outer_table)?;
                        check_identifier(c.outer_column)?;
                    }
                    exists.fields.validate()?;
                }
            }
        }
        Ok(())
    }
}
