//! Filter language for listing endpoints.
//!
//! Clients send a JSON filter tree; each entity declares a [`FilterTable`]
//! describing which logical keys may be filtered and how they are stored.
//! [`compile_filter`] turns the pair into a parameterized SQL condition and
//! [`matches`] evaluates the same semantics against an in-memory row.

mod compiler;
mod error;
pub mod memory;
mod table;
mod types;
mod value;

pub use compiler::{MAX_IN_VALUES, compile_filter};
pub(crate) use compiler::column_expression;
pub use error::FilterError;
pub use memory::matches;
pub use table::{
    ColumnFilter, ColumnSource, Correlation, ExistsFilter, FieldDescriptor, FilterTable, Resolved,
    ValueType, is_safe_identifier,
};
pub use types::{CompareOp, Filter, FilterValue};
pub(crate) use value::Scalar;
