//! Filter and sort compilation errors.

use thiserror::Error;

/// Errors raised while decoding or compiling a filter tree or sort list.
///
/// Every variant is a client error. The HTTP layer maps them to a 400
/// response carrying [`FilterError::code`] and [`FilterError::field`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("unknown filter field '{field}'")]
    UnknownField { field: String },

    #[error("unknown sort key '{key}'")]
    UnknownSortKey { key: String },

    #[error("operator {operator} is not supported on field '{field}'")]
    InvalidOperator {
        field: String,
        operator: &'static str,
    },

    #[error("{message} (field '{field}')")]
    TypeMismatch { field: String, message: String },

    #[error("too many values in $in filter on '{field}' (maximum {max})")]
    TooManyValues { field: String, max: usize },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("unsafe SQL identifier '{0}'")]
    UnsafeIdentifier(String),
}

impl FilterError {
    /// Machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            FilterError::UnknownSortKey { .. } => "invalid_sort",
            _ => "invalid_filter",
        }
    }

    /// The logical field the error refers to, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            FilterError::UnknownField { field }
            | FilterError::InvalidOperator { field, .. }
            | FilterError::TypeMismatch { field, .. }
            | FilterError::TooManyValues { field, .. } => Some(field),
            FilterError::UnknownSortKey { key } => Some(key),
            FilterError::InvalidFilter(_) | FilterError::UnsafeIdentifier(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_fields() {
        let err = FilterError::UnknownField {
            field: "settings.dog".to_string(),
        };
        assert_eq!(err.code(), "invalid_filter");
        assert_eq!(err.field(), Some("settings.dog"));

        let err = FilterError::UnknownSortKey {
            key: "color".to_string(),
        };
        assert_eq!(err.code(), "invalid_sort");
        assert_eq!(err.field(), Some("color"));

        assert_eq!(FilterError::InvalidFilter("x".to_string()).field(), None);
    }

    #[test]
    fn messages_name_the_field() {
        let err = FilterError::TooManyValues {
            field: "id".to_string(),
            max: 1000,
        };
        assert_eq!(
            err.to_string(),
            "too many values in $in filter on 'id' (maximum 1000)"
        );
    }
}
