//! Typed comparison values shared by the SQL compiler and the in-memory
//! evaluator.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::FilterError;
use super::table::ValueType;
use super::types::FilterValue;

/// A filter literal after it has been checked against a field's type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Datetime(DateTime<Utc>),
}

impl Scalar {
    pub(crate) fn into_sql(self) -> sea_query::Value {
        match self {
            Scalar::Null => sea_query::Value::String(None),
            Scalar::Bool(b) => b.into(),
            Scalar::Integer(i) => i.into(),
            Scalar::Float(f) => f.into(),
            Scalar::String(s) => s.into(),
            Scalar::Datetime(d) => d.into(),
        }
    }

    pub(crate) fn to_json(&self) -> Value {
        self.to_filter_value().to_json()
    }

    pub(crate) fn to_filter_value(&self) -> FilterValue {
        match self {
            Scalar::Null => FilterValue::Null,
            Scalar::Bool(b) => FilterValue::Bool(*b),
            Scalar::Integer(i) => FilterValue::Integer(*i),
            Scalar::Float(f) => FilterValue::Float(*f),
            Scalar::String(s) => FilterValue::String(s.clone()),
            Scalar::Datetime(d) => FilterValue::Datetime(*d),
        }
    }

    /// Lowercase text; other values are unchanged.
    pub(crate) fn folded(self) -> Scalar {
        match self {
            Scalar::String(s) => Scalar::String(s.to_lowercase()),
            other => other,
        }
    }

    /// Total order used by the in-memory evaluator. `Null` is the smallest
    /// value; values of unrelated types do not compare.
    pub(crate) fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
            (Scalar::Null, _) => Some(Ordering::Less),
            (_, Scalar::Null) => Some(Ordering::Greater),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Integer(a), Scalar::Integer(b)) => Some(a.cmp(b)),
            (Scalar::Integer(a), Scalar::Float(b)) => (*a as f64).partial_cmp(b),
            (Scalar::Float(a), Scalar::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
            (Scalar::String(a), Scalar::String(b)) => Some(a.cmp(b)),
            (Scalar::Datetime(a), Scalar::Datetime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Read a stored cell as a scalar of the given type.
    pub(crate) fn from_cell(cell: &Value, value_type: ValueType) -> Scalar {
        match (value_type, cell) {
            (_, Value::Null) => Scalar::Null,
            (ValueType::String | ValueType::JsonString | ValueType::JsonArray, Value::String(s)) => {
                Scalar::String(s.clone())
            }
            (ValueType::String | ValueType::JsonString | ValueType::JsonArray, other) => {
                Scalar::String(other.to_string())
            }
            (ValueType::Number | ValueType::JsonNumber, Value::Number(n)) => match n.as_i64() {
                Some(i) => Scalar::Integer(i),
                None => n.as_f64().map_or(Scalar::Null, Scalar::Float),
            },
            (ValueType::Number | ValueType::JsonNumber, Value::String(s)) => {
                if let Ok(i) = s.parse::<i64>() {
                    Scalar::Integer(i)
                } else {
                    s.parse::<f64>().map_or(Scalar::Null, Scalar::Float)
                }
            }
            (ValueType::Boolean | ValueType::JsonBoolean, Value::Bool(b)) => Scalar::Bool(*b),
            (ValueType::Boolean | ValueType::JsonBoolean, Value::Number(n)) => {
                Scalar::Bool(n.as_i64() == Some(1))
            }
            (ValueType::Boolean | ValueType::JsonBoolean, Value::String(s)) => {
                Scalar::Bool(s == "true")
            }
            (ValueType::Datetime, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map_or(Scalar::Null, |d| Scalar::Datetime(d.with_timezone(&Utc))),
            (ValueType::Datetime, Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map_or(Scalar::Null, Scalar::Datetime),
            _ => Scalar::Null,
        }
    }
}

fn mismatch(field: &str, what: &str, value_type: ValueType) -> FilterError {
    FilterError::TypeMismatch {
        field: field.to_string(),
        message: format!("cannot compare {what} with a {} field", value_type.as_str()),
    }
}

/// Check a literal against a field type and convert it to a [`Scalar`].
pub(crate) fn normalize(
    value: &FilterValue,
    value_type: ValueType,
    field: &str,
    now: DateTime<Utc>,
) -> Result<Scalar, FilterError> {
    use ValueType as T;

    match value {
        FilterValue::Null => Ok(Scalar::Null),
        FilterValue::Now => normalize(&FilterValue::Datetime(now), value_type, field, now),
        FilterValue::Datetime(d) => match value_type {
            T::Datetime => Ok(Scalar::Datetime(*d)),
            _ => Err(mismatch(field, "a date", value_type)),
        },
        FilterValue::String(s) => match value_type {
            T::String | T::JsonString | T::JsonArray => Ok(Scalar::String(s.clone())),
            _ => Err(mismatch(field, "a string", value_type)),
        },
        FilterValue::Bool(b) => match value_type {
            T::Boolean | T::JsonBoolean | T::JsonArray => Ok(Scalar::Bool(*b)),
            _ => Err(mismatch(field, "a boolean", value_type)),
        },
        FilterValue::Integer(i) => match value_type {
            T::Number | T::JsonNumber | T::JsonArray => Ok(Scalar::Integer(*i)),
            T::Boolean | T::JsonBoolean if *i == 0 || *i == 1 => Ok(Scalar::Bool(*i == 1)),
            _ => Err(mismatch(field, "a number", value_type)),
        },
        FilterValue::Float(f) => match value_type {
            T::Number | T::JsonNumber | T::JsonArray => Ok(Scalar::Float(*f)),
            _ => Err(mismatch(field, "a number", value_type)),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_rejected_on_datetime_fields() {
        let err = normalize(&"2024-01-01".into(), ValueType::Datetime, "createdAt", Utc::now())
            .unwrap_err();
        assert!(matches!(err, FilterError::TypeMismatch { ref field, .. } if field == "createdAt"));
    }

    #[test]
    fn now_resolves_to_the_compile_time() {
        let now = Utc::now();
        let scalar = normalize(&FilterValue::Now, ValueType::Datetime, "createdAt", now).unwrap();
        assert_eq!(scalar, Scalar::Datetime(now));
        assert!(normalize(&FilterValue::Now, ValueType::String, "name", now).is_err());
    }

    #[test]
    fn booleans_accept_zero_and_one() {
        let now = Utc::now();
        assert_eq!(
            normalize(&FilterValue::Integer(1), ValueType::Boolean, "active", now).unwrap(),
            Scalar::Bool(true)
        );
        assert!(normalize(&FilterValue::Integer(2), ValueType::Boolean, "active", now).is_err());
    }

    #[test]
    fn null_is_the_smallest_value() {
        assert_eq!(Scalar::Null.compare(&Scalar::Integer(-5)), Some(Ordering::Less));
        assert_eq!(Scalar::Float(0.5).compare(&Scalar::Null), Some(Ordering::Greater));
        assert_eq!(Scalar::Integer(2).compare(&Scalar::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(Scalar::Bool(true).compare(&Scalar::Integer(1)), None);
    }

    #[test]
    fn cells_are_read_by_type() {
        assert_eq!(
            Scalar::from_cell(&json!("2024-01-01T10:00:00.5+00:00"), ValueType::Datetime),
            Scalar::Datetime(
                DateTime::parse_from_rfc3339("2024-01-01T10:00:00.5Z")
                    .unwrap()
                    .with_timezone(&Utc)
            )
        );
        assert_eq!(Scalar::from_cell(&json!("12.5"), ValueType::Number), Scalar::Float(12.5));
        assert_eq!(Scalar::from_cell(&json!(null), ValueType::String), Scalar::Null);
    }
}
