//! Filter tree and its JSON wire format.
//!
//! The wire format is the Mongo-like dialect listing endpoints accept:
//!
//! ```json
//! { "name": { "$contains": "sc" }, "$or": [{ "active": true }, { "createdAt": { "$gt": { "$": "$now" } } }] }
//! ```
//!
//! Decoding happens once at the request boundary; everything past that
//! point works on the typed [`Filter`] tree.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use super::error::FilterError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Wire name of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Neq => "$neq",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(CompareOp::Eq),
            "$neq" | "$ne" => Some(CompareOp::Neq),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }
}

/// A literal value inside a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Datetime(DateTime<Utc>),
    /// `{"$": "$now"}`, resolved when the filter is compiled or evaluated.
    Now,
}

impl FilterValue {
    /// Decode a literal from its wire form.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Null => Ok(FilterValue::Null),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(FilterValue::Integer(i)),
                None => n.as_f64().map(FilterValue::Float).ok_or_else(|| {
                    FilterError::InvalidFilter(format!("number {n} is out of range"))
                }),
            },
            Value::String(s) => Ok(FilterValue::String(s.clone())),
            Value::Object(map) if map.contains_key("$") => Self::from_magic(map),
            _ => Err(FilterError::InvalidFilter(
                "expected a string, number, boolean, date or null".to_string(),
            )),
        }
    }

    fn from_magic(map: &Map<String, Value>) -> Result<Self, FilterError> {
        match map.get("$").and_then(Value::as_str) {
            Some("$now") => Ok(FilterValue::Now),
            Some("$date") => {
                let parsed = match map.get("value") {
                    Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
                    Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|d| d.with_timezone(&Utc)),
                    _ => None,
                };
                parsed.map(FilterValue::Datetime).ok_or_else(|| {
                    FilterError::InvalidFilter(
                        "$date expects epoch milliseconds or an RFC 3339 string".to_string(),
                    )
                })
            }
            other => Err(FilterError::InvalidFilter(format!(
                "unsupported magic value {}",
                other.unwrap_or("(missing)")
            ))),
        }
    }

    /// Encode to the wire form. Datetimes keep microsecond precision.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::Integer(i) => json!(i),
            FilterValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::Datetime(d) => json!({
                "$": "$date",
                "value": d.to_rfc3339_opts(SecondsFormat::Micros, true),
            }),
            FilterValue::Now => json!({ "$": "$now" }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Datetime(value)
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Scopes the inner filter to a field, namespace or relation.
    Field { key: String, filter: Box<Filter> },
    Compare(CompareOp, FilterValue),
    In(Vec<FilterValue>),
    NotIn(Vec<FilterValue>),
    Contains(String),
    ElemMatch(Box<Filter>),
}

impl Filter {
    /// `{ key: filter }`
    pub fn field(key: impl Into<String>, filter: Filter) -> Self {
        Filter::Field {
            key: key.into(),
            filter: Box::new(filter),
        }
    }

    /// `{ key: { op: value } }`
    pub fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<FilterValue>) -> Self {
        Filter::field(key, Filter::Compare(op, value.into()))
    }

    /// `{ key: value }`
    pub fn eq(key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::compare(key, CompareOp::Eq, value)
    }

    /// `{ key: { $contains: needle } }`
    pub fn contains(key: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::field(key, Filter::Contains(needle.into()))
    }

    /// Operator name used in error messages.
    pub fn operator(&self) -> &'static str {
        match self {
            Filter::And(_) => "$and",
            Filter::Or(_) => "$or",
            Filter::Not(_) => "$not",
            Filter::Field { .. } => "field",
            Filter::Compare(op, _) => op.as_str(),
            Filter::In(_) => "$in",
            Filter::NotIn(_) => "$nin",
            Filter::Contains(_) => "$contains",
            Filter::ElemMatch(_) => "$elemMatch",
        }
    }

    /// Decode a filter from its wire form.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) if map.contains_key("$") => Ok(Filter::Compare(
                CompareOp::Eq,
                FilterValue::from_json(value)?,
            )),
            Value::Object(map) => {
                let mut parts = map
                    .iter()
                    .map(|(key, value)| Self::from_entry(key, value))
                    .collect::<Result<Vec<_>, _>>()?;
                if parts.len() == 1 {
                    Ok(parts.remove(0))
                } else {
                    Ok(Filter::And(parts))
                }
            }
            Value::Array(items) => Ok(Filter::And(Self::from_list(items)?)),
            scalar => Ok(Filter::Compare(CompareOp::Eq, FilterValue::from_json(scalar)?)),
        }
    }

    fn from_list(items: &[Value]) -> Result<Vec<Filter>, FilterError> {
        items.iter().map(Self::from_json).collect()
    }

    fn from_values(key: &str, value: &Value) -> Result<Vec<FilterValue>, FilterError> {
        let Value::Array(items) = value else {
            return Err(FilterError::InvalidFilter(format!(
                "expected an array at {key}"
            )));
        };
        items.iter().map(FilterValue::from_json).collect()
    }

    fn from_entry(key: &str, value: &Value) -> Result<Self, FilterError> {
        if let Some(op) = CompareOp::from_key(key) {
            return Ok(Filter::Compare(op, FilterValue::from_json(value)?));
        }
        match key {
            "$and" | "$or" => {
                let children = match value {
                    Value::Array(items) => Self::from_list(items)?,
                    other => vec![Self::from_json(other)?],
                };
                Ok(if key == "$and" {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                })
            }
            "$not" => Ok(Filter::Not(Box::new(Self::from_json(value)?))),
            "$in" => Ok(Filter::In(Self::from_values(key, value)?)),
            "$nin" => Ok(Filter::NotIn(Self::from_values(key, value)?)),
            "$contains" => match value {
                Value::String(s) => Ok(Filter::Contains(s.clone())),
                _ => Err(FilterError::InvalidFilter(
                    "expected a string at $contains".to_string(),
                )),
            },
            "$elemMatch" => Ok(Filter::ElemMatch(Box::new(Self::from_json(value)?))),
            other if other.starts_with('$') => Err(FilterError::InvalidFilter(format!(
                "unsupported filter operator {other}"
            ))),
            field => Ok(Filter::field(field, Self::from_json(value)?)),
        }
    }

    /// Encode to the wire form. Comparisons always use the explicit operator.
    pub fn to_json(&self) -> Value {
        let values = |items: &[FilterValue]| -> Value {
            Value::Array(items.iter().map(FilterValue::to_json).collect())
        };
        match self {
            Filter::And(items) => json!({ "$and": items.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Or(items) => json!({ "$or": items.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Not(inner) => json!({ "$not": inner.to_json() }),
            Filter::Field { key, filter } => {
                let mut map = Map::new();
                map.insert(key.clone(), filter.to_json());
                Value::Object(map)
            }
            Filter::Compare(op, value) => {
                let mut map = Map::new();
                map.insert(op.as_str().to_string(), value.to_json());
                Value::Object(map)
            }
            Filter::In(items) => json!({ "$in": values(items) }),
            Filter::NotIn(items) => json!({ "$nin": values(items) }),
            Filter::Contains(needle) => json!({ "$contains": needle }),
            Filter::ElemMatch(inner) => json!({ "$elemMatch": inner.to_json() }),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Filter::from_json(&value).map_err(serde::de::Error::custom)
    }
}
