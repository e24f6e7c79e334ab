//! Constant values and their SQL literal text.
//!
//! Everything a caller captures into a query passes through [`format_literal`]
//! or [`escape_like`] before it reaches clause text.

use crate::error::{QueryError, Result};
use crate::schema::{FieldType, TypeClass};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt;

/// `TIMESTAMP` literal layout, always UTC
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A constant captured into a query
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Field type a value has on its own, `None` for `NULL` and lists
    pub fn natural_type(&self) -> Option<FieldType> {
        match self {
            Value::Null | Value::List(_) => None,
            Value::Bool(_) => Some(FieldType::Boolean),
            Value::Int(_) => Some(FieldType::Integer),
            Value::Float(_) => Some(FieldType::Float),
            Value::Text(_) => Some(FieldType::String),
            Value::Date(_) => Some(FieldType::Date),
            Value::DateTime(_) => Some(FieldType::Datetime),
        }
    }

    /// Whether this value may be compared against a field of `declared` type.
    pub fn fits(&self, declared: &FieldType) -> bool {
        match (self, declared.class()) {
            (Value::Null, _) => true,
            (Value::Bool(_), TypeClass::Boolean) => true,
            (Value::Int(_) | Value::Float(_), TypeClass::Numeric | TypeClass::Text) => true,
            (Value::Text(_), TypeClass::Text | TypeClass::Temporal) => true,
            (Value::Date(_) | Value::DateTime(_), TypeClass::Temporal) => true,
            (Value::List(items), _) => items.iter().all(|item| item.fits(declared)),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(Utc.from_utc_datetime(&v))
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(v: DateTime<Tz>) -> Self {
        Value::DateTime(v.with_timezone(&Utc))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            object @ serde_json::Value::Object(_) => Value::Text(object.to_string()),
        }
    }
}

/// Quote a string, doubling embedded quotes and backslashes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Escape `LIKE` wildcards so the text matches literally.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render a value as SQL literal text for a field of the `declared` type.
pub fn format_literal(value: &Value, declared: Option<&FieldType>) -> Result<String> {
    let textual = declared.is_some_and(FieldType::is_text);
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Int(i) if textual => Ok(quote(&i.to_string())),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(v) if !v.is_finite() => Err(QueryError::InvalidLiteral(format!(
            "{} is not representable in SQL",
            v
        ))),
        Value::Float(v) if textual => Ok(quote(&v.to_string())),
        Value::Float(v) => Ok(v.to_string()),
        Value::Text(s) => Ok(quote(s)),
        Value::Date(d) => match declared {
            Some(FieldType::Date) | None => Ok(quote(&d.format(DATE_FORMAT).to_string())),
            Some(_) => Ok(quote(&d.format("%Y-%m-%d 00:00:00").to_string())),
        },
        Value::DateTime(dt) => Ok(quote(&dt.format(DATETIME_FORMAT).to_string())),
        Value::List(items) => format_list(items, declared),
    }
}

/// Render a parenthesized `IN` list.
pub fn format_list(items: &[Value], declared: Option<&FieldType>) -> Result<String> {
    if items.is_empty() {
        return Err(QueryError::EmptyInClause(
            "IN () is not valid SQL; handle the empty case before building the query".to_string(),
        ));
    }
    let item_type = declared.map(|ty| ty.item_type().unwrap_or(ty));
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        if let Value::List(_) = item {
            return Err(QueryError::InvalidLiteral(format!(
                "nested list {} inside IN",
                item
            )));
        }
        parts.push(format_literal(item, item_type)?);
    }
    Ok(format!("({})", parts.join(",")))
}
