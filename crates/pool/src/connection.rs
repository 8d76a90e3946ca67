//! Backend connection contracts
//!
//! The pool knows nothing about how connections are made. Callers supply a
//! [`ConnectionFactory`] that yields boxed [`DatabaseConnection`]s; the pool
//! only creates, lends, and closes them.

use crate::error::{PoolError, PoolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;

/// A live backend connection
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and return its rows
    async fn query(&mut self, sql: &str) -> PoolResult<Vec<Row>>;

    /// Execute a statement with positional parameters and return its rows
    async fn query_with_params(&mut self, sql: &str, params: &[QueryParam])
        -> PoolResult<Vec<Row>>;

    /// Close the connection
    async fn close(&mut self) -> PoolResult<()>;
}

/// Produces one live backend connection per call
///
/// Retrying is the factory's business; the pool treats any error as
/// "could not grow".
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> PoolResult<Box<dyn DatabaseConnection>>;
}

/// Convenience implementation for closure-based factories
#[async_trait]
impl<F, Fut> ConnectionFactory for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = PoolResult<Box<dyn DatabaseConnection>>> + Send,
{
    async fn create(&self) -> PoolResult<Box<dyn DatabaseConnection>> {
        (self)().await
    }
}

/// Declared SQL type of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Bit,
    Int,
    BigInt,
    Decimal,
    Float,
    Char,
    VarChar,
    NVarChar,
    Date,
    DateTime,
    VarBinary,
}

/// One positional query parameter
///
/// `name` is kept for logging; positional-placeholder backends ignore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub param_type: ParamType,
    pub value: DatabaseValue,
}

impl QueryParam {
    pub fn new<N, V>(name: N, param_type: ParamType, value: V) -> Self
    where
        N: Into<String>,
        V: Into<DatabaseValue>,
    {
        Self {
            name: name.into(),
            param_type,
            value: value.into(),
        }
    }
}

/// Database value enumeration for parameter binding and result columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column to the row
    pub fn with_column<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<DatabaseValue>,
    {
        self.columns.push(name.into());
        self.values.push(value.into());
        self
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> PoolResult<&DatabaseValue> {
        self.values
            .get(index)
            .ok_or_else(|| PoolError::ColumnNotFound(format!("#{}", index)))
    }

    /// Get a column value by name (case-insensitive, as SQL Server reports it)
    pub fn get_by_name(&self, name: &str) -> PoolResult<&DatabaseValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|i| &self.values[i])
            .ok_or_else(|| PoolError::ColumnNotFound(name.to_string()))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Convert row to a JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup() {
        let row = Row::new()
            .with_column("ITEMNO", "A-100")
            .with_column("QTY", 12)
            .with_column("NOTE", Option::<String>::None);

        assert_eq!(row.column_count(), 3);
        assert_eq!(row.get_by_name("itemno").unwrap(), &DatabaseValue::from("A-100"));
        assert_eq!(row.get_by_index(1).unwrap(), &DatabaseValue::Int32(12));
        assert!(row.get_by_name("NOTE").unwrap().is_null());
        assert_eq!(
            row.get_by_name("missing"),
            Err(PoolError::ColumnNotFound("missing".into()))
        );
    }

    #[test]
    fn test_row_to_json() {
        let row = Row::new().with_column("ID", 7i64).with_column("ACTIVE", true);
        assert_eq!(row.to_json(), serde_json::json!({"ID": 7, "ACTIVE": true}));
    }

    #[test]
    fn test_query_param_construction() {
        let param = QueryParam::new("warehouse", ParamType::VarChar, "MAIN");
        assert_eq!(param.value, DatabaseValue::String("MAIN".into()));
        assert_eq!(param.param_type, ParamType::VarChar);
    }

    #[test]
    fn test_float_to_json_handles_nan() {
        assert_eq!(DatabaseValue::Float64(f64::NAN).to_json(), JsonValue::Null);
        assert_eq!(DatabaseValue::Float64(1.5).to_json(), serde_json::json!(1.5));
    }
}
