//! Database value types
//!
//! This module defines the values stored in and retrieved from databases,
//! the type hints that control how a value is bound, and the parameter
//! containers handed to [`DbApi::query`](crate::DbApi::query).

use super::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            DatabaseValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        self.as_long().and_then(|v| i32::try_from(v).ok())
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v as i64),
            DatabaseValue::Float(v) => Some(*v as i64),
            DatabaseValue::Double(v) => Some(*v as i64),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as f64),
            DatabaseValue::Int(v) => Some(*v as f64),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string (zero-copy for String values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a string (with conversion)
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::Null => "null".to_string(),
            DatabaseValue::Bool(v) => v.to_string(),
            DatabaseValue::Int(v) => v.to_string(),
            DatabaseValue::Long(v) => v.to_string(),
            DatabaseValue::Float(v) => v.to_string(),
            DatabaseValue::Double(v) => v.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(v: bool) -> Self {
        DatabaseValue::Bool(v)
    }
}

impl From<i32> for DatabaseValue {
    fn from(v: i32) -> Self {
        DatabaseValue::Int(v)
    }
}

impl From<i64> for DatabaseValue {
    fn from(v: i64) -> Self {
        DatabaseValue::Long(v)
    }
}

impl From<f32> for DatabaseValue {
    fn from(v: f32) -> Self {
        DatabaseValue::Float(v)
    }
}

impl From<f64> for DatabaseValue {
    fn from(v: f64) -> Self {
        DatabaseValue::Double(v)
    }
}

impl From<String> for DatabaseValue {
    fn from(v: String) -> Self {
        DatabaseValue::String(v)
    }
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(v: Vec<u8>) -> Self {
        DatabaseValue::Bytes(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A row of database results (column name -> value mapping)
pub type DatabaseRow = HashMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

/// How a bound value is presented to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Text (the default)
    #[default]
    Str,
    /// 64-bit integer
    Int,
    /// Boolean
    Bool,
    /// SQL `NULL` regardless of the value
    Null,
    /// Large object, bound as raw bytes
    Lob,
}

impl ParamType {
    /// Convert `value` into the representation this hint binds.
    ///
    /// `NULL` stays `NULL` under every hint.
    pub fn coerce(self, value: DatabaseValue) -> Result<DatabaseValue> {
        if value.is_null() {
            return Ok(DatabaseValue::Null);
        }

        match self {
            ParamType::Null => Ok(DatabaseValue::Null),
            ParamType::Str => Ok(match value {
                DatabaseValue::String(_) | DatabaseValue::Bytes(_) => value,
                DatabaseValue::Bool(v) => DatabaseValue::String(if v { "1" } else { "0" }.into()),
                other => DatabaseValue::String(other.as_string()),
            }),
            ParamType::Int => match value {
                DatabaseValue::Bytes(_) => Err(DatabaseError::type_mismatch("int", "bytes")),
                other => other
                    .as_long()
                    .map(DatabaseValue::Long)
                    .ok_or_else(|| DatabaseError::type_mismatch("int", other.type_name())),
            },
            ParamType::Bool => value
                .as_bool()
                .map(DatabaseValue::Bool)
                .ok_or_else(|| DatabaseError::type_mismatch("bool", value.type_name())),
            ParamType::Lob => Ok(match value {
                DatabaseValue::Bytes(_) => value,
                DatabaseValue::String(s) => DatabaseValue::Bytes(s.into_bytes()),
                other => DatabaseValue::Bytes(other.as_string().into_bytes()),
            }),
        }
    }
}

/// A value supplied for one placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Bare value, bound with [`ParamType::Str`]
    Scalar(DatabaseValue),
    /// Value with an explicit type hint
    Typed(DatabaseValue, ParamType),
    /// Sequence that expands one placeholder into a parenthesized list
    List(Vec<DatabaseValue>, ParamType),
}

impl Param {
    /// Value with an explicit type hint
    pub fn typed(value: impl Into<DatabaseValue>, param_type: ParamType) -> Self {
        Param::Typed(value.into(), param_type)
    }

    /// List bound with the default hint
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        Param::List(values.into_iter().map(Into::into).collect(), ParamType::Str)
    }

    /// List whose elements all carry `param_type`
    pub fn list_typed<I, V>(values: I, param_type: ParamType) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        Param::List(values.into_iter().map(Into::into).collect(), param_type)
    }

    /// Values to bind after applying the type hint, in placeholder order
    pub fn bound_values(&self) -> Result<Vec<DatabaseValue>> {
        match self {
            Param::Scalar(v) => Ok(vec![ParamType::Str.coerce(v.clone())?]),
            Param::Typed(v, t) => Ok(vec![t.coerce(v.clone())?]),
            Param::List(values, t) => values.iter().map(|v| t.coerce(v.clone())).collect(),
        }
    }
}

macro_rules! param_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::Scalar(v.into())
                }
            }
        )*
    };
}

param_from_scalar!(bool, i32, i64, f32, f64, String, &str, Vec<u8>);

impl From<DatabaseValue> for Param {
    fn from(v: DatabaseValue) -> Self {
        Param::Scalar(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        Param::Scalar(v.into())
    }
}

/// Key of a bound parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    /// Zero-based position, bound to `?`
    Index(usize),
    /// Name, bound to `:name`
    Name(String),
}

impl std::fmt::Display for ParamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamKey::Index(i) => write!(f, "#{}", i),
            ParamKey::Name(n) => write!(f, ":{}", n),
        }
    }
}

/// Ordered parameter table for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(ParamKey, Param)>,
}

impl Params {
    /// Create an empty parameter table
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameters in the given order
    pub fn positional<I, P>(values: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        Self {
            entries: values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (ParamKey::Index(i), v.into()))
                .collect(),
        }
    }

    /// Bind a named parameter; a leading `:` on `name` is ignored
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        let name = name.into();
        let name = name.strip_prefix(':').map(str::to_string).unwrap_or(name);
        self.insert(ParamKey::Name(name), value.into());
        self
    }

    /// Append a positional parameter
    #[must_use]
    pub fn push(mut self, value: impl Into<Param>) -> Self {
        let index = self.entries.len();
        self.insert(ParamKey::Index(index), value.into());
        self
    }

    /// Set `key`, replacing any earlier value under the same key
    pub fn insert(&mut self, key: ParamKey, value: Param) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Append all entries of `other`, replacing duplicated keys
    pub fn extend(&mut self, other: Params) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    /// Look up a parameter by key
    pub fn get(&self, key: &ParamKey) -> Option<&Param> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of entries (a list counts once)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no parameter is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn as_slice(&self) -> &[(ParamKey, Param)] {
        &self.entries
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(ParamKey, Param)> {
        self.entries.iter()
    }
}

impl<K: Into<String>, P: Into<Param>> FromIterator<(K, P)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, P)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Params::new(), |params, (k, v)| params.bind(k, v))
    }
}
