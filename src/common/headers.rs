//! Scalar header values shared by message headers and declaration arguments

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Message headers
pub type Headers = HashMap<String, HeaderValue>;

/// Exchange/queue declaration arguments
pub type Arguments = HashMap<String, HeaderValue>;

/// A scalar (or null) header value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl HeaderValue {
    /// String content, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HeaderValue::Null)
    }

    /// Convert a decoded JSON value; arrays and objects are kept as their JSON text
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HeaderValue::Null,
            serde_json::Value::Bool(flag) => HeaderValue::Bool(flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => HeaderValue::Int(int),
                None => HeaderValue::Float(number.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(text) => HeaderValue::String(text),
            other => HeaderValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Null => Ok(()),
            HeaderValue::Bool(flag) => write!(f, "{}", flag),
            HeaderValue::Int(int) => write!(f, "{}", int),
            HeaderValue::Float(float) => write!(f, "{}", float),
            HeaderValue::String(text) => f.write_str(text),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl<T: Into<HeaderValue>> From<Option<T>> for HeaderValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HeaderValue::Null)
    }
}
