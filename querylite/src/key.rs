// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Structured query keys and their canonical encoding
//!
//! A key is an ordered list of segments. Each segment is a string, a number,
//! or a flat mapping of property name to primitive value (typically a filter
//! suffix such as `{"comments": true}`). Keys are looked up by their
//! canonical string encoding and matched structurally for prefix
//! invalidation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{QueryError, QueryResult};

/// A primitive value allowed inside a mapping segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Primitive {
    fn to_value(&self) -> Value {
        match self {
            Primitive::Null => Value::Null,
            Primitive::Bool(b) => Value::Bool(*b),
            Primitive::Number(n) => Value::Number(n.clone()),
            Primitive::String(s) => Value::String(s.clone()),
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Primitive::Null),
            Value::Bool(b) => Ok(Primitive::Bool(b)),
            Value::Number(n) => Ok(Primitive::Number(normalize_number(n))),
            Value::String(s) => Ok(Primitive::String(s)),
            Value::Array(_) => Err("arrays are not allowed inside mapping segments".to_string()),
            Value::Object(_) => Err("nested mappings are not allowed".to_string()),
        }
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Bool(b)
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::String(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::String(s)
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Primitive::Number(Number::from(n))
    }
}

impl From<i32> for Primitive {
    fn from(n: i32) -> Self {
        Primitive::Number(Number::from(n))
    }
}

impl From<u64> for Primitive {
    fn from(n: u64) -> Self {
        Primitive::Number(Number::from(n))
    }
}

impl<T: Into<Primitive>> From<Option<T>> for Primitive {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Primitive::Null)
    }
}

/// One segment of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    String(String),
    Number(Number),
    Map(BTreeMap<String, Primitive>),
}

impl KeySegment {
    /// Build a mapping segment from name/value pairs
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Primitive>,
    {
        KeySegment::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Floating point segment; `None` for NaN and infinities
    pub fn float(value: f64) -> Option<Self> {
        Number::from_f64(value).map(|n| KeySegment::Number(normalize_number(n)))
    }

    /// Collapse integral floats, including inside mapping segments
    fn normalized(self) -> Self {
        match self {
            KeySegment::Number(n) => KeySegment::Number(normalize_number(n)),
            KeySegment::Map(map) => KeySegment::Map(
                map.into_iter()
                    .map(|(name, value)| match value {
                        Primitive::Number(n) => (name, Primitive::Number(normalize_number(n))),
                        other => (name, other),
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            KeySegment::String(s) => Value::String(s.clone()),
            KeySegment::Number(n) => Value::Number(n.clone()),
            KeySegment::Map(map) => {
                let mut object = Map::new();
                for (name, value) in map {
                    object.insert(name.clone(), value.to_value());
                }
                Value::Object(object)
            }
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(KeySegment::String(s)),
            Value::Number(n) => Ok(KeySegment::Number(normalize_number(n))),
            Value::Object(object) => {
                let mut map = BTreeMap::new();
                for (name, value) in object {
                    let primitive = Primitive::from_value(value)
                        .map_err(|reason| format!("property '{}': {}", name, reason))?;
                    map.insert(name, primitive);
                }
                Ok(KeySegment::Map(map))
            }
            Value::Null => Err("null is not a valid segment".to_string()),
            Value::Bool(_) => Err("booleans are only allowed inside mapping segments".to_string()),
            Value::Array(_) => Err("arrays are not valid segments".to_string()),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        KeySegment::String(s.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(s: String) -> Self {
        KeySegment::String(s)
    }
}

impl From<&String> for KeySegment {
    fn from(s: &String) -> Self {
        KeySegment::String(s.clone())
    }
}

impl From<i64> for KeySegment {
    fn from(n: i64) -> Self {
        KeySegment::Number(Number::from(n))
    }
}

impl From<i32> for KeySegment {
    fn from(n: i32) -> Self {
        KeySegment::Number(Number::from(n))
    }
}

impl From<u64> for KeySegment {
    fn from(n: u64) -> Self {
        KeySegment::Number(Number::from(n))
    }
}

impl From<u32> for KeySegment {
    fn from(n: u32) -> Self {
        KeySegment::Number(Number::from(n))
    }
}

impl From<usize> for KeySegment {
    fn from(n: usize) -> Self {
        KeySegment::Number(Number::from(n as u64))
    }
}

/// Integral floats collapse to integers so `1` and `1.0` address the same entry
fn normalize_number(n: Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                return Number::from(f as i64);
            }
        }
    }
    n
}

/// Structured query key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Key {
    segments: Vec<KeySegment>,
}

impl Key {
    /// Empty key, to be extended with [`Key::push`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<KeySegment>) -> Self {
        Self {
            segments: segments.into_iter().map(KeySegment::normalized).collect(),
        }
    }

    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.segments.push(segment.into().normalized());
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Reject keys that cannot address an entry
    pub fn validate(&self) -> QueryResult<()> {
        if self.segments.is_empty() {
            return Err(QueryError::InvalidKey(
                "key must have at least one segment".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical string used for registry lookups
    pub fn encode(&self) -> String {
        // Mapping segments are BTreeMap-backed, so property order is already sorted.
        Value::from(self.clone()).to_string()
    }

    /// True iff `self`'s segments are a literal prefix of `key`'s
    pub fn is_prefix_of(&self, key: &Key) -> bool {
        self.segments.len() <= key.segments.len()
            && self
                .segments
                .iter()
                .zip(key.segments.iter())
                .all(|(a, b)| a == b)
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.segments.iter().map(KeySegment::to_value).collect())
    }
}

/// Free-function form of [`Key::is_prefix_of`]
pub fn is_prefix(candidate: &Key, key: &Key) -> bool {
    candidate.is_prefix_of(key)
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        key.to_value()
    }
}

impl TryFrom<Value> for Key {
    type Error = QueryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(QueryError::InvalidKey(format!(
                    "expected an array of segments, got {}",
                    value_kind(&other)
                )))
            }
        };

        let segments = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                KeySegment::from_value(item)
                    .map_err(|reason| QueryError::InvalidKey(format!("segment {}: {}", index, reason)))
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let key = Key { segments };
        key.validate()?;
        Ok(key)
    }
}

impl TryFrom<&str> for Key {
    type Error = QueryError;

    /// Parse a canonical encoding back into a key
    fn try_from(encoded: &str) -> Result<Self, Self::Error> {
        let value: Value = serde_json::from_str(encoded)
            .map_err(|e| QueryError::InvalidKey(format!("not a valid encoded key: {}", e)))?;
        Key::try_from(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Build a [`Key`] from segment expressions
///
/// ```ignore
/// let key = key!["documents", 1, KeySegment::map([("comments", true)])];
/// ```
#[macro_export]
macro_rules! key {
    ($($segment:expr),* $(,)?) => {
        $crate::key::Key::new()$(.push($segment))*
    };
}
