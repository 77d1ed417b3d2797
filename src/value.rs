//! Dynamically-typed configuration values.
//!
//! Both desired (user-authored) and observed (remote) state are carried as a
//! [`ConfigValue`]: an ordered map from field name to [`Value`]. Nested blocks
//! are always lists of maps, single blocks included, so "no block" and "empty
//! list" are the same observable state.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string value.
    String(String),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A map from string keys to values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build a list of strings.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Build a nested block value (a list holding one map).
    pub fn block(config: ConfigValue) -> Self {
        Self::List(vec![Self::Map(config.0)])
    }

    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns the string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number as a float if this is an int or a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the bool if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the elements if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Whether the value is the "zero" of its kind: an empty string, list or map.
    ///
    /// Zero values are treated exactly like an absent field.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Stable content hash, used as the identity of set elements.
    ///
    /// Two values with the same content always hash the same, independent of
    /// process or insertion order.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Fnv64::default();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::String(s) => {
                state.write_u8(0);
                s.hash(state);
            },
            Self::Int(i) => {
                state.write_u8(1);
                i.hash(state);
            },
            Self::Float(f) => {
                state.write_u8(2);
                // -0.0 and 0.0 must collide
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                normalized.to_bits().hash(state);
            },
            Self::Bool(b) => {
                state.write_u8(3);
                b.hash(state);
            },
            Self::List(items) => {
                state.write_u8(4);
                state.write_usize(items.len());
                for item in items {
                    item.hash_into(state);
                }
            },
            Self::Map(map) => {
                state.write_u8(5);
                state.write_usize(map.len());
                for (key, value) in map {
                    key.hash(state);
                    value.hash_into(state);
                }
            },
        }
    }

    /// Total order used to normalise sets: by content hash, then structurally.
    pub fn set_order(a: &Value, b: &Value) -> Ordering {
        a.content_hash()
            .cmp(&b.content_hash())
            .then_with(|| a.to_json().to_string().cmp(&b.to_json().to_string()))
    }

    /// Normalise a collection into set form: ordered by content hash, duplicates removed.
    pub fn normalize_set(mut items: Vec<Value>) -> Vec<Value> {
        items.sort_by(Value::set_order);
        items.dedup();
        items
    }

    /// Convert a JSON value. `null` has no representation and yields `None`;
    /// nulls inside maps are dropped and inside lists are skipped.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(Self::Float),
            },
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(items) => {
                Some(Self::List(items.iter().filter_map(Self::from_json).collect()))
            },
            serde_json::Value::Object(obj) => Some(Self::Map(
                obj.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Convert to JSON. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// `f` as an `i64` when the conversion is exact.
pub(crate) fn exact_int(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).ok_or_else(|| serde::de::Error::custom("null is not a value"))
    }
}

/// FNV-1a, chosen because its output is fixed across Rust releases.
struct Fnv64(u64);

impl Default for Fnv64 {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for Fnv64 {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }
}

/// A configuration snapshot: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigValue(pub BTreeMap<String, Value>);

impl ConfigValue {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a value, treating zero values as absent.
    pub fn get_set(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_empty())
    }

    /// Look up a string, treating an empty string as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_set(key).and_then(Value::as_str)
    }

    /// Look up a list, returning an empty slice when absent.
    pub fn get_list(&self, key: &str) -> &[Value] {
        self.0.get(key).and_then(Value::as_list).unwrap_or(&[])
    }

    /// Look up the single element of a nested block.
    pub fn get_block(&self, key: &str) -> Option<ConfigValue> {
        self.get_list(key)
            .first()
            .and_then(Value::as_map)
            .map(|map| ConfigValue(map.clone()))
    }

    /// Whether the snapshot holds a non-zero value for `key`.
    pub fn is_set(&self, key: &str) -> bool {
        self.get_set(key).is_some()
    }

    /// Iterate over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a JSON object. Anything else yields an empty snapshot.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match Value::from_json(json) {
            Some(Value::Map(map)) => Self(map),
            _ => Self::default(),
        }
    }

    /// Convert to a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.0.clone()).to_json()
    }
}

impl From<BTreeMap<String, Value>> for ConfigValue {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl From<ConfigValue> for Value {
    fn from(config: ConfigValue) -> Self {
        Value::Map(config.0)
    }
}
