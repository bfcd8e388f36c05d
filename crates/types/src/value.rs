//! Resolved configuration values and their dynamic type.
//!
//! A [`Value`] is either live for its whole life (backed by an atomically
//! swappable payload shared by every clone) or a permanent not-found marker.
//! Callers always get a `Value` back from a lookup and learn about a missing
//! key only when they try to read it.

use crate::{ConfigError, error::Result};
use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

/// Dynamic type of a payload, used to gate change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
}

impl Kind {
    /// Classifies a JSON payload.
    ///
    /// Integers and floats are deliberately distinct kinds: a key changing
    /// from `1` to `1.5` is a kind change, so the cached value keeps `1` and
    /// no observer fires. Write `1.0` to keep a float key a float.
    #[must_use]
    pub fn of(value: &Json) -> Self {
        match value {
            Json::Null => Self::Null,
            Json::Bool(_) => Self::Bool,
            Json::Number(n) if n.is_f64() => Self::Float,
            Json::Number(_) => Self::Int,
            Json::String(_) => Self::String,
            Json::Array(_) => Self::Array,
            Json::Object(_) => Self::Object,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Storage behind a live [`Value`].
pub struct Slot {
    key: String,
    payload: ArcSwap<Json>,
}

/// A handle to one resolved configuration leaf.
///
/// Cloning is cheap and preserves identity: every clone of a live value
/// observes the same payload, including later [`Value::store`] calls.
#[derive(Clone)]
pub enum Value {
    /// The key resolved; the payload may be replaced in place.
    Found(Arc<Slot>),
    /// The key was absent at lookup time. Never changes.
    NotFound(Arc<str>),
}

impl Value {
    /// Creates a live value holding `payload`.
    pub fn found(key: impl Into<String>, payload: Json) -> Self {
        Self::Found(Arc::new(Slot {
            key: key.into(),
            payload: ArcSwap::from_pointee(payload),
        }))
    }

    /// Creates a not-found marker for `key`.
    pub fn not_found(key: &str) -> Self {
        Self::NotFound(Arc::from(key))
    }

    /// The key this value was looked up under.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Found(slot) => &slot.key,
            Self::NotFound(key) => key,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Returns the current payload, or `None` for a not-found value.
    #[must_use]
    pub fn load(&self) -> Option<Arc<Json>> {
        match self {
            Self::Found(slot) => Some(slot.payload.load_full()),
            Self::NotFound(_) => None,
        }
    }

    /// Atomically replaces the payload of a live value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadOnly`] for a not-found value.
    pub fn store(&self, payload: Json) -> Result<()> {
        match self {
            Self::Found(slot) => {
                slot.payload.store(Arc::new(payload));
                Ok(())
            }
            Self::NotFound(key) => Err(ConfigError::ReadOnly(key.to_string())),
        }
    }

    /// Dynamic type of the current payload.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        self.load().map(|v| Kind::of(&v))
    }

    /// Returns `true` if both handles share the same storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Found(a), Self::Found(b)) => Arc::ptr_eq(a, b),
            (Self::NotFound(a), Self::NotFound(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ── Typed accessors ───────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not convertible.
    pub fn bool(&self) -> Result<bool> {
        let v = self.payload()?;
        let parsed = match &*v {
            Json::Bool(b) => Some(*b),
            Json::Number(n) => parse_bool(&n.to_string()),
            Json::String(s) => parse_bool(s),
            _ => None,
        };
        parsed.ok_or_else(|| self.mismatch("bool", &v))
    }

    /// Floats are truncated; strings must hold a decimal integer.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not convertible.
    #[allow(clippy::cast_possible_truncation)]
    pub fn int(&self) -> Result<i64> {
        let v = self.payload()?;
        let parsed = match &*v {
            Json::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .or_else(|| n.as_f64().map(|f| f as i64)),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| self.mismatch("int", &v))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not convertible.
    pub fn float(&self) -> Result<f64> {
        let v = self.payload()?;
        let parsed = match &*v {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| self.mismatch("float", &v))
    }

    /// Scalars are rendered; arrays and objects are rejected.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not convertible.
    pub fn string(&self) -> Result<String> {
        let v = self.payload()?;
        match &*v {
            Json::String(s) => Ok(s.clone()),
            Json::Bool(b) => Ok(b.to_string()),
            Json::Number(n) => Ok(n.to_string()),
            other => Err(self.mismatch("string", other)),
        }
    }

    /// Reads an integer number of nanoseconds.
    ///
    /// # Errors
    ///
    /// Fails like [`Value::int`], and on negative durations.
    pub fn duration(&self) -> Result<Duration> {
        let nanos = self.int()?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| ConfigError::TypeAssert {
                key: self.key().to_string(),
                expected: "duration",
                actual: Kind::Int,
            })
    }

    /// Wraps each array element in its own live value.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not an array.
    pub fn slice(&self) -> Result<Vec<Value>> {
        let v = self.payload()?;
        match &*v {
            Json::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| Value::found(format!("{}.{i}", self.key()), item.clone()))
                .collect()),
            other => Err(self.mismatch("array", other)),
        }
    }

    /// Wraps each object member in its own live value.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::TypeAssert`] if not an object.
    pub fn map(&self) -> Result<BTreeMap<String, Value>> {
        let v = self.payload()?;
        match &*v {
            Json::Object(members) => Ok(members
                .iter()
                .map(|(k, item)| {
                    let key = format!("{}.{k}", self.key());
                    (k.clone(), Value::found(key, item.clone()))
                })
                .collect()),
            other => Err(self.mismatch("object", other)),
        }
    }

    /// Deserializes the current payload into `T`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] if absent, [`ConfigError::Serialization`] if the shape does not fit.
    pub fn scan<T: DeserializeOwned>(&self) -> Result<T> {
        let v = self.payload()?;
        Ok(T::deserialize(&*v)?)
    }

    fn payload(&self) -> Result<Arc<Json>> {
        self.load()
            .ok_or_else(|| ConfigError::NotFound(self.key().to_string()))
    }

    fn mismatch(&self, expected: &'static str, actual: &Json) -> ConfigError {
        ConfigError::TypeAssert {
            key: self.key().to_string(),
            expected,
            actual: Kind::of(actual),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(slot) => f
                .debug_struct("Found")
                .field("key", &slot.key)
                .field("payload", &slot.payload.load_full())
                .finish(),
            Self::NotFound(key) => f.debug_tuple("NotFound").field(key).finish(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_kind_distinguishes_int_and_float() {
        assert_eq!(Kind::of(&json!(5)), Kind::Int);
        assert_eq!(Kind::of(&json!(5.5)), Kind::Float);
        assert_eq!(Kind::of(&json!(1.0)), Kind::Float);
        assert_ne!(Kind::of(&json!(1)), Kind::of(&json!(1.5)));
        assert_eq!(Kind::of(&json!("5")), Kind::String);
        assert_eq!(Kind::of(&json!(null)), Kind::Null);
        assert_eq!(Kind::of(&json!({"a": 1})), Kind::Object);
    }

    #[test]
    fn test_store_visible_to_all_clones() {
        let v = Value::found("level", json!("info"));
        let held = v.clone();
        v.store(json!("debug")).unwrap();
        assert_eq!(*held.load().unwrap(), json!("debug"));
        assert!(held.ptr_eq(&v));
    }

    #[test]
    fn test_not_found_has_no_payload() {
        let v = Value::not_found("missing");
        assert!(v.load().is_none());
        assert!(!v.is_found());
        assert_eq!(v.key(), "missing");
        assert!(v.kind().is_none());
    }

    #[test]
    fn test_not_found_is_read_only() {
        let v = Value::not_found("missing");
        let err = v.store(json!(1)).unwrap_err();
        assert!(matches!(err, ConfigError::ReadOnly(k) if k == "missing"));
        assert!(v.load().is_none());
    }

    #[test]
    fn test_accessors_on_not_found() {
        let v = Value::not_found("missing");
        assert!(matches!(v.int(), Err(ConfigError::NotFound(_))));
        assert!(matches!(v.string(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_bool_conversions() {
        assert!(Value::found("k", json!(true)).bool().unwrap());
        assert!(Value::found("k", json!("True")).bool().unwrap());
        assert!(!Value::found("k", json!(0)).bool().unwrap());
        assert!(Value::found("k", json!("yes")).bool().is_err());
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(Value::found("k", json!(42)).int().unwrap(), 42);
        assert_eq!(Value::found("k", json!(3.9)).int().unwrap(), 3);
        assert_eq!(Value::found("k", json!(" -7 ")).int().unwrap(), -7);
        let err = Value::found("k", json!([1])).int().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TypeAssert {
                expected: "int",
                actual: Kind::Array,
                ..
            }
        ));
    }

    #[test]
    fn test_float_and_string_conversions() {
        assert!((Value::found("k", json!(2)).float().unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((Value::found("k", json!("0.5")).float().unwrap() - 0.5).abs() < f64::EPSILON);
        assert_eq!(Value::found("k", json!(8080)).string().unwrap(), "8080");
        assert_eq!(Value::found("k", json!(false)).string().unwrap(), "false");
        assert!(Value::found("k", json!({})).string().is_err());
    }

    #[test]
    fn test_duration_from_nanos() {
        let v = Value::found("timeout", json!(1_500_000_000));
        assert_eq!(v.duration().unwrap(), Duration::from_millis(1500));
        assert!(Value::found("timeout", json!(-1)).duration().is_err());
    }

    #[test]
    fn test_slice_and_map() {
        let list = Value::found("hosts", json!(["a", "b"]));
        let items = list.slice().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].key(), "hosts.1");
        assert_eq!(items[1].string().unwrap(), "b");

        let obj = Value::found("db", json!({"host": "x", "port": 5432}));
        let members = obj.map().unwrap();
        assert_eq!(members["port"].int().unwrap(), 5432);
        assert_eq!(members["host"].key(), "db.host");
    }

    #[test]
    fn test_scan_into_struct() {
        #[derive(Deserialize)]
        struct Db {
            host: String,
            port: u16,
        }
        let v = Value::found("db", json!({"host": "x", "port": 5432}));
        let db: Db = v.scan().unwrap();
        assert_eq!(db.host, "x");
        assert_eq!(db.port, 5432);
    }
}
