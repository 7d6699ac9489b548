use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::Error;

/// Application level attribute value, before dumping.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Binary(Vec<u8>),
    Set(BTreeSet<Value>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Attribute values keyed by attribute name.
pub type Attributes = BTreeMap<String, Value>;

/// Storage primitive as accepted by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    Ss(BTreeSet<String>),
    Ns(BTreeSet<String>),
    Bs(BTreeSet<Vec<u8>>),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

/// A stored item: wire values keyed by attribute name.
pub type Item = BTreeMap<String, AttributeValue>;

/// Build an [`Attributes`] map.
///
/// ```
/// let attrs = kv_document::attrs! { "name" => "Alex", "age" => 21 };
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => { $crate::Attributes::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::Attributes::new();
        $(
            attributes.insert(::std::string::String::from($name), $crate::Value::from($value));
        )+
        attributes
    }};
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::DateTime(_) => 5,
            Value::Date(_) => 6,
            Value::Binary(_) => 7,
            Value::Set(_) => 8,
            Value::List(_) => 9,
            Value::Map(_) => 10,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// True for the empty string and for empty sets, lists and maps.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn set<I, T>(values: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Set(values.into_iter().map(Into::into).collect())
    }

    pub fn list<I, T>(values: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(values.into_iter().map(Into::into).collect())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Binary(bytes.into())
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Integer(value as i64)
                }
            }
        )+
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::list(value)
    }
}

impl<T: Into<Value>> From<BTreeSet<T>> for Value {
    fn from(value: BTreeSet<T>) -> Self {
        Value::set(value)
    }
}

impl<T: Into<Value>> From<HashSet<T>> for Value {
    fn from(value: HashSet<T>) -> Self {
        Value::set(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

/// Conversion from a loaded [`Value`] into a typed model field.
pub trait FromValue: Sized {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error>;
}

impl FromValue for Value {
    fn from_value(_attribute: &str, value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Null => Ok(String::new()),
            other => Err(Error::mismatch(attribute, "string", other)),
        }
    }
}

macro_rules! impl_from_value_integer {
    ($($t:ty),+) => {
        $(
            impl FromValue for $t {
                fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
                    match value {
                        Value::Null => Ok(0),
                        other => other
                            .as_i64()
                            .and_then(|i| <$t>::try_from(i).ok())
                            .ok_or_else(|| Error::mismatch(attribute, stringify!($t), other)),
                    }
                }
            }
        )+
    };
}

impl_from_value_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(0.0),
            other => other
                .as_f64()
                .ok_or_else(|| Error::mismatch(attribute, "number", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Null => Ok(false),
            other => Err(Error::mismatch(attribute, "boolean", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            other => Err(Error::mismatch(attribute, "datetime", other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Date(d) => Ok(*d),
            other => Err(Error::mismatch(attribute, "date", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(attribute, other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            Value::Set(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            other => Err(Error::mismatch(attribute, "list", other)),
        }
    }
}

impl<T: FromValue + Ord> FromValue for BTreeSet<T> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(BTreeSet::new()),
            Value::Set(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            Value::List(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            other => Err(Error::mismatch(attribute, "set", other)),
        }
    }
}

impl<T: FromValue + Eq + std::hash::Hash> FromValue for HashSet<T> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(HashSet::new()),
            Value::Set(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            Value::List(items) => items.iter().map(|v| T::from_value(attribute, v)).collect(),
            other => Err(Error::mismatch(attribute, "set", other)),
        }
    }
}

impl FromValue for BTreeMap<String, Value> {
    fn from_value(attribute: &str, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(map) => Ok(map.clone()),
            other => Err(Error::mismatch(attribute, "map", other)),
        }
    }
}
