use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{AttributeValue, Error, Value};

/// Scalar types a backend can index as key attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    String,
    Number,
    Binary,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::String => write!(f, "S"),
            KeyKind::Number => write!(f, "N"),
            KeyKind::Binary => write!(f, "B"),
        }
    }
}

pub type DumpFn = Arc<dyn Fn(&Value) -> Result<AttributeValue, Error> + Send + Sync>;
pub type LoadFn = Arc<dyn Fn(&AttributeValue) -> Result<Value, Error> + Send + Sync>;

/// A user supplied type: a tag plus its dump/load pair.
pub struct CustomType {
    pub name: String,
    /// Wire representation when the type is used as a key attribute.
    pub key_kind: Option<KeyKind>,
    pub dump: DumpFn,
    pub load: LoadFn,
}

impl CustomType {
    pub fn new<D, L>(name: impl Into<String>, dump: D, load: L) -> Self
    where
        D: Fn(&Value) -> Result<AttributeValue, Error> + Send + Sync + 'static,
        L: Fn(&AttributeValue) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key_kind: None,
            dump: Arc::new(dump),
            load: Arc::new(load),
        }
    }

    pub fn key_kind(mut self, kind: KeyKind) -> Self {
        self.key_kind = Some(kind);
        self
    }
}

impl fmt::Debug for CustomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomType({})", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    DateTime,
    Date,
    Binary,
    /// Set with an optional element type; inferred from the values when absent.
    Set(Option<Box<FieldType>>),
    Array(Option<Box<FieldType>>),
    Map,
    Raw,
    /// Any value, stored as a JSON string.
    Serialized,
    /// Reference to a registered custom type, resolved when the registry is built.
    Named(String),
    Custom(Arc<CustomType>),
}

impl FieldType {
    pub fn set_of(element: FieldType) -> Self {
        FieldType::Set(Some(Box::new(element)))
    }

    pub fn array_of(element: FieldType) -> Self {
        FieldType::Array(Some(Box::new(element)))
    }

    pub fn name(&self) -> String {
        match self {
            FieldType::String => "string".into(),
            FieldType::Integer => "integer".into(),
            FieldType::Number => "number".into(),
            FieldType::Boolean => "boolean".into(),
            FieldType::DateTime => "datetime".into(),
            FieldType::Date => "date".into(),
            FieldType::Binary => "binary".into(),
            FieldType::Set(_) => "set".into(),
            FieldType::Array(_) => "array".into(),
            FieldType::Map => "map".into(),
            FieldType::Raw => "raw".into(),
            FieldType::Serialized => "serialized".into(),
            FieldType::Named(name) => name.clone(),
            FieldType::Custom(custom) => custom.name.clone(),
        }
    }

    /// Key representation of this type, `None` when it can't be a key.
    pub fn key_kind(&self, store_as_string: bool) -> Option<KeyKind> {
        match self {
            FieldType::String | FieldType::Serialized => Some(KeyKind::String),
            FieldType::Integer | FieldType::Number => Some(KeyKind::Number),
            FieldType::Binary => Some(KeyKind::Binary),
            FieldType::DateTime | FieldType::Date if store_as_string => Some(KeyKind::String),
            FieldType::DateTime | FieldType::Date => Some(KeyKind::Number),
            FieldType::Custom(custom) => custom.key_kind,
            _ => None,
        }
    }

    pub(crate) fn resolve(self, types: &TypeRegistry) -> Result<FieldType, Error> {
        Ok(match self {
            FieldType::Named(name) => FieldType::Custom(types.get(&name)?),
            FieldType::Set(Some(element)) => FieldType::set_of(element.resolve(types)?),
            FieldType::Array(Some(element)) => FieldType::array_of(element.resolve(types)?),
            other => other,
        })
    }
}

/// Custom types by tag.
#[derive(Clone, Default, Debug)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<CustomType>>,
}

impl TypeRegistry {
    pub fn register(mut self, custom: CustomType) -> Self {
        self.types.insert(custom.name.clone(), Arc::new(custom));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<CustomType>, Error> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }
}
