use std::collections::HashMap;
use std::sync::Arc;

use crate::lifecycle::{Event, Hook, HookResult, Lifecycle, Timing};
use crate::types::{FieldType, TypeRegistry};
use crate::{Document, Error, Value};

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const LOCK_VERSION: &str = "lock_version";

#[derive(Clone, Debug)]
pub struct AttributeDef {
    pub name: String,
    pub field_type: FieldType,
    /// Per-field override of the datetime/date storage format.
    pub store_as_string: Option<bool>,
    pub default: Option<Value>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            store_as_string: None,
            default: None,
        }
    }

    pub fn store_as_string(mut self, store_as_string: bool) -> Self {
        self.store_as_string = Some(store_as_string);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Global,
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct SecondaryIndex {
    pub name: String,
    pub kind: IndexKind,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub projection: Projection,
    pub read_capacity: Option<u64>,
    pub write_capacity: Option<u64>,
}

impl SecondaryIndex {
    /// A global index; named `index_<hash>[_<range>]` unless renamed.
    pub fn global(hash_key: impl Into<String>) -> Self {
        let hash_key = hash_key.into();
        Self {
            name: format!("index_{}", hash_key),
            kind: IndexKind::Global,
            hash_key,
            range_key: None,
            projection: Projection::KeysOnly,
            read_capacity: None,
            write_capacity: None,
        }
    }

    /// A local index over `range_key`; its hash key is filled in from the table.
    pub fn local(range_key: impl Into<String>) -> Self {
        let range_key = range_key.into();
        Self {
            name: format!("index_{}", range_key),
            kind: IndexKind::Local,
            hash_key: String::new(),
            range_key: Some(range_key),
            projection: Projection::KeysOnly,
            read_capacity: None,
            write_capacity: None,
        }
    }

    pub fn range_key(mut self, range_key: impl Into<String>) -> Self {
        let range_key = range_key.into();
        if self.kind == IndexKind::Global && self.name == format!("index_{}", self.hash_key) {
            self.name = format!("index_{}_{}", self.hash_key, range_key);
        }
        self.range_key = Some(range_key);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn capacity(mut self, read: u64, write: u64) -> Self {
        self.read_capacity = Some(read);
        self.write_capacity = Some(write);
        self
    }

    pub fn key_attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash_key.as_str()).chain(self.range_key.as_deref())
    }
}

/// Declared shape of one document class. Immutable once built.
#[derive(Clone)]
pub struct ModelSchema {
    pub name: String,
    pub table: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub lock_version: Option<String>,
    pub ttl: Option<String>,
    pub timestamps: bool,
    pub indexes: Vec<SecondaryIndex>,
    pub read_capacity: Option<u64>,
    pub write_capacity: Option<u64>,
    pub lifecycle: Lifecycle,
    attributes: Vec<AttributeDef>,
    positions: HashMap<String, usize>,
}

impl std::fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("hash_key", &self.hash_key)
            .field("range_key", &self.range_key)
            .field("indexes", &self.indexes)
            .finish()
    }
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.positions.get(name).map(|&i| &self.attributes[i])
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub(crate) fn require_attribute(&self, name: &str) -> Result<&AttributeDef, Error> {
        self.attribute(name).ok_or_else(|| Error::UnknownAttribute {
            model: self.name.clone(),
            attribute: name.to_string(),
        })
    }

    pub fn index(&self, name: &str) -> Result<&SecondaryIndex, Error> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| Error::UnknownIndex {
                model: self.name.clone(),
                index: name.to_string(),
            })
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.hash_key == name || self.range_key.as_deref() == Some(name)
    }
}

pub struct SchemaBuilder {
    name: String,
    table: Option<String>,
    hash_key: Option<String>,
    range_key: Option<String>,
    lock_version: Option<String>,
    ttl: Option<String>,
    timestamps: bool,
    indexes: Vec<SecondaryIndex>,
    capacity: Option<(u64, u64)>,
    attributes: Vec<AttributeDef>,
    lifecycle: Lifecycle,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            hash_key: None,
            range_key: None,
            lock_version: None,
            ttl: None,
            timestamps: true,
            indexes: Vec::new(),
            capacity: None,
            attributes: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn hash_key(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        self.hash_key = Some(name.clone());
        self.attribute(AttributeDef::new(name, field_type))
    }

    pub fn range_key(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        self.range_key = Some(name.clone());
        self.attribute(AttributeDef::new(name, field_type))
    }

    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.attribute(AttributeDef::new(name, field_type))
    }

    /// Declares an attribute; redeclaring a name replaces the earlier definition.
    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        self
    }

    /// Enables optimistic locking on an integer `lock_version` attribute.
    pub fn lock_version(mut self) -> Self {
        self.lock_version = Some(LOCK_VERSION.to_string());
        self.field(LOCK_VERSION, FieldType::Integer)
    }

    pub fn ttl(mut self, attribute: impl Into<String>) -> Self {
        self.ttl = Some(attribute.into());
        self
    }

    pub fn timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn capacity(mut self, read: u64, write: u64) -> Self {
        self.capacity = Some((read, write));
        self
    }

    pub fn index(mut self, index: SecondaryIndex) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn hook<F>(mut self, event: Event, timing: Timing, hook: F) -> Self
    where
        F: Fn(&mut Document) -> HookResult + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        self.lifecycle.add_hook(event, timing, hook);
        self
    }

    pub fn before<F>(self, event: Event, hook: F) -> Self
    where
        F: Fn(&mut Document) -> HookResult + Send + Sync + 'static,
    {
        self.hook(event, Timing::Before, hook)
    }

    pub fn after<F>(self, event: Event, hook: F) -> Self
    where
        F: Fn(&mut Document) + Send + Sync + 'static,
    {
        self.hook(event, Timing::After, move |document| {
            hook(document);
            HookResult::Continue
        })
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.lifecycle.add_validator(Arc::new(validator));
        self
    }

    pub fn build(self, types: &TypeRegistry) -> Result<ModelSchema, Error> {
        let unknown = |attribute: &str| Error::UnknownAttribute {
            model: self.name.clone(),
            attribute: attribute.to_string(),
        };

        let hash_key = self
            .hash_key
            .clone()
            .ok_or_else(|| Error::MissingHashKey(self.name.clone()))?;

        let mut attributes = Vec::with_capacity(self.attributes.len() + 2);
        for attribute in &self.attributes {
            attributes.push(AttributeDef {
                field_type: attribute.field_type.clone().resolve(types)?,
                ..attribute.clone()
            });
        }
        if self.timestamps {
            for name in [CREATED_AT, UPDATED_AT] {
                if !attributes.iter().any(|a| a.name == name) {
                    attributes.push(AttributeDef::new(name, FieldType::DateTime));
                }
            }
        }
        let positions: HashMap<String, usize> = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();

        let mut indexes = Vec::with_capacity(self.indexes.len());
        for mut index in self.indexes {
            if index.kind == IndexKind::Local {
                index.hash_key = hash_key.clone();
                if index.range_key.is_none() {
                    return Err(Error::IndexIncompatible {
                        index: index.name,
                        reason: "a local index needs a range key".into(),
                    });
                }
            }
            for key in index.key_attributes() {
                if !positions.contains_key(key) {
                    return Err(unknown(key));
                }
            }
            if let Projection::Include(names) = &index.projection {
                if let Some(missing) = names.iter().find(|n| !positions.contains_key(n.as_str())) {
                    return Err(unknown(missing));
                }
            }
            indexes.push(index);
        }
        if let Some(ttl) = &self.ttl {
            if !positions.contains_key(ttl) {
                return Err(unknown(ttl));
            }
        }

        let table = self
            .table
            .unwrap_or_else(|| format!("{}s", self.name.to_lowercase()));

        Ok(ModelSchema {
            name: self.name,
            table,
            hash_key,
            range_key: self.range_key,
            lock_version: self.lock_version,
            ttl: self.ttl,
            timestamps: self.timestamps,
            indexes,
            read_capacity: self.capacity.map(|(r, _)| r),
            write_capacity: self.capacity.map(|(_, w)| w),
            lifecycle: self.lifecycle,
            attributes,
            positions,
        })
    }
}

/// Link-time model declaration, submitted by `#[derive(KvDocument)]`.
pub struct ModelDeclaration {
    pub name: &'static str,
    pub schema: fn() -> SchemaBuilder,
}

impl std::fmt::Debug for ModelDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelDeclaration {{ name: {} }}", self.name)
    }
}

inventory::collect!(ModelDeclaration);

/// Every schema known to an application. Built once, read-only afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    models: Vec<Arc<ModelSchema>>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelSchema>, Error> {
        self.by_name
            .get(name)
            .map(|&i| self.models[i].clone())
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.iter()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    types: TypeRegistry,
    schemas: Vec<SchemaBuilder>,
}

impl RegistryBuilder {
    pub fn types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    pub fn register(mut self, schema: SchemaBuilder) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Adds every model declared with `#[derive(KvDocument)]` in the binary.
    pub fn discover(mut self) -> Self {
        let mut declarations: Vec<_> = inventory::iter::<ModelDeclaration>().collect();
        declarations.sort_by_key(|declaration| declaration.name);
        for declaration in declarations {
            if !self.schemas.iter().any(|s| s.name == declaration.name) {
                self.schemas.push((declaration.schema)());
            }
        }
        self
    }

    pub fn build(self) -> Result<Arc<Registry>, Error> {
        let mut registry = Registry::default();
        for schema in self.schemas {
            let schema = schema.build(&self.types)?;
            registry
                .by_name
                .insert(schema.name.clone(), registry.models.len());
            registry.models.push(Arc::new(schema));
        }
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_schema_with_timestamps_and_indexes() {
        let schema = ModelSchema::builder("Post")
            .hash_key("id", FieldType::String)
            .range_key("posted_at", FieldType::DateTime)
            .field("author", FieldType::String)
            .field("rating", FieldType::Number)
            .lock_version()
            .index(SecondaryIndex::global("author").range_key("rating"))
            .index(SecondaryIndex::local("rating").name("by_rating"))
            .build(&TypeRegistry::default())
            .unwrap();

        assert_eq!(schema.table, "posts");
        assert!(schema.has_attribute(CREATED_AT));
        assert!(schema.has_attribute(LOCK_VERSION));
        assert_eq!(schema.indexes[0].name, "index_author_rating");
        assert_eq!(schema.indexes[1].hash_key, "id");
        assert!(schema.index("by_rating").is_ok());
        assert!(matches!(
            schema.index("missing"),
            Err(Error::UnknownIndex { .. })
        ));
    }

    #[test]
    fn rejects_index_over_undeclared_attribute() {
        let result = ModelSchema::builder("Post")
            .hash_key("id", FieldType::String)
            .index(SecondaryIndex::global("author"))
            .build(&TypeRegistry::default());
        assert!(matches!(
            result,
            Err(Error::UnknownAttribute { attribute, .. }) if attribute == "author"
        ));
    }

    #[test]
    fn resolves_named_types_against_registry() {
        let builder = || {
            ModelSchema::builder("Account")
                .hash_key("id", FieldType::String)
                .field("balance", FieldType::Named("money".into()))
        };
        assert!(matches!(
            builder().build(&TypeRegistry::default()),
            Err(Error::UnknownType(name)) if name == "money"
        ));

        let types = TypeRegistry::default().register(crate::types::CustomType::new(
            "money",
            |_| Ok(crate::AttributeValue::N("0".into())),
            |_| Ok(Value::Integer(0)),
        ));
        let schema = builder().build(&types).unwrap();
        assert!(matches!(
            schema.attribute("balance").unwrap().field_type,
            FieldType::Custom(_)
        ));
    }
}
