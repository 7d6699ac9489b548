use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::ModelSchema;
use crate::value::FromValue;
use crate::{Attributes, Error, Key, Model, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    New,
    Persisted,
    Destroyed,
}

/// In-memory attribute values of one item plus its persistence state and the
/// prior values of every attribute changed since it was loaded or saved.
#[derive(Clone)]
pub struct Document {
    schema: Arc<ModelSchema>,
    attributes: Attributes,
    changes: BTreeMap<String, Value>,
    state: State,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.schema.name)
            .field("state", &self.state)
            .field("attributes", &self.attributes)
            .field("changed", &self.changes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Document {
    /// A new record carrying the declared defaults.
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        let mut document = Self {
            schema,
            attributes: Attributes::new(),
            changes: BTreeMap::new(),
            state: State::New,
        };
        let schema = document.schema.clone();
        for attribute in schema.attributes() {
            if let Some(default) = &attribute.default {
                document.write(&attribute.name, default.clone());
            }
        }
        document
    }

    /// A persisted record as read from storage.
    pub(crate) fn loaded(schema: Arc<ModelSchema>, attributes: Attributes) -> Self {
        Self {
            schema,
            attributes,
            changes: BTreeMap::new(),
            state: State::Persisted,
        }
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        &self.schema.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Typed read; absent attributes convert from [`Value::Null`].
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        T::from_value(name, self.attributes.get(name).unwrap_or(&Value::Null))
    }

    /// Assigns a declared attribute and records it as changed. Assigning
    /// `Null` removes it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.schema.require_attribute(name)?;
        self.write(name, value.into());
        Ok(())
    }

    pub fn assign(&mut self, attributes: Attributes) -> Result<(), Error> {
        for (name, value) in attributes {
            self.set(&name, value)?;
        }
        Ok(())
    }

    fn write(&mut self, name: &str, value: Value) {
        let prior = self.attributes.get(name).cloned().unwrap_or(Value::Null);
        match self.changes.get(name) {
            Some(original) if *original == value => {
                self.changes.remove(name);
            }
            Some(_) => {}
            None if prior == value => {}
            None => {
                self.changes.insert(name.to_string(), prior);
            }
        }
        if value.is_null() {
            self.attributes.remove(name);
        } else {
            self.attributes.insert(name.to_string(), value);
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_new_record(&self) -> bool {
        self.state == State::New
    }

    pub fn is_persisted(&self) -> bool {
        self.state == State::Persisted
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == State::Destroyed
    }

    pub fn is_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changed(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// Value an attribute had before the pending change, if it has one.
    pub fn was(&self, name: &str) -> Option<&Value> {
        self.changes.get(name)
    }

    pub fn hash_value(&self) -> Option<&Value> {
        self.attributes.get(&self.schema.hash_key)
    }

    pub fn range_value(&self) -> Option<&Value> {
        self.schema
            .range_key
            .as_ref()
            .and_then(|range_key| self.attributes.get(range_key))
    }

    pub fn key(&self) -> Result<Key, Error> {
        let hash = self
            .hash_value()
            .cloned()
            .ok_or_else(|| Error::MissingHashKey(self.schema.name.clone()))?;
        let range = match &self.schema.range_key {
            Some(_) => Some(
                self.range_value()
                    .cloned()
                    .ok_or_else(|| Error::MissingRangeKey(self.schema.name.clone()))?,
            ),
            None => None,
        };
        Ok(Key { hash, range })
    }

    pub fn lock_version(&self) -> Option<i64> {
        self.schema
            .lock_version
            .as_ref()
            .and_then(|name| self.attributes.get(name))
            .and_then(Value::as_i64)
    }

    pub fn to_model<M: Model>(&self) -> Result<M, Error> {
        M::from_attributes(&self.attributes)
    }

    /// Writes without recording a change; used for values the engine assigns.
    pub(crate) fn put_raw(&mut self, name: &str, value: Value) {
        if value.is_null() {
            self.attributes.remove(name);
        } else {
            self.attributes.insert(name.to_string(), value);
        }
    }

    pub(crate) fn replace_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.state = State::Persisted;
        self.changes.clear();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.state = State::Destroyed;
        self.changes.clear();
    }

    pub(crate) fn require_persisted(&self, operation: &str) -> Result<(), Error> {
        match self.state {
            State::Persisted => Ok(()),
            State::New => Err(Error::InvalidState(format!(
                "cannot {} a new {} record",
                operation, self.schema.name
            ))),
            State::Destroyed => Err(Error::InvalidState(format!(
                "cannot {} a destroyed {} record",
                operation, self.schema.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;
    use crate::types::{FieldType, TypeRegistry};

    fn schema() -> Arc<ModelSchema> {
        Arc::new(
            ModelSchema::builder("User")
                .hash_key("id", FieldType::String)
                .range_key("age", FieldType::Integer)
                .field("name", FieldType::String)
                .attribute(AttributeDef::new("role", FieldType::String).default_value("member"))
                .lock_version()
                .build(&TypeRegistry::default())
                .unwrap(),
        )
    }

    #[test]
    fn new_documents_carry_defaults() {
        let document = Document::new(schema());
        assert!(document.is_new_record());
        assert_eq!(document.get("role"), Some(&Value::from("member")));
        assert_eq!(document.get_as::<String>("name").unwrap(), "");
    }

    #[test]
    fn tracks_changes_against_the_loaded_value() {
        let mut document = Document::loaded(
            schema(),
            crate::attrs! { "id" => "1", "age" => 3, "name" => "Alex" },
        );
        assert!(!document.is_changed());

        document.set("name", "Bob").unwrap();
        document.set("name", "Carl").unwrap();
        assert_eq!(document.changed().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(document.was("name"), Some(&Value::from("Alex")));

        document.set("name", "Alex").unwrap();
        assert!(!document.is_changed());

        document.set("name", Value::Null).unwrap();
        assert_eq!(document.get("name"), None);
        assert!(document.is_changed());

        assert!(matches!(
            document.set("nickname", "x"),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn key_requires_both_components() {
        let mut document = Document::new(schema());
        assert!(matches!(document.key(), Err(Error::MissingHashKey(_))));
        document.set("id", "1").unwrap();
        assert!(matches!(document.key(), Err(Error::MissingRangeKey(_))));
        document.set("age", 21).unwrap();
        let key = document.key().unwrap();
        assert_eq!(key.hash, Value::from("1"));
        assert_eq!(key.range, Some(Value::from(21)));
    }

    #[test]
    fn state_guards_persisted_operations() {
        let mut document = Document::loaded(schema(), crate::attrs! { "id" => "1", "age" => 1 });
        assert!(document.require_persisted("touch").is_ok());
        document.mark_destroyed();
        assert!(matches!(
            document.require_persisted("touch"),
            Err(Error::InvalidState(_))
        ));
    }
}
