use crate::backend::{Condition, UpdateAction};
use crate::criteria::CriteriaNode;
use crate::dumping::{dump, dump_operand};
use crate::schema::{AttributeDef, ModelSchema};
use crate::types::FieldType;
use crate::{Config, Error, Value};

/// Collects the actions and extra conditions of one atomic update.
pub struct UpdateBuilder<'a> {
    schema: &'a ModelSchema,
    config: &'a Config,
    actions: Vec<UpdateAction>,
    conditions: Vec<Condition>,
}

impl<'a> UpdateBuilder<'a> {
    pub(crate) fn new(schema: &'a ModelSchema, config: &'a Config) -> Self {
        Self {
            schema,
            config,
            actions: Vec::new(),
            conditions: Vec::new(),
        }
    }

    fn writable(&self, name: &str) -> Result<&'a AttributeDef, Error> {
        let attribute = self.schema.require_attribute(name)?;
        if self.schema.is_key_attribute(name) {
            return Err(Error::InvalidState(format!(
                "key attribute {} of {} cannot be updated",
                name, self.schema.name
            )));
        }
        Ok(attribute)
    }

    /// Assigns a value; values dumped as absent remove the attribute.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, Error> {
        let attribute = self.writable(name)?;
        self.actions.push(match dump(&value.into(), attribute, self.config)? {
            Some(dumped) => UpdateAction::Set(name.to_string(), dumped),
            None => UpdateAction::Remove(name.to_string()),
        });
        Ok(self)
    }

    /// Adds to a number, or unions into a set. A scalar added to a set
    /// attribute is treated as a one-element set.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, Error> {
        let attribute = self.writable(name)?;
        if let Some(dumped) = self.operand(attribute, value.into())? {
            self.actions.push(UpdateAction::Add(name.to_string(), dumped));
        }
        Ok(self)
    }

    /// Removes elements from a set attribute.
    pub fn delete(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, Error> {
        let attribute = self.writable(name)?;
        if let Some(dumped) = self.operand(attribute, value.into())? {
            self.actions
                .push(UpdateAction::Delete(name.to_string(), dumped));
        }
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Result<&mut Self, Error> {
        self.writable(name)?;
        self.actions.push(UpdateAction::Remove(name.to_string()));
        Ok(self)
    }

    /// Requires `attribute[.operator] => value` to hold on the stored item.
    pub fn condition(&mut self, token: &str, value: impl Into<Value>) -> Result<&mut Self, Error> {
        let node = CriteriaNode::parse(token, value.into())?;
        self.schema.require_attribute(&node.attribute)?;
        self.conditions.push(node.condition(self.schema, self.config)?);
        Ok(self)
    }

    fn operand(
        &self,
        attribute: &AttributeDef,
        value: Value,
    ) -> Result<Option<crate::AttributeValue>, Error> {
        match (&attribute.field_type, value) {
            (FieldType::Set(_), Value::Set(values)) => dump(&Value::Set(values), attribute, self.config),
            (FieldType::Set(_), value) => dump(&Value::set([value]), attribute, self.config),
            (_, value) => dump_operand(&value, attribute, self.config).map(Some),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<UpdateAction>, Vec<Condition>) {
        (self.actions, self.conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttributeValue;
    use crate::types::TypeRegistry;

    fn schema() -> ModelSchema {
        ModelSchema::builder("Post")
            .hash_key("id", FieldType::String)
            .field("title", FieldType::String)
            .field("views", FieldType::Integer)
            .field("tags", FieldType::set_of(FieldType::String))
            .build(&TypeRegistry::default())
            .unwrap()
    }

    #[test]
    fn builds_actions_and_conditions() {
        let schema = schema();
        let config = Config::default();
        let mut update = UpdateBuilder::new(&schema, &config);
        update.set("title", "hello").unwrap();
        update.set("title", "").unwrap();
        update.add("views", 2).unwrap().add("tags", "rust").unwrap();
        update.delete("tags", Value::set(["old"])).unwrap();
        update.condition("views.lt", 10).unwrap();

        let (actions, conditions) = update.into_parts();
        assert_eq!(
            actions,
            vec![
                UpdateAction::Set("title".into(), AttributeValue::S("hello".into())),
                UpdateAction::Remove("title".into()),
                UpdateAction::Add("views".into(), AttributeValue::N("2".into())),
                UpdateAction::Add("tags".into(), AttributeValue::Ss(["rust".to_string()].into())),
                UpdateAction::Delete("tags".into(), AttributeValue::Ss(["old".to_string()].into())),
            ]
        );
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn rejects_keys_and_unknown_attributes() {
        let schema = schema();
        let config = Config::default();
        let mut update = UpdateBuilder::new(&schema, &config);
        assert!(matches!(update.set("id", "2"), Err(Error::InvalidState(_))));
        assert!(matches!(
            update.add("likes", 1),
            Err(Error::UnknownAttribute { .. })
        ));
    }
}
