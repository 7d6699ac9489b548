//! Create, save, update and delete, on documents and on keys.
//!
//! Hooks nest as save > create|update > validation: `before` hooks run
//! outermost first, `after` hooks innermost first. A `before` hook returning
//! [`HookResult::Abort`] stops the operation without touching the backend.

use std::future::Future;

use chrono::Utc;

use crate::backend::{
    BackendResult, Condition, DeleteItem, GetItem, PutItem, UpdateAction, UpdateItem,
    WriteRequest,
};
use crate::dumping::{dump, dump_item, dump_operand, load_item};
use crate::error::BackendError;
use crate::lifecycle::{Event, HookResult};
use crate::schema::{CREATED_AT, UPDATED_AT};
use crate::types::FieldType;
use crate::update::UpdateBuilder;
use crate::{AttributeValue, Attributes, Document, Error, Item, Key, Table, Value};

const BATCH_GET_SIZE: usize = 100;
const BATCH_WRITE_SIZE: usize = 25;

/// Per-call switches for save-like operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveOptions {
    pub validate: bool,
    pub callbacks: bool,
    /// Stamp `updated_at` when saving changes.
    pub touch: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            callbacks: true,
            touch: true,
        }
    }
}

impl SaveOptions {
    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn skip_callbacks(mut self) -> Self {
        self.callbacks = false;
        self
    }

    pub fn without_touch(mut self) -> Self {
        self.touch = false;
        self
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    Proceed,
    Invalid(Vec<String>),
    Aborted,
}

impl Outcome {
    pub(crate) fn strict(self, model: &str) -> Result<(), Error> {
        match self {
            Outcome::Proceed => Ok(()),
            Outcome::Invalid(errors) => Err(Error::DocumentNotValid(errors)),
            Outcome::Aborted => Err(Error::RecordNotSaved(format!("{} was aborted by a hook", model))),
        }
    }
}

fn save_event(document: &Document) -> Event {
    if document.is_new_record() {
        Event::Create
    } else {
        Event::Update
    }
}

fn number(n: i64) -> AttributeValue {
    AttributeValue::N(n.to_string())
}

impl Table {
    /// Before hooks and validation of a save.
    pub(crate) fn before_save(&self, document: &mut Document, options: SaveOptions) -> Outcome {
        let lifecycle = &self.schema.lifecycle;
        if options.callbacks {
            if lifecycle.run_before(Event::Save, document) == HookResult::Abort {
                return Outcome::Aborted;
            }
            if lifecycle.run_before(save_event(document), document) == HookResult::Abort {
                return Outcome::Aborted;
            }
        }
        if options.validate {
            match lifecycle.validate(document) {
                Err(()) => return Outcome::Aborted,
                Ok(errors) if !errors.is_empty() => return Outcome::Invalid(errors),
                Ok(_) => {}
            }
        }
        Outcome::Proceed
    }

    pub(crate) fn after_save(&self, document: &mut Document, event: Event, options: SaveOptions) {
        if options.callbacks {
            self.schema.lifecycle.run_after(event, document);
            self.schema.lifecycle.run_after(Event::Save, document);
        }
    }

    /// Fills in the engine-assigned attributes of a new record and builds
    /// its conditional put.
    pub(crate) fn prepare_create(&self, document: &mut Document) -> Result<PutItem, Error> {
        let schema = &self.schema;
        if document.hash_value().is_none() {
            match schema.require_attribute(&schema.hash_key)?.field_type {
                FieldType::String => document.put_raw(
                    &schema.hash_key,
                    Value::String(uuid::Uuid::new_v4().to_string()),
                ),
                _ => return Err(Error::MissingHashKey(schema.name.clone())),
            }
        }
        if schema.range_key.is_some() && document.range_value().is_none() {
            return Err(Error::MissingRangeKey(schema.name.clone()));
        }
        if self.timestamps() {
            let now = Value::DateTime(Utc::now());
            if document.get(CREATED_AT).is_none() {
                document.put_raw(CREATED_AT, now.clone());
            }
            if document.get(UPDATED_AT).is_none() {
                document.put_raw(UPDATED_AT, now);
            }
        }
        if let Some(lock) = &schema.lock_version {
            let version = document.lock_version().unwrap_or(0) + 1;
            document.put_raw(lock, Value::Integer(version));
        }
        Ok(PutItem {
            table: self.name(),
            item: dump_item(document.attributes(), schema, self.config())?,
            condition: Some(Condition::not_exists(&schema.hash_key)),
        })
    }

    /// Existence plus, under optimistic locking, the last known version.
    fn lock_condition(&self, document: &Document) -> Condition {
        let exists = Condition::exists(&self.schema.hash_key);
        match &self.schema.lock_version {
            Some(lock) => exists.and(match document.lock_version() {
                Some(version) => Condition::eq(lock, number(version)),
                None => Condition::not_exists(lock),
            }),
            None => exists,
        }
    }

    /// The conditional update writing a persisted record's changes, or
    /// `None` when nothing changed.
    pub(crate) fn prepare_changes(
        &self,
        document: &mut Document,
        touch: bool,
    ) -> Result<Option<UpdateItem>, Error> {
        if !document.is_changed() {
            return Ok(None);
        }
        let schema = &self.schema;
        if let Some(key) = document.changed().find(|name| schema.is_key_attribute(name)) {
            return Err(Error::InvalidState(format!(
                "key attribute {} of a persisted {} cannot change",
                key, schema.name
            )));
        }
        if touch && self.timestamps() && document.was(UPDATED_AT).is_none() {
            document.set(UPDATED_AT, Utc::now())?;
        }
        let mut actions = Vec::new();
        for name in document.changed() {
            let attribute = schema.require_attribute(name)?;
            let value = document.get(name).unwrap_or(&Value::Null);
            actions.push(match dump(value, attribute, self.config())? {
                Some(dumped) => UpdateAction::Set(name.to_string(), dumped),
                None => UpdateAction::Remove(name.to_string()),
            });
        }
        if let Some(lock) = &schema.lock_version {
            actions.push(UpdateAction::Add(lock.clone(), number(1)));
        }
        Ok(Some(UpdateItem {
            table: self.name(),
            key: self.key_item(&document.key()?)?,
            actions,
            condition: Some(self.lock_condition(document)),
        }))
    }

    /// Unconditional on a missing item, version-checked on an existing one.
    pub(crate) fn prepare_delete(&self, document: &Document) -> Result<DeleteItem, Error> {
        let condition = match (&self.schema.lock_version, document.lock_version()) {
            (Some(lock), Some(version)) => Some(Condition::Or(vec![
                Condition::not_exists(&self.schema.hash_key),
                Condition::eq(lock, number(version)),
            ])),
            _ => None,
        };
        Ok(DeleteItem {
            table: self.name(),
            key: self.key_item(&document.key()?)?,
            condition,
        })
    }

    /// Runs `operation`, creating the table and retrying once when it is
    /// missing and `create_table_on_save` is set.
    async fn with_table<'a, T, F, Fut>(&'a self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BackendResult<T>> + 'a,
    {
        match operation().await {
            Err(BackendError::ResourceNotFound(resource)) if self.config().create_table_on_save => {
                log::info!("{} not found, creating table {}", resource, self.name());
                self.create_table().await?;
                Ok(operation().await?)
            }
            result => Ok(result?),
        }
    }

    async fn write(&self, document: &mut Document, touch: bool) -> Result<(), Error> {
        if document.is_new_record() {
            let unsaved = document.attributes().clone();
            let result = match self.prepare_create(document) {
                Ok(put) => {
                    log::debug!("put_item {} {:?}", put.table, document.hash_value());
                    self.with_table(|| self.backend().put_item(put.clone()))
                        .await
                        .map_err(|e| match e {
                            e if e.is_conditional_check_failed() => {
                                Error::RecordNotUnique(self.display_key(document))
                            }
                            e => e,
                        })
                }
                Err(e) => Err(e),
            };
            if result.is_err() {
                // a failed create leaves no generated key, stamp or version behind
                document.replace_attributes(unsaved);
            }
            result?;
        } else if let Some(update) = self.prepare_changes(document, touch)? {
            log::debug!("update_item {} {:?}", update.table, update.key);
            let item = self
                .backend()
                .update_item(update)
                .await
                .map_err(|e| self.stale(e, document))?;
            document.replace_attributes(load_item(&item, &self.schema, self.config())?);
        }
        document.mark_persisted();
        Ok(())
    }

    fn display_key(&self, document: &Document) -> String {
        document
            .key()
            .map(|key| format!("{} {}", self.schema.name, key))
            .unwrap_or_else(|_| self.schema.name.clone())
    }

    fn stale(&self, error: BackendError, document: &Document) -> Error {
        if error.is_conditional_check_failed() {
            Error::StaleObjectError(self.display_key(document))
        } else {
            Error::Backend(error)
        }
    }

    async fn persist(&self, document: &mut Document, options: SaveOptions) -> Result<Outcome, Error> {
        if document.is_destroyed() {
            return Err(Error::InvalidState(format!(
                "cannot save a destroyed {} record",
                self.schema.name
            )));
        }
        let event = save_event(document);
        let outcome = self.before_save(document, options);
        if outcome != Outcome::Proceed {
            log::debug!("save of {} stopped: {:?}", self.schema.name, outcome);
            return Ok(outcome);
        }
        self.write(document, options.touch).await?;
        self.after_save(document, event, options);
        Ok(Outcome::Proceed)
    }

    /// Saves a new or changed document. Validation failures and hook vetoes
    /// return `Ok(false)`; lock and uniqueness conflicts are errors.
    pub async fn save(&self, document: &mut Document) -> Result<bool, Error> {
        self.save_with(document, SaveOptions::default()).await
    }

    pub async fn save_with(
        &self,
        document: &mut Document,
        options: SaveOptions,
    ) -> Result<bool, Error> {
        Ok(self.persist(document, options).await? == Outcome::Proceed)
    }

    pub async fn save_strict(&self, document: &mut Document) -> Result<(), Error> {
        self.persist(document, SaveOptions::default())
            .await?
            .strict(&self.schema.name)
    }

    /// Builds and saves a new document; check `is_persisted` for the result.
    pub async fn create(&self, attributes: Attributes) -> Result<Document, Error> {
        let mut document = self.build(attributes)?;
        self.save(&mut document).await?;
        Ok(document)
    }

    pub async fn create_strict(&self, attributes: Attributes) -> Result<Document, Error> {
        let mut document = self.build(attributes)?;
        self.save_strict(&mut document).await?;
        Ok(document)
    }

    pub async fn update_attributes(
        &self,
        document: &mut Document,
        attributes: Attributes,
    ) -> Result<bool, Error> {
        document.assign(attributes)?;
        self.save(document).await
    }

    pub async fn update_attributes_strict(
        &self,
        document: &mut Document,
        attributes: Attributes,
    ) -> Result<(), Error> {
        document.assign(attributes)?;
        self.save_strict(document).await
    }

    /// Assigns and saves one attribute without validation.
    pub async fn update_attribute(
        &self,
        document: &mut Document,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<bool, Error> {
        document.set(name, value)?;
        self.save_with(document, SaveOptions::default().skip_validation())
            .await
    }

    async fn update_document<F>(&self, document: &mut Document, build: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut UpdateBuilder<'_>) -> Result<(), Error>,
    {
        document.require_persisted("update")?;
        let mut builder = UpdateBuilder::new(&self.schema, self.config());
        build(&mut builder)?;
        let (mut actions, conditions) = builder.into_parts();
        if let Some(lock) = &self.schema.lock_version {
            actions.push(UpdateAction::Add(lock.clone(), number(1)));
        }
        let stamped = self.timestamps();
        if stamped {
            actions.push(self.stamp()?);
        }
        let condition = conditions
            .into_iter()
            .fold(self.lock_condition(document), Condition::and);
        let request = UpdateItem {
            table: self.name(),
            key: self.key_item(&document.key()?)?,
            actions,
            condition: Some(condition),
        };
        log::debug!("update_item {} {:?}", request.table, request.key);
        match self.backend().update_item(request).await {
            Ok(item) => {
                document.replace_attributes(load_item(&item, &self.schema, self.config())?);
                document.mark_persisted();
                if stamped {
                    self.schema.lifecycle.run_after(Event::Touch, document);
                }
                Ok(true)
            }
            Err(e) if e.is_conditional_check_failed() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// One atomic conditional update built in `build`. Skips validation and
    /// save hooks. Returns `Ok(false)` when a condition or the lock fails.
    pub async fn update<F>(&self, document: &mut Document, build: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut UpdateBuilder<'_>) -> Result<(), Error>,
    {
        self.update_document(document, build).await
    }

    pub async fn update_strict<F>(&self, document: &mut Document, build: F) -> Result<(), Error>
    where
        F: FnOnce(&mut UpdateBuilder<'_>) -> Result<(), Error>,
    {
        if self.update_document(document, build).await? {
            Ok(())
        } else {
            Err(Error::StaleObjectError(self.display_key(document)))
        }
    }

    fn stamp(&self) -> Result<UpdateAction, Error> {
        let attribute = self.schema.require_attribute(UPDATED_AT)?;
        let now = dump_operand(&Value::DateTime(Utc::now()), attribute, self.config())?;
        Ok(UpdateAction::Set(UPDATED_AT.to_string(), now))
    }

    /// Atomically adds `by` to a numeric attribute. Absent counts as zero.
    pub async fn increment(
        &self,
        document: &mut Document,
        name: &str,
        by: impl Into<Value>,
    ) -> Result<(), Error> {
        document.require_persisted("increment")?;
        let attribute = self.schema.require_attribute(name)?;
        if !matches!(attribute.field_type, FieldType::Integer | FieldType::Number) {
            return Err(Error::mismatch(name, "a numeric attribute", &attribute.field_type));
        }
        let mut actions = vec![UpdateAction::Add(
            name.to_string(),
            dump_operand(&by.into(), attribute, self.config())?,
        )];
        if let Some(lock) = &self.schema.lock_version {
            actions.push(UpdateAction::Add(lock.clone(), number(1)));
        }
        if self.timestamps() {
            actions.push(self.stamp()?);
        }
        let request = UpdateItem {
            table: self.name(),
            key: self.key_item(&document.key()?)?,
            actions,
            condition: Some(Condition::exists(&self.schema.hash_key)),
        };
        log::debug!("update_item {} {:?}", request.table, request.key);
        let item = self.backend().update_item(request).await.map_err(|e| {
            if e.is_conditional_check_failed() {
                Error::RecordNotFound {
                    model: self.schema.name.clone(),
                    key: self.display_key(document),
                }
            } else {
                e.into()
            }
        })?;
        let stored = load_item(&item, &self.schema, self.config())?;
        let refreshed = [Some(name), self.schema.lock_version.as_deref(), Some(UPDATED_AT)];
        for name in refreshed.into_iter().flatten() {
            if let Some(value) = stored.get(name) {
                document.put_raw(name, value.clone());
            }
        }
        Ok(())
    }

    pub async fn decrement(
        &self,
        document: &mut Document,
        name: &str,
        by: impl Into<Value>,
    ) -> Result<(), Error> {
        let negated = match by.into() {
            Value::Integer(n) => Value::Integer(-n),
            Value::Number(n) => Value::Number(-n),
            other => return Err(Error::mismatch(name, "a number", other)),
        };
        self.increment(document, name, negated).await
    }

    /// Stamps `updated_at` and each of `names` with the current time, then
    /// runs the touch hooks. The lock version is left alone.
    pub async fn touch(&self, document: &mut Document, names: &[&str]) -> Result<(), Error> {
        document.require_persisted("touch")?;
        let now = Value::DateTime(Utc::now());
        let mut stamped: Vec<&str> = names.to_vec();
        if self.timestamps() {
            stamped.push(UPDATED_AT);
        }
        let mut actions = Vec::with_capacity(stamped.len());
        for name in &stamped {
            let attribute = self.schema.require_attribute(name)?;
            actions.push(UpdateAction::Set(
                name.to_string(),
                dump_operand(&now, attribute, self.config())?,
            ));
        }
        let request = UpdateItem {
            table: self.name(),
            key: self.key_item(&document.key()?)?,
            actions,
            condition: Some(Condition::exists(&self.schema.hash_key)),
        };
        log::debug!("update_item {} {:?}", request.table, request.key);
        self.backend()
            .update_item(request)
            .await
            .map_err(|e| self.stale(e, document))?;
        for name in stamped {
            document.put_raw(name, now.clone());
        }
        self.schema.lifecycle.run_after(Event::Touch, document);
        Ok(())
    }

    /// Re-reads the document with a consistent read, dropping local changes.
    pub async fn reload(&self, document: &mut Document) -> Result<(), Error> {
        let key = document.key()?;
        let item = self.get(&key, true).await?.ok_or_else(|| Error::RecordNotFound {
            model: self.schema.name.clone(),
            key: key.to_string(),
        })?;
        document.replace_attributes(load_item(&item, &self.schema, self.config())?);
        document.mark_persisted();
        Ok(())
    }

    /// Deletes the item. Deleting a missing item succeeds; a lock version
    /// mismatch on an existing one is a `StaleObjectError`.
    pub async fn delete(&self, document: &mut Document) -> Result<(), Error> {
        let request = self.prepare_delete(document)?;
        log::debug!("delete_item {} {:?}", request.table, request.key);
        self.backend()
            .delete_item(request)
            .await
            .map_err(|e| self.stale(e, document))?;
        document.mark_destroyed();
        Ok(())
    }

    async fn destroy_document(&self, document: &mut Document, strict: bool) -> Result<bool, Error> {
        if self.schema.lifecycle.run_before(Event::Destroy, document) == HookResult::Abort {
            return if strict {
                Err(Error::RecordNotDestroyed(self.display_key(document)))
            } else {
                Ok(false)
            };
        }
        self.delete(document).await?;
        self.schema.lifecycle.run_after(Event::Destroy, document);
        Ok(true)
    }

    /// Deletes with destroy hooks. Returns `Ok(false)` when a hook aborts.
    pub async fn destroy(&self, document: &mut Document) -> Result<bool, Error> {
        self.destroy_document(document, false).await
    }

    pub async fn destroy_strict(&self, document: &mut Document) -> Result<(), Error> {
        self.destroy_document(document, true).await.map(|_| ())
    }

    async fn get(&self, key: &Key, consistent_read: bool) -> Result<Option<Item>, Error> {
        let request = GetItem {
            table: self.name(),
            key: self.key_item(key)?,
            consistent_read,
        };
        log::debug!("get_item {} {:?}", request.table, request.key);
        Ok(self.backend().get_item(request).await?)
    }

    pub async fn find_optional(&self, key: impl Into<Key>) -> Result<Option<Document>, Error> {
        let consistent_read = self.config().consistent_read;
        self.get(&key.into(), consistent_read)
            .await?
            .map(|item| self.load(&item))
            .transpose()
    }

    pub async fn find(&self, key: impl Into<Key>) -> Result<Document, Error> {
        let key = key.into();
        self.find_optional(key.clone())
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                model: self.schema.name.clone(),
                key: key.to_string(),
            })
    }

    pub async fn exists(&self, key: impl Into<Key>) -> Result<bool, Error> {
        Ok(self.find_optional(key).await?.is_some())
    }

    /// Batch reads; keys that don't exist are left out of the result.
    pub async fn find_all<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Document>, Error> {
        let keys = keys
            .into_iter()
            .map(|key| self.key_item(&key.into()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut backoff = self
            .config()
            .backoff_strategies
            .start(self.config().backoff.as_deref())?;
        let mut documents = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(BATCH_GET_SIZE) {
            let mut pending = chunk.to_vec();
            while !pending.is_empty() {
                log::debug!("batch_get_item {} {} keys", self.name(), pending.len());
                let output = self
                    .backend()
                    .batch_get_item(self.name(), pending, self.config().consistent_read)
                    .await?;
                for item in &output.items {
                    documents.push(self.load(item)?);
                }
                pending = output.unprocessed_keys;
                if !pending.is_empty()
                    && let Some(backoff) = backoff.as_mut()
                {
                    backoff.wait().await;
                }
            }
        }
        Ok(documents)
    }

    /// Batch writes every request, retrying unprocessed ones.
    pub(crate) async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<(), Error> {
        let mut backoff = self
            .config()
            .backoff_strategies
            .start(self.config().backoff.as_deref())?;
        for chunk in requests.chunks(BATCH_WRITE_SIZE) {
            let mut pending = chunk.to_vec();
            while !pending.is_empty() {
                log::debug!("batch_write_item {} {} requests", self.name(), pending.len());
                let unprocessed = self
                    .with_table(|| self.backend().batch_write_item(self.name(), pending.clone()))
                    .await?;
                pending = unprocessed;
                if !pending.is_empty()
                    && let Some(backoff) = backoff.as_mut()
                {
                    backoff.wait().await;
                }
            }
        }
        Ok(())
    }

    /// Writes many new documents with batch writes, skipping validation and
    /// hooks. The returned documents are persisted and unchanged.
    pub async fn import(&self, records: Vec<Attributes>) -> Result<Vec<Document>, Error> {
        let mut documents = Vec::with_capacity(records.len());
        let mut requests = Vec::with_capacity(records.len());
        for attributes in records {
            let mut document = self.build(attributes)?;
            let put = self.prepare_create(&mut document)?;
            requests.push(WriteRequest::Put(put.item));
            documents.push(document);
        }
        self.batch_write(requests).await?;
        for document in &mut documents {
            document.mark_persisted();
        }
        Ok(documents)
    }

    /// Sets or removes each attribute, bumping the lock and `updated_at`.
    pub(crate) fn field_actions(&self, attributes: &Attributes) -> Result<Vec<UpdateAction>, Error> {
        let mut builder = UpdateBuilder::new(&self.schema, self.config());
        for (name, value) in attributes {
            builder.set(name, value.clone())?;
        }
        let (mut actions, _) = builder.into_parts();
        if let Some(lock) = &self.schema.lock_version {
            actions.push(UpdateAction::Add(lock.clone(), number(1)));
        }
        if self.timestamps() {
            actions.push(self.stamp()?);
        }
        Ok(actions)
    }

    fn conditions(&self, conditions: Attributes) -> Result<Vec<Condition>, Error> {
        let mut builder = UpdateBuilder::new(&self.schema, self.config());
        for (token, value) in conditions {
            builder.condition(&token, value)?;
        }
        Ok(builder.into_parts().1)
    }

    async fn update_key(
        &self,
        key: Key,
        attributes: Attributes,
        conditions: Vec<Condition>,
    ) -> Result<Option<Document>, Error> {
        let request = UpdateItem {
            table: self.name(),
            key: self.key_item(&key)?,
            actions: self.field_actions(&attributes)?,
            condition: Condition::all(conditions),
        };
        log::debug!("update_item {} {:?}", request.table, request.key);
        match self
            .with_table(|| self.backend().update_item(request.clone()))
            .await
        {
            Ok(item) => Ok(Some(self.load(&item)?)),
            Err(e) if e.is_conditional_check_failed() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Updates an existing item without loading it. Returns `None` when the
    /// item is missing or a condition fails.
    pub async fn update_fields(
        &self,
        key: impl Into<Key>,
        attributes: Attributes,
        conditions: Attributes,
    ) -> Result<Option<Document>, Error> {
        let mut all = vec![Condition::exists(&self.schema.hash_key)];
        all.extend(self.conditions(conditions)?);
        self.update_key(key.into(), attributes, all).await
    }

    /// Like [`Table::update_fields`] but creates the item when missing.
    pub async fn upsert(
        &self,
        key: impl Into<Key>,
        attributes: Attributes,
        conditions: Attributes,
    ) -> Result<Option<Document>, Error> {
        let conditions = self.conditions(conditions)?;
        self.update_key(key.into(), attributes, conditions).await
    }

    /// Atomically adds to counters of an existing item.
    pub async fn inc(&self, key: impl Into<Key>, counters: Attributes) -> Result<(), Error> {
        let key = key.into();
        let mut builder = UpdateBuilder::new(&self.schema, self.config());
        for (name, by) in counters {
            builder.add(&name, by)?;
        }
        let (mut actions, _) = builder.into_parts();
        if self.timestamps() {
            actions.push(self.stamp()?);
        }
        let request = UpdateItem {
            table: self.name(),
            key: self.key_item(&key)?,
            actions,
            condition: Some(Condition::exists(&self.schema.hash_key)),
        };
        log::debug!("update_item {} {:?}", request.table, request.key);
        match self.backend().update_item(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conditional_check_failed() => Err(Error::RecordNotFound {
                model: self.schema.name.clone(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Unconditional delete by key.
    pub async fn delete_key(&self, key: impl Into<Key>) -> Result<(), Error> {
        let request = DeleteItem {
            table: self.name(),
            key: self.key_item(&key.into())?,
            condition: None,
        };
        log::debug!("delete_item {} {:?}", request.table, request.key);
        Ok(self.backend().delete_item(request).await?)
    }
}
