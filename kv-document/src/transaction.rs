//! All-or-nothing writes across tables.
//!
//! Actions are registered synchronously: before hooks and validation run at
//! registration, in the same nesting as a plain save, so a rejected action
//! never reaches the backend. `commit` sends everything in one
//! `transact_write_items` call and then runs the after hooks. A backend
//! rejection of the batch is always returned as an error, whichever method
//! registered the failing action.

use crate::backend::{Condition, DeleteItem, TransactWriteItem, UpdateItem};
use crate::lifecycle::{Event, HookResult};
use crate::persistence::{Outcome, SaveOptions};
use crate::{Attributes, DB, Document, Error, Key, Table, Value};

enum Completion {
    /// `versioned` when the write bumps the stored lock version of an update.
    Saved {
        event: Event,
        options: SaveOptions,
        versioned: bool,
    },
    Destroyed,
    Deleted,
}

struct Entry {
    table: Table,
    document: Document,
    completion: Completion,
}

pub struct TransactionWrite {
    db: DB,
    actions: Vec<TransactWriteItem>,
    entries: Vec<Entry>,
    committed: bool,
}

impl TransactionWrite {
    pub(crate) fn new(db: DB) -> Self {
        Self {
            db,
            actions: Vec::new(),
            entries: Vec::new(),
            committed: false,
        }
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    /// Number of write actions registered so far.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn open(&self) -> Result<(), Error> {
        if self.committed {
            Err(Error::TransactionCommitted)
        } else {
            Ok(())
        }
    }

    fn register_save(
        &mut self,
        table: &Table,
        mut document: Document,
        options: SaveOptions,
    ) -> Result<Outcome, Error> {
        self.open()?;
        if document.is_destroyed() {
            return Err(Error::InvalidState(format!(
                "cannot save a destroyed {} record",
                table.schema.name
            )));
        }
        let event = if document.is_new_record() {
            Event::Create
        } else {
            Event::Update
        };
        let outcome = table.before_save(&mut document, options);
        if outcome != Outcome::Proceed {
            return Ok(outcome);
        }
        let mut versioned = false;
        if document.is_new_record() {
            let put = table.prepare_create(&mut document)?;
            self.actions.push(TransactWriteItem::Put(put));
        } else if let Some(update) = table.prepare_changes(&mut document, options.touch)? {
            versioned = table.schema.lock_version.is_some();
            self.actions.push(TransactWriteItem::Update(update));
        }
        self.entries.push(Entry {
            table: table.clone(),
            document,
            completion: Completion::Saved {
                event,
                options,
                versioned,
            },
        });
        Ok(Outcome::Proceed)
    }

    /// Registers a new record. Returns `Ok(false)` when validation or a hook
    /// rejects it.
    pub fn create(&mut self, table: &Table, attributes: Attributes) -> Result<bool, Error> {
        self.create_with(table, attributes, SaveOptions::default())
    }

    pub fn create_with(
        &mut self,
        table: &Table,
        attributes: Attributes,
        options: SaveOptions,
    ) -> Result<bool, Error> {
        let document = table.build(attributes)?;
        Ok(self.register_save(table, document, options)? == Outcome::Proceed)
    }

    pub fn create_strict(&mut self, table: &Table, attributes: Attributes) -> Result<(), Error> {
        let document = table.build(attributes)?;
        self.register_save(table, document, SaveOptions::default())?
            .strict(&table.schema.name)
    }

    /// Registers a create or the changes of a persisted document.
    pub fn save(&mut self, table: &Table, document: Document) -> Result<bool, Error> {
        self.save_with(table, document, SaveOptions::default())
    }

    pub fn save_with(
        &mut self,
        table: &Table,
        document: Document,
        options: SaveOptions,
    ) -> Result<bool, Error> {
        Ok(self.register_save(table, document, options)? == Outcome::Proceed)
    }

    pub fn save_strict(&mut self, table: &Table, document: Document) -> Result<(), Error> {
        self.register_save(table, document, SaveOptions::default())?
            .strict(&table.schema.name)
    }

    fn register_update(
        &mut self,
        table: &Table,
        key: Key,
        attributes: &Attributes,
        condition: Option<Condition>,
    ) -> Result<(), Error> {
        self.open()?;
        let actions = table.field_actions(attributes)?;
        self.actions.push(TransactWriteItem::Update(UpdateItem {
            table: table.name(),
            key: table.key_item(&key)?,
            actions,
            condition,
        }));
        Ok(())
    }

    /// Registers an update of an item that must exist.
    pub fn update_fields(
        &mut self,
        table: &Table,
        key: impl Into<Key>,
        attributes: Attributes,
    ) -> Result<(), Error> {
        let exists = Condition::exists(&table.schema.hash_key);
        self.register_update(table, key.into(), &attributes, Some(exists))
    }

    /// Registers an update that creates the item when missing.
    pub fn upsert(
        &mut self,
        table: &Table,
        key: impl Into<Key>,
        attributes: Attributes,
    ) -> Result<(), Error> {
        self.register_update(table, key.into(), &attributes, None)
    }

    pub fn delete_key(&mut self, table: &Table, key: impl Into<Key>) -> Result<(), Error> {
        self.open()?;
        self.actions.push(TransactWriteItem::Delete(DeleteItem {
            table: table.name(),
            key: table.key_item(&key.into())?,
            condition: None,
        }));
        Ok(())
    }

    /// Registers a version-checked delete of a document, without hooks.
    pub fn delete(&mut self, table: &Table, document: Document) -> Result<(), Error> {
        self.open()?;
        self.actions
            .push(TransactWriteItem::Delete(table.prepare_delete(&document)?));
        self.entries.push(Entry {
            table: table.clone(),
            document,
            completion: Completion::Deleted,
        });
        Ok(())
    }

    fn register_destroy(&mut self, table: &Table, mut document: Document) -> Result<bool, Error> {
        self.open()?;
        if table.schema.lifecycle.run_before(Event::Destroy, &mut document) == HookResult::Abort {
            return Ok(false);
        }
        self.actions
            .push(TransactWriteItem::Delete(table.prepare_delete(&document)?));
        self.entries.push(Entry {
            table: table.clone(),
            document,
            completion: Completion::Destroyed,
        });
        Ok(true)
    }

    /// Registers a delete with destroy hooks. `Ok(false)` when a hook aborts.
    pub fn destroy(&mut self, table: &Table, document: Document) -> Result<bool, Error> {
        self.register_destroy(table, document)
    }

    pub fn destroy_strict(&mut self, table: &Table, document: Document) -> Result<(), Error> {
        if self.register_destroy(table, document)? {
            Ok(())
        } else {
            Err(Error::RecordNotDestroyed(format!(
                "{} was aborted by a hook",
                table.schema.name
            )))
        }
    }

    /// Writes every registered action atomically and returns the documents
    /// registered by save, create, delete and destroy in their final state.
    pub async fn commit(&mut self) -> Result<Vec<Document>, Error> {
        self.open()?;
        self.committed = true;
        let actions = std::mem::take(&mut self.actions);
        if !actions.is_empty() {
            log::debug!("transact_write_items with {} actions", actions.len());
            self.db.backend().transact_write_items(actions).await?;
        }
        let mut documents = Vec::with_capacity(self.entries.len());
        for Entry {
            table,
            mut document,
            completion,
        } in std::mem::take(&mut self.entries)
        {
            match completion {
                Completion::Saved {
                    event,
                    options,
                    versioned,
                } => {
                    if versioned && let Some(lock) = &table.schema.lock_version {
                        let version = document.lock_version().unwrap_or(0) + 1;
                        document.put_raw(lock, Value::Integer(version));
                    }
                    document.mark_persisted();
                    table.after_save(&mut document, event, options);
                }
                Completion::Destroyed => {
                    document.mark_destroyed();
                    table.schema.lifecycle.run_after(Event::Destroy, &mut document);
                }
                Completion::Deleted => document.mark_destroyed(),
            }
            documents.push(document);
        }
        Ok(documents)
    }
}
