//! In-process backend keeping every table in ordered maps.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, ready};

use crate::Item;
use crate::backend::eval::{
    apply_update, check, key_attributes, matches_key_condition, position_key, project,
    resolve_index, validate_key, validate_key_attributes,
};
use crate::backend::keycodec::encode_key;
use crate::backend::{
    Backend, BackendResult, BatchGetOutput, DeleteItem, GetItem, Page, PutItem, QueryRequest, ScanRequest, TableDescription, TransactWriteItem, UpdateItem,
    WriteRequest, evaluate,
};
use crate::error::BackendError;

#[derive(Clone)]
struct MemoryTable {
    description: TableDescription,
    items: BTreeMap<Vec<u8>, Item>,
}

impl MemoryTable {
    fn primary_key(&self, key: &Item) -> BackendResult<Vec<u8>> {
        validate_key_attributes(&self.description, key)?;
        let attributes = key_attributes(&self.description, None);
        encode_key(attributes.iter().filter_map(|a| key.get(&a.name)))
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    calls: HashMap<&'static str, usize>,
}

impl State {
    fn table(&self, name: &str) -> BackendResult<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("table {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> BackendResult<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("table {}", name)))
    }
}

/// Backend holding everything in memory. Counts the requests it receives and
/// can be limited to processing a few entries per batch request.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    batch_capacity: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes at most `capacity` entries per batch request and reports the
    /// rest as unprocessed.
    pub fn with_batch_capacity(capacity: usize) -> Self {
        MemoryBackend {
            batch_capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Number of `operation` requests received so far, e.g. `"query"`.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut State) -> BackendResult<T>,
    ) -> BoxFuture<'_, BackendResult<T>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        let result = f(&mut state);
        log::trace!("memory backend {}: ok={}", operation, result.is_ok());
        ready(result).boxed()
    }

    fn read(&self, request: &ScanRequest, query: Option<&QueryRequest>) -> BackendResult<Page> {
        let state = self.lock();
        let table = state.table(&request.table)?;
        let description = &table.description;
        let index = resolve_index(description, request)?;

        let attributes = key_attributes(description, index);
        let mut candidates = Vec::new();
        for item in table.items.values() {
            if let Some(query) = query
                && !matches_key_condition(&query.key_condition, item)
            {
                continue;
            }
            let values: Option<Vec<_>> = attributes.iter().map(|a| item.get(&a.name)).collect();
            // items without the index keys are not part of the index
            let Some(values) = values else { continue };
            candidates.push((encode_key(values)?, item));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        let forward = query.is_none_or(|query| query.scan_forward);
        if !forward {
            candidates.reverse();
        }

        if let Some(start) = &request.exclusive_start_key {
            let values: Option<Vec<_>> = attributes.iter().map(|a| start.get(&a.name)).collect();
            let start = encode_key(values.ok_or_else(|| {
                BackendError::Validation("exclusive start key lacks key attributes".into())
            })?)?;
            candidates.retain(|(position, _)| {
                if forward {
                    *position > start
                } else {
                    *position < start
                }
            });
        }

        let limit = request
            .limit
            .map_or(usize::MAX, |limit| (limit as usize).max(1));
        let mut page = Page::default();
        for (_, item) in candidates.iter().take(limit) {
            page.scanned_count += 1;
            if request.filter.as_ref().is_none_or(|f| evaluate(f, item)) {
                page.items.push(project(
                    description,
                    index,
                    (*item).clone(),
                    request.projection.as_deref(),
                ));
            }
        }
        if candidates.len() > limit
            && let Some((_, last)) = candidates.get(limit - 1)
        {
            page.last_evaluated_key = Some(position_key(description, index, last));
        }
        Ok(page)
    }
}

fn transact(state: &mut State, items: Vec<TransactWriteItem>) -> BackendResult<()> {
    let mut touched = Vec::with_capacity(items.len());
    let mut reasons = Vec::with_capacity(items.len());
    for item in &items {
        let table = state.table(item.table())?;
        let (key, condition) = match item {
            TransactWriteItem::Put(put) => {
                (table.description.key_of(&put.item)?, put.condition.as_ref())
            }
            TransactWriteItem::Update(update) => {
                validate_key(&table.description, &update.key)?;
                (update.key.clone(), update.condition.as_ref())
            }
            TransactWriteItem::Delete(delete) => {
                validate_key(&table.description, &delete.key)?;
                (delete.key.clone(), delete.condition.as_ref())
            }
            TransactWriteItem::ConditionCheck { key, condition, .. } => {
                validate_key(&table.description, key)?;
                (key.clone(), Some(condition))
            }
        };
        let position = (item.table().to_string(), table.primary_key(&key)?);
        if touched.contains(&position) {
            return Err(BackendError::Validation(
                "transaction cannot include multiple operations on one item".into(),
            ));
        }
        let existing = table.items.get(&position.1);
        reasons.push(
            check(condition, existing)
                .err()
                .map(|_| "ConditionalCheckFailed".to_string()),
        );
        touched.push(position);
    }
    if reasons.iter().any(Option::is_some) {
        return Err(BackendError::TransactionCanceled(reasons));
    }

    let mut tables = state.tables.clone();
    for (item, (table_name, position)) in items.into_iter().zip(touched) {
        let table = tables
            .get_mut(&table_name)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("table {}", table_name)))?;
        match item {
            TransactWriteItem::Put(put) => {
                table.items.insert(position, put.item);
            }
            TransactWriteItem::Update(update) => {
                let mut stored = table.items.get(&position).cloned().unwrap_or(update.key);
                apply_update(&table.description, &mut stored, &update.actions)?;
                table.items.insert(position, stored);
            }
            TransactWriteItem::Delete(_) => {
                table.items.remove(&position);
            }
            TransactWriteItem::ConditionCheck { .. } => {}
        }
    }
    state.tables = tables;
    Ok(())
}

impl Backend for MemoryBackend {
    fn create_table(&self, table: TableDescription) -> BoxFuture<'_, BackendResult<()>> {
        self.run("create_table", move |state| {
            if state.tables.contains_key(&table.name) {
                return Err(BackendError::ResourceInUse(format!("table {}", table.name)));
            }
            log::debug!("creating table {}", table.name);
            state.tables.insert(
                table.name.clone(),
                MemoryTable {
                    description: table,
                    items: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    fn describe_table(&self, table: String) -> BoxFuture<'_, BackendResult<TableDescription>> {
        self.run("describe_table", move |state| {
            let table = state.table(&table)?;
            let mut description = table.description.clone();
            description.item_count = table.items.len() as u64;
            Ok(description)
        })
    }

    fn delete_table(&self, table: String) -> BoxFuture<'_, BackendResult<()>> {
        self.run("delete_table", move |state| {
            state
                .tables
                .remove(&table)
                .map(|_| ())
                .ok_or_else(|| BackendError::ResourceNotFound(format!("table {}", table)))
        })
    }

    fn list_tables(&self) -> BoxFuture<'_, BackendResult<Vec<String>>> {
        self.run("list_tables", |state| Ok(state.tables.keys().cloned().collect()))
    }

    fn update_time_to_live(
        &self,
        table: String,
        attribute: String,
    ) -> BoxFuture<'_, BackendResult<()>> {
        self.run("update_time_to_live", move |state| {
            state.table_mut(&table)?.description.ttl_attribute = Some(attribute);
            Ok(())
        })
    }

    fn put_item(&self, request: PutItem) -> BoxFuture<'_, BackendResult<()>> {
        self.run("put_item", move |state| {
            let table = state.table_mut(&request.table)?;
            let position = table.primary_key(&request.item)?;
            check(request.condition.as_ref(), table.items.get(&position))?;
            table.items.insert(position, request.item);
            Ok(())
        })
    }

    fn get_item(&self, request: GetItem) -> BoxFuture<'_, BackendResult<Option<Item>>> {
        self.run("get_item", move |state| {
            let table = state.table(&request.table)?;
            validate_key(&table.description, &request.key)?;
            let position = table.primary_key(&request.key)?;
            Ok(table.items.get(&position).cloned())
        })
    }

    fn update_item(&self, request: UpdateItem) -> BoxFuture<'_, BackendResult<Item>> {
        self.run("update_item", move |state| {
            let table = state.table_mut(&request.table)?;
            validate_key(&table.description, &request.key)?;
            let position = table.primary_key(&request.key)?;
            let existing = table.items.get(&position);
            check(request.condition.as_ref(), existing)?;
            let mut item = existing.cloned().unwrap_or(request.key);
            apply_update(&table.description, &mut item, &request.actions)?;
            table.items.insert(position, item.clone());
            Ok(item)
        })
    }

    fn delete_item(&self, request: DeleteItem) -> BoxFuture<'_, BackendResult<()>> {
        self.run("delete_item", move |state| {
            let table = state.table_mut(&request.table)?;
            validate_key(&table.description, &request.key)?;
            let position = table.primary_key(&request.key)?;
            check(request.condition.as_ref(), table.items.get(&position))?;
            table.items.remove(&position);
            Ok(())
        })
    }

    fn query(&self, request: QueryRequest) -> BoxFuture<'_, BackendResult<Page>> {
        self.lock().calls.entry("query").and_modify(|c| *c += 1).or_insert(1);
        ready(self.read(&request.scan, Some(&request))).boxed()
    }

    fn scan(&self, request: ScanRequest) -> BoxFuture<'_, BackendResult<Page>> {
        self.lock().calls.entry("scan").and_modify(|c| *c += 1).or_insert(1);
        ready(self.read(&request, None)).boxed()
    }

    fn batch_write_item(
        &self,
        table: String,
        requests: Vec<WriteRequest>,
    ) -> BoxFuture<'_, BackendResult<Vec<WriteRequest>>> {
        let capacity = self.batch_capacity.unwrap_or(usize::MAX);
        self.run("batch_write_item", move |state| {
            let table = state.table_mut(&table)?;
            let mut requests = requests.into_iter();
            for request in requests.by_ref().take(capacity) {
                match request {
                    WriteRequest::Put(item) => {
                        let position = table.primary_key(&item)?;
                        table.items.insert(position, item);
                    }
                    WriteRequest::Delete(key) => {
                        validate_key(&table.description, &key)?;
                        let position = table.primary_key(&key)?;
                        table.items.remove(&position);
                    }
                }
            }
            Ok(requests.collect())
        })
    }

    fn batch_get_item(
        &self,
        table: String,
        keys: Vec<Item>,
        _consistent_read: bool,
    ) -> BoxFuture<'_, BackendResult<BatchGetOutput>> {
        let capacity = self.batch_capacity.unwrap_or(usize::MAX);
        self.run("batch_get_item", move |state| {
            let table = state.table(&table)?;
            let mut output = BatchGetOutput::default();
            let mut keys = keys.into_iter();
            for key in keys.by_ref().take(capacity) {
                validate_key(&table.description, &key)?;
                if let Some(item) = table.items.get(&table.primary_key(&key)?) {
                    output.items.push(item.clone());
                }
            }
            output.unprocessed_keys = keys.collect();
            Ok(output)
        })
    }

    fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> BoxFuture<'_, BackendResult<()>> {
        self.run("transact_write_items", move |state| transact(state, items))
    }
}
