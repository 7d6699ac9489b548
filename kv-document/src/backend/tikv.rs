//! Backend storing tables in TiKV.
//!
//! Layout, per table:
//!
//! - `catalog/{table}`: empty marker listing the table
//! - `table/{table}/meta`: [`StoredTable`]
//! - `table/{table}/item/{primary key}`: [`StoredItem`]
//! - `table/{table}/index/{index}/{index keys}{primary key}`: the primary key
//!
//! Keys are encoded with the order-preserving codec, so ranges over an item or
//! index prefix come back in key order. Every write runs in one optimistic
//! transaction that reads the current item, checks the condition and rewrites
//! the index entries.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use prost::Message;
use tikv_client::{Key, KvPair, Snapshot, Transaction, TransactionClient, TransactionOptions};

use crate::backend::eval::{
    apply_update, check, key_attributes, matches_key_condition, position_key, project,
    resolve_index, validate_key, validate_key_attributes,
};
use crate::backend::keycodec::{encode_key, encode_value, next_key};
use crate::backend::proto::{StoredItem, StoredTable};
use crate::backend::{
    Backend, BackendResult, BatchGetOutput, DeleteItem, GetItem, Page, PutItem, QueryRequest,
    ScanRequest, TableDescription, TransactWriteItem, UpdateItem, WriteRequest, evaluate,
};
use crate::error::BackendError;
use crate::Item;

const PAGE_SIZE: u32 = 128;

fn catalog_prefix() -> Vec<u8> {
    b"catalog/".to_vec()
}

fn catalog_path(table: &str) -> Vec<u8> {
    format!("catalog/{}", table).into_bytes()
}

fn table_prefix(table: &str) -> Vec<u8> {
    format!("table/{}/", table).into_bytes()
}

fn meta_path(table: &str) -> Vec<u8> {
    format!("table/{}/meta", table).into_bytes()
}

fn item_prefix(table: &str) -> Vec<u8> {
    format!("table/{}/item/", table).into_bytes()
}

fn item_path(table: &str, primary_key: &[u8]) -> Vec<u8> {
    let mut key = item_prefix(table);
    key.extend_from_slice(primary_key);
    key
}

fn index_prefix(table: &str, index: &str) -> Vec<u8> {
    format!("table/{}/index/{}/", table, index).into_bytes()
}

fn primary_key(description: &TableDescription, item: &Item) -> BackendResult<Vec<u8>> {
    validate_key_attributes(description, item)?;
    encode_key(
        key_attributes(description, None)
            .iter()
            .filter_map(|a| item.get(&a.name)),
    )
}

/// Index entry keys of `item`. Items lacking an index's key attributes are
/// left out of that index.
fn index_entries(
    description: &TableDescription,
    primary_key: &[u8],
    item: &Item,
) -> BackendResult<Vec<Vec<u8>>> {
    let mut entries = Vec::new();
    for index in &description.indexes {
        let values: Option<Vec<_>> = std::iter::once(&index.hash_key)
            .chain(index.range_key.as_ref())
            .map(|a| item.get(&a.name))
            .collect();
        let Some(values) = values else { continue };
        let mut entry = index_prefix(&description.name, &index.name);
        for value in values {
            encode_value(&mut entry, value)?;
        }
        entry.extend_from_slice(primary_key);
        entries.push(entry);
    }
    Ok(entries)
}

/// Point and range reads shared by snapshots and transactions.
trait Reader: Send {
    fn read(&mut self, key: Vec<u8>) -> BoxFuture<'_, BackendResult<Option<Vec<u8>>>>;

    fn read_range(
        &mut self,
        start: Vec<u8>,
        end: Vec<u8>,
        reverse: bool,
    ) -> BoxFuture<'_, BackendResult<Vec<KvPair>>>;
}

macro_rules! impl_reader {
    ($($ty:ty),*) => {
        $(
            impl Reader for $ty {
                fn read(&mut self, key: Vec<u8>) -> BoxFuture<'_, BackendResult<Option<Vec<u8>>>> {
                    Box::pin(async move { Ok(self.get(key).await?) })
                }

                fn read_range(
                    &mut self,
                    start: Vec<u8>,
                    end: Vec<u8>,
                    reverse: bool,
                ) -> BoxFuture<'_, BackendResult<Vec<KvPair>>> {
                    Box::pin(async move {
                        let range = Key::from(start)..Key::from(end);
                        let pairs = if reverse {
                            self.scan_reverse(range, PAGE_SIZE).await?.collect()
                        } else {
                            self.scan(range, PAGE_SIZE).await?.collect()
                        };
                        Ok(pairs)
                    })
                }
            }
        )*
    };
}

impl_reader!(Transaction, Snapshot);

async fn load_table<R: Reader>(reader: &mut R, table: &str) -> BackendResult<TableDescription> {
    let Some(data) = reader.read(meta_path(table)).await? else {
        return Err(BackendError::ResourceNotFound(format!("table {}", table)));
    };
    StoredTable::decode(data.as_slice())?.to_description()
}

async fn load_item<R: Reader>(
    reader: &mut R,
    table: &str,
    primary_key: &[u8],
) -> BackendResult<Option<Item>> {
    let Some(data) = reader.read(item_path(table, primary_key)).await? else {
        return Ok(None);
    };
    Ok(Some(StoredItem::decode(data.as_slice())?.to_item()))
}

/// Replaces `old` with `new` (or removes it), keeping the index entries in step.
async fn write_item(
    txn: &mut Transaction,
    description: &TableDescription,
    primary_key: &[u8],
    old: Option<&Item>,
    new: Option<&Item>,
) -> BackendResult<()> {
    if let Some(old) = old {
        for entry in index_entries(description, primary_key, old)? {
            txn.delete(entry).await?;
        }
    }
    let path = item_path(&description.name, primary_key);
    match new {
        Some(new) => {
            for entry in index_entries(description, primary_key, new)? {
                txn.put(entry, primary_key.to_vec()).await?;
            }
            txn.put(path, StoredItem::from(new).encode_to_vec()).await?;
        }
        None => txn.delete(path).await?,
    }
    Ok(())
}

/// Commits on success, rolls back otherwise.
async fn finish<T>(mut txn: Transaction, result: BackendResult<T>) -> BackendResult<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

async fn read_page<R: Reader>(
    reader: &mut R,
    request: &ScanRequest,
    query: Option<&QueryRequest>,
) -> BackendResult<Page> {
    let description = load_table(reader, &request.table).await?;
    let index = resolve_index(&description, request)?;
    let attributes = key_attributes(&description, index);
    let forward = query.is_none_or(|query| query.scan_forward);

    let base = match index {
        Some(index) => index_prefix(&request.table, &index.name),
        None => item_prefix(&request.table),
    };
    let mut prefix = base.clone();
    if let Some(query) = query {
        encode_value(&mut prefix, &query.key_condition.hash_value)?;
    }
    let mut start = prefix.clone();
    let mut end = next_key(&prefix);

    if let Some(exclusive_start) = &request.exclusive_start_key {
        let values: Option<Vec<_>> = attributes
            .iter()
            .map(|a| exclusive_start.get(&a.name))
            .collect();
        let values = values.ok_or_else(|| {
            BackendError::Validation("exclusive start key lacks key attributes".into())
        })?;
        let mut position = base.clone();
        position.extend(encode_key(values)?);
        if forward {
            position.push(0x00);
            start = start.max(position);
        } else {
            end = end.min(position);
        }
    }

    let limit = request
        .limit
        .map_or(usize::MAX, |limit| (limit as usize).max(1));
    let mut page = Page::default();
    let mut last = None;
    'scan: while start < end {
        let pairs = reader.read_range(start.clone(), end.clone(), !forward).await?;
        let len = pairs.len();
        for pair in pairs {
            let key: Vec<u8> = pair.key().clone().into();
            if forward {
                start = key;
                start.push(0x00);
            } else {
                end = key;
            }
            let item = match index {
                None => StoredItem::decode(pair.value().as_slice())?.to_item(),
                Some(_) => match load_item(reader, &request.table, pair.value()).await? {
                    Some(item) => item,
                    None => continue,
                },
            };
            if let Some(query) = query
                && !matches_key_condition(&query.key_condition, &item)
            {
                continue;
            }
            if page.scanned_count == limit {
                page.last_evaluated_key = last.take();
                break 'scan;
            }
            page.scanned_count += 1;
            last = Some(position_key(&description, index, &item));
            if request.filter.as_ref().is_none_or(|f| evaluate(f, &item)) {
                page.items.push(project(
                    &description,
                    index,
                    item,
                    request.projection.as_deref(),
                ));
            }
        }
        if len < PAGE_SIZE as usize {
            break;
        }
    }
    Ok(page)
}

async fn put_item(txn: &mut Transaction, request: PutItem) -> BackendResult<()> {
    let description = load_table(txn, &request.table).await?;
    let primary_key = primary_key(&description, &request.item)?;
    let existing = load_item(txn, &request.table, &primary_key).await?;
    check(request.condition.as_ref(), existing.as_ref())?;
    write_item(
        txn,
        &description,
        &primary_key,
        existing.as_ref(),
        Some(&request.item),
    )
    .await
}

async fn update_item(txn: &mut Transaction, request: UpdateItem) -> BackendResult<Item> {
    let description = load_table(txn, &request.table).await?;
    validate_key(&description, &request.key)?;
    let primary_key = primary_key(&description, &request.key)?;
    let existing = load_item(txn, &request.table, &primary_key).await?;
    check(request.condition.as_ref(), existing.as_ref())?;
    let mut item = existing.clone().unwrap_or(request.key);
    apply_update(&description, &mut item, &request.actions)?;
    write_item(txn, &description, &primary_key, existing.as_ref(), Some(&item)).await?;
    Ok(item)
}

async fn delete_item(txn: &mut Transaction, request: DeleteItem) -> BackendResult<()> {
    let description = load_table(txn, &request.table).await?;
    validate_key(&description, &request.key)?;
    let primary_key = primary_key(&description, &request.key)?;
    let existing = load_item(txn, &request.table, &primary_key).await?;
    check(request.condition.as_ref(), existing.as_ref())?;
    if existing.is_some() {
        write_item(txn, &description, &primary_key, existing.as_ref(), None).await?;
    }
    Ok(())
}

async fn batch_write(
    txn: &mut Transaction,
    table: &str,
    requests: Vec<WriteRequest>,
) -> BackendResult<()> {
    let description = load_table(txn, table).await?;
    for request in requests {
        let (key, new) = match &request {
            WriteRequest::Put(item) => (item, Some(item)),
            WriteRequest::Delete(key) => {
                validate_key(&description, key)?;
                (key, None)
            }
        };
        let primary_key = primary_key(&description, key)?;
        let existing = load_item(txn, table, &primary_key).await?;
        if existing.is_some() || new.is_some() {
            write_item(txn, &description, &primary_key, existing.as_ref(), new).await?;
        }
    }
    Ok(())
}

async fn transact(txn: &mut Transaction, items: Vec<TransactWriteItem>) -> BackendResult<()> {
    let mut tables: BTreeMap<String, TableDescription> = BTreeMap::new();
    let mut plans = Vec::with_capacity(items.len());
    let mut reasons = Vec::with_capacity(items.len());
    for item in &items {
        let table = item.table().to_string();
        if !tables.contains_key(&table) {
            let description = load_table(txn, &table).await?;
            tables.insert(table.clone(), description);
        }
        let description = &tables[&table];
        let (key, condition) = match item {
            TransactWriteItem::Put(put) => (&put.item, put.condition.as_ref()),
            TransactWriteItem::Update(update) => {
                validate_key(description, &update.key)?;
                (&update.key, update.condition.as_ref())
            }
            TransactWriteItem::Delete(delete) => {
                validate_key(description, &delete.key)?;
                (&delete.key, delete.condition.as_ref())
            }
            TransactWriteItem::ConditionCheck { key, condition, .. } => {
                validate_key(description, key)?;
                (key, Some(condition))
            }
        };
        let primary_key = primary_key(description, key)?;
        if plans
            .iter()
            .any(|(t, k, _): &(String, Vec<u8>, Option<Item>)| *t == table && *k == primary_key)
        {
            return Err(BackendError::Validation(
                "transaction cannot include multiple operations on one item".into(),
            ));
        }
        let existing = load_item(txn, &table, &primary_key).await?;
        reasons.push(
            check(condition, existing.as_ref())
                .err()
                .map(|_| "ConditionalCheckFailed".to_string()),
        );
        plans.push((table, primary_key, existing));
    }
    if reasons.iter().any(Option::is_some) {
        return Err(BackendError::TransactionCanceled(reasons));
    }

    for (item, (table, primary_key, existing)) in items.into_iter().zip(plans) {
        let description = &tables[&table];
        match item {
            TransactWriteItem::Put(put) => {
                write_item(txn, description, &primary_key, existing.as_ref(), Some(&put.item))
                    .await?
            }
            TransactWriteItem::Update(update) => {
                let mut stored = existing.clone().unwrap_or(update.key);
                apply_update(description, &mut stored, &update.actions)?;
                write_item(txn, description, &primary_key, existing.as_ref(), Some(&stored))
                    .await?
            }
            TransactWriteItem::Delete(_) if existing.is_some() => {
                write_item(txn, description, &primary_key, existing.as_ref(), None).await?
            }
            TransactWriteItem::Delete(_) | TransactWriteItem::ConditionCheck { .. } => {}
        }
    }
    Ok(())
}

/// Backend over a TiKV cluster.
#[derive(Clone)]
pub struct TikvBackend {
    client: TransactionClient,
}

impl TikvBackend {
    pub async fn new(pd_endpoints: Vec<String>) -> Result<Self, BackendError> {
        let client = TransactionClient::new(pd_endpoints).await?;
        Ok(Self { client })
    }

    pub fn from_client(client: TransactionClient) -> Self {
        Self { client }
    }

    async fn snapshot(&self) -> BackendResult<Snapshot> {
        Ok(self.client.snapshot(
            self.client.current_timestamp().await?,
            TransactionOptions::new_optimistic(),
        ))
    }
}

impl Backend for TikvBackend {
    fn create_table(&self, table: TableDescription) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result: BackendResult<()> = async {
                if txn.get(meta_path(&table.name)).await?.is_some() {
                    return Err(BackendError::ResourceInUse(format!("table {}", table.name)));
                }
                txn.put(meta_path(&table.name), StoredTable::from(&table).encode_to_vec())
                    .await?;
                txn.put(catalog_path(&table.name), Vec::new()).await?;
                Ok(())
            }
            .await;
            log::debug!("create table {}: ok={}", table.name, result.is_ok());
            finish(txn, result).await
        })
    }

    fn describe_table(&self, table: String) -> BoxFuture<'_, BackendResult<TableDescription>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            let mut description = load_table(&mut snapshot, &table).await?;
            let prefix = item_prefix(&table);
            let end = next_key(&prefix);
            let mut start = prefix;
            loop {
                let pairs = snapshot.read_range(start.clone(), end.clone(), false).await?;
                description.item_count += pairs.len() as u64;
                let Some(last) = pairs.last() else { break };
                start = last.key().clone().into();
                start.push(0x00);
                if pairs.len() < PAGE_SIZE as usize {
                    break;
                }
            }
            Ok(description)
        })
    }

    fn delete_table(&self, table: String) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result: BackendResult<()> = async {
                load_table(&mut txn, &table).await?;
                let prefix = table_prefix(&table);
                let end = next_key(&prefix);
                let mut start = prefix;
                loop {
                    let pairs = txn.read_range(start.clone(), end.clone(), false).await?;
                    let len = pairs.len();
                    for pair in pairs {
                        start = pair.key().clone().into();
                        start.push(0x00);
                        txn.delete(pair.into_key()).await?;
                    }
                    if len < PAGE_SIZE as usize {
                        break;
                    }
                }
                txn.delete(catalog_path(&table)).await?;
                Ok(())
            }
            .await;
            finish(txn, result).await
        })
    }

    fn list_tables(&self) -> BoxFuture<'_, BackendResult<Vec<String>>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            let prefix = catalog_prefix();
            let end = next_key(&prefix);
            let mut start = prefix.clone();
            let mut tables = Vec::new();
            loop {
                let pairs = snapshot.read_range(start.clone(), end.clone(), false).await?;
                let len = pairs.len();
                for pair in pairs {
                    let key: Vec<u8> = pair.into_key().into();
                    let name = String::from_utf8(key[prefix.len()..].to_vec())
                        .map_err(|e| BackendError::Validation(e.to_string()))?;
                    start = key;
                    start.push(0x00);
                    tables.push(name);
                }
                if len < PAGE_SIZE as usize {
                    break;
                }
            }
            Ok(tables)
        })
    }

    fn update_time_to_live(
        &self,
        table: String,
        attribute: String,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result: BackendResult<()> = async {
                let mut description = load_table(&mut txn, &table).await?;
                description.ttl_attribute = Some(attribute);
                txn.put(meta_path(&table), StoredTable::from(&description).encode_to_vec())
                    .await?;
                Ok(())
            }
            .await;
            finish(txn, result).await
        })
    }

    fn put_item(&self, request: PutItem) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result = put_item(&mut txn, request).await;
            finish(txn, result).await
        })
    }

    fn get_item(&self, request: GetItem) -> BoxFuture<'_, BackendResult<Option<Item>>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            let description = load_table(&mut snapshot, &request.table).await?;
            validate_key(&description, &request.key)?;
            let primary_key = primary_key(&description, &request.key)?;
            load_item(&mut snapshot, &request.table, &primary_key).await
        })
    }

    fn update_item(&self, request: UpdateItem) -> BoxFuture<'_, BackendResult<Item>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result = update_item(&mut txn, request).await;
            finish(txn, result).await
        })
    }

    fn delete_item(&self, request: DeleteItem) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result = delete_item(&mut txn, request).await;
            finish(txn, result).await
        })
    }

    fn query(&self, request: QueryRequest) -> BoxFuture<'_, BackendResult<Page>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            read_page(&mut snapshot, &request.scan, Some(&request)).await
        })
    }

    fn scan(&self, request: ScanRequest) -> BoxFuture<'_, BackendResult<Page>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            read_page(&mut snapshot, &request, None).await
        })
    }

    fn batch_write_item(
        &self,
        table: String,
        requests: Vec<WriteRequest>,
    ) -> BoxFuture<'_, BackendResult<Vec<WriteRequest>>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result = batch_write(&mut txn, &table, requests).await;
            finish(txn, result).await?;
            Ok(Vec::new())
        })
    }

    fn batch_get_item(
        &self,
        table: String,
        keys: Vec<Item>,
        _consistent_read: bool,
    ) -> BoxFuture<'_, BackendResult<BatchGetOutput>> {
        Box::pin(async move {
            let mut snapshot = self.snapshot().await?;
            let description = load_table(&mut snapshot, &table).await?;
            let mut paths = Vec::with_capacity(keys.len());
            for key in &keys {
                validate_key(&description, key)?;
                paths.push(Key::from(item_path(&table, &primary_key(&description, key)?)));
            }
            let mut output = BatchGetOutput::default();
            for pair in snapshot.batch_get(paths).await? {
                output
                    .items
                    .push(StoredItem::decode(pair.value().as_slice())?.to_item());
            }
            Ok(output)
        })
    }

    fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut txn = self.client.begin_optimistic().await?;
            let result = transact(&mut txn, items).await;
            finish(txn, result).await
        })
    }
}
