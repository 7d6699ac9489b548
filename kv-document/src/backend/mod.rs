//! Storage engine interface: structured request values in, primitive items out.

mod eval;
mod keycodec;
mod memory;
mod proto;
mod tikv;

use futures::future::BoxFuture;

use crate::error::BackendError;
use crate::schema::{IndexKind, Projection};
use crate::types::KeyKind;
use crate::{AttributeValue, Item};

pub use eval::{compare, evaluate};
pub use memory::MemoryBackend;
pub use tikv::TikvBackend;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    BeginsWith,
    In,
    Contains,
    NotContains,
    Exists,
    NotExists,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttrCondition {
    pub attribute: String,
    pub comparator: Comparator,
    pub values: Vec<AttributeValue>,
}

/// Boolean condition over one item, used for condition and filter expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Attr(AttrCondition),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn attr(
        attribute: impl Into<String>,
        comparator: Comparator,
        values: Vec<AttributeValue>,
    ) -> Self {
        Condition::Attr(AttrCondition {
            attribute: attribute.into(),
            comparator,
            values,
        })
    }

    pub fn eq(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self::attr(attribute, Comparator::Eq, vec![value])
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::attr(attribute, Comparator::Exists, Vec::new())
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self::attr(attribute, Comparator::NotExists, Vec::new())
    }

    /// Conjunction that flattens nested `And`s.
    pub fn and(self, other: Condition) -> Condition {
        let mut conditions = match self {
            Condition::And(conditions) => conditions,
            condition => vec![condition],
        };
        match other {
            Condition::And(more) => conditions.extend(more),
            condition => conditions.push(condition),
        }
        Condition::And(conditions)
    }

    pub(crate) fn all(conditions: Vec<Condition>) -> Option<Condition> {
        conditions.into_iter().reduce(Condition::and)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateAction {
    Set(String, AttributeValue),
    Remove(String),
    /// Numeric add (absent counts as zero) or set union.
    Add(String, AttributeValue),
    /// Set difference.
    Delete(String, AttributeValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyAttribute {
    pub name: String,
    pub kind: KeyKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexDescription {
    pub name: String,
    pub kind: IndexKind,
    pub hash_key: KeyAttribute,
    pub range_key: Option<KeyAttribute>,
    pub projection: Projection,
    pub read_capacity: Option<u64>,
    pub write_capacity: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDescription {
    pub name: String,
    pub hash_key: KeyAttribute,
    pub range_key: Option<KeyAttribute>,
    pub indexes: Vec<IndexDescription>,
    pub ttl_attribute: Option<String>,
    /// `None` means on-demand billing.
    pub capacity: Option<(u64, u64)>,
    pub item_count: u64,
}

impl TableDescription {
    pub fn index(&self, name: &str) -> BackendResult<&IndexDescription> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| {
                BackendError::Validation(format!("table {} has no index {}", self.name, name))
            })
    }

    /// Primary key attributes of `item`.
    pub fn key_of(&self, item: &Item) -> BackendResult<Item> {
        let mut key = Item::new();
        for attribute in std::iter::once(&self.hash_key).chain(self.range_key.as_ref()) {
            let value = item.get(&attribute.name).ok_or_else(|| {
                BackendError::Validation(format!("missing key attribute {}", attribute.name))
            })?;
            key.insert(attribute.name.clone(), value.clone());
        }
        Ok(key)
    }
}

#[derive(Clone, Debug)]
pub struct PutItem {
    pub table: String,
    pub item: Item,
    pub condition: Option<Condition>,
}

#[derive(Clone, Debug)]
pub struct GetItem {
    pub table: String,
    pub key: Item,
    pub consistent_read: bool,
}

#[derive(Clone, Debug)]
pub struct UpdateItem {
    pub table: String,
    pub key: Item,
    pub actions: Vec<UpdateAction>,
    pub condition: Option<Condition>,
}

#[derive(Clone, Debug)]
pub struct DeleteItem {
    pub table: String,
    pub key: Item,
    pub condition: Option<Condition>,
}

/// Partition key equality plus at most one sort key condition.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    pub hash_key: String,
    pub hash_value: AttributeValue,
    pub range: Option<AttrCondition>,
}

#[derive(Clone, Debug, Default)]
pub struct ScanRequest {
    pub table: String,
    pub index: Option<String>,
    pub filter: Option<Condition>,
    /// Items examined per request, before the filter applies.
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
    pub consistent_read: bool,
    pub projection: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub scan: ScanRequest,
    pub key_condition: KeyCondition,
    pub scan_forward: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
    pub scanned_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteRequest {
    Put(Item),
    Delete(Item),
}

#[derive(Clone, Debug, Default)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

#[derive(Clone, Debug)]
pub enum TransactWriteItem {
    Put(PutItem),
    Update(UpdateItem),
    Delete(DeleteItem),
    ConditionCheck {
        table: String,
        key: Item,
        condition: Condition,
    },
}

impl TransactWriteItem {
    pub fn table(&self) -> &str {
        match self {
            TransactWriteItem::Put(put) => &put.table,
            TransactWriteItem::Update(update) => &update.table,
            TransactWriteItem::Delete(delete) => &delete.table,
            TransactWriteItem::ConditionCheck { table, .. } => table,
        }
    }
}

/// A DynamoDB-like storage engine.
pub trait Backend: Send + Sync {
    fn create_table(&self, table: TableDescription) -> BoxFuture<'_, BackendResult<()>>;

    fn describe_table(&self, table: String) -> BoxFuture<'_, BackendResult<TableDescription>>;

    fn delete_table(&self, table: String) -> BoxFuture<'_, BackendResult<()>>;

    fn list_tables(&self) -> BoxFuture<'_, BackendResult<Vec<String>>>;

    fn update_time_to_live(
        &self,
        table: String,
        attribute: String,
    ) -> BoxFuture<'_, BackendResult<()>>;

    fn put_item(&self, request: PutItem) -> BoxFuture<'_, BackendResult<()>>;

    fn get_item(&self, request: GetItem) -> BoxFuture<'_, BackendResult<Option<Item>>>;

    /// Applies the actions and returns the whole item as stored afterwards.
    fn update_item(&self, request: UpdateItem) -> BoxFuture<'_, BackendResult<Item>>;

    fn delete_item(&self, request: DeleteItem) -> BoxFuture<'_, BackendResult<()>>;

    fn query(&self, request: QueryRequest) -> BoxFuture<'_, BackendResult<Page>>;

    fn scan(&self, request: ScanRequest) -> BoxFuture<'_, BackendResult<Page>>;

    /// Returns the requests the engine did not process.
    fn batch_write_item(
        &self,
        table: String,
        requests: Vec<WriteRequest>,
    ) -> BoxFuture<'_, BackendResult<Vec<WriteRequest>>>;

    fn batch_get_item(
        &self,
        table: String,
        keys: Vec<Item>,
        consistent_read: bool,
    ) -> BoxFuture<'_, BackendResult<BatchGetOutput>>;

    /// All-or-nothing write of every item.
    fn transact_write_items(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> BoxFuture<'_, BackendResult<()>>;
}
