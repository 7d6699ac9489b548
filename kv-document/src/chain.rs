//! Lazy, restartable enumeration of query and scan results.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt, TryStreamExt};

use crate::backend::{QueryRequest, ScanRequest, WriteRequest};
use crate::criteria::Criteria;
use crate::dumping::dump_operand;
use crate::planner::{self, Limits, PlanOptions, QueryPlan};
use crate::{Attributes, Document, Error, Item, Table, Value};

pub type ResultStream<T> = Pin<Box<dyn Stream<Item = Result<T, Error>> + Send>>;

/// One backend response after loading.
#[derive(Clone, Debug)]
pub struct ResultPage {
    pub documents: Vec<Document>,
    /// Pass to [`Chain::start_key`] to resume after this page.
    pub last_evaluated_key: Option<Item>,
}

#[derive(Clone)]
enum Start {
    Document(Attributes),
    Key(Item),
}

#[derive(Clone)]
struct QueryState {
    criteria: Criteria,
    index: Option<String>,
    projection: Option<Vec<String>>,
    consistent_read: bool,
    limits: Limits,
    scan_forward: bool,
    start: Option<Start>,
}

/// Criteria plus query options. Every builder method returns a new chain;
/// chains branched from a common base never see each other's conditions.
#[derive(Clone)]
pub struct Chain {
    table: Table,
    state: Arc<QueryState>,
}

impl Chain {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            state: Arc::new(QueryState {
                criteria: Criteria::default(),
                index: None,
                projection: None,
                consistent_read: false,
                limits: Limits::default(),
                scan_forward: true,
                start: None,
            }),
        }
    }

    fn state_mut(&mut self) -> &mut QueryState {
        Arc::make_mut(&mut self.state)
    }

    /// Adds one `attribute[.operator]` condition.
    pub fn where_(mut self, token: &str, value: impl Into<Value>) -> Result<Self, Error> {
        let table = self.table.clone();
        self.state_mut()
            .criteria
            .add(&table.schema, table.config(), token, value.into())?;
        Ok(self)
    }

    pub fn where_attrs(self, attributes: Attributes) -> Result<Self, Error> {
        attributes
            .into_iter()
            .try_fold(self, |chain, (token, value)| chain.where_(&token, value))
    }

    /// Forces the query onto a named secondary index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.state_mut().index = Some(index.into());
        self
    }

    /// Loads only the named attributes.
    pub fn project<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state_mut().projection = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn consistent(mut self) -> Self {
        self.state_mut().consistent_read = true;
        self
    }

    /// Total number of documents to return.
    pub fn record_limit(mut self, limit: usize) -> Self {
        self.state_mut().limits.record_limit = Some(limit);
        self
    }

    /// Total number of items the backend may examine.
    pub fn scan_limit(mut self, limit: usize) -> Self {
        self.state_mut().limits.scan_limit = Some(limit);
        self
    }

    /// Items examined per backend request.
    pub fn batch(mut self, size: u32) -> Self {
        self.state_mut().limits.batch_size = Some(size);
        self
    }

    pub fn scan_index_forward(mut self, forward: bool) -> Self {
        self.state_mut().scan_forward = forward;
        self
    }

    /// Resumes after `document`.
    pub fn start(mut self, document: &Document) -> Self {
        self.state_mut().start = Some(Start::Document(document.attributes().clone()));
        self
    }

    /// Resumes after a continuation key returned in a [`ResultPage`].
    pub fn start_key(mut self, key: Item) -> Self {
        self.state_mut().start = Some(Start::Key(key));
        self
    }

    pub fn criteria(&self) -> &Criteria {
        &self.state.criteria
    }

    pub fn plan(&self) -> Result<QueryPlan, Error> {
        let config = self.table.config();
        planner::plan(
            &self.table.schema,
            &self.state.criteria,
            &PlanOptions {
                index: self.state.index.as_deref(),
                projection: self.state.projection.as_deref(),
                consistent_read: self.state.consistent_read || config.consistent_read,
                limits: Limits {
                    batch_size: self.state.limits.batch_size.or(config.batch_size),
                    ..self.state.limits
                },
                warn_on_scan: config.warn_on_scan,
            },
        )
    }

    /// Exclusive start key for `plan`: table keys plus the chosen index keys.
    fn start_item(&self, plan: &QueryPlan) -> Result<Option<Item>, Error> {
        let attributes = match &self.state.start {
            None => return Ok(None),
            Some(Start::Key(key)) => return Ok(Some(key.clone())),
            Some(Start::Document(attributes)) => attributes,
        };
        let schema = &self.table.schema;
        let mut names: Vec<&str> = vec![schema.hash_key.as_str()];
        names.extend(schema.range_key.as_deref());
        if let Some(index) = &plan.index {
            names.extend(schema.index(index)?.key_attributes());
        }
        let mut item = Item::new();
        for name in names {
            let value = attributes.get(name).ok_or_else(|| {
                Error::InvalidState(format!("start document lacks key attribute {}", name))
            })?;
            let attribute = schema.require_attribute(name)?;
            item.insert(
                name.to_string(),
                dump_operand(value, attribute, self.table.config())?,
            );
        }
        Ok(Some(item))
    }

    /// Backend responses, one page per request, following continuation keys
    /// until the results or a limit run out.
    pub fn pages(&self) -> ResultStream<ResultPage> {
        let chain = self.clone();
        Box::pin(try_stream! {
            let table = chain.table.clone();
            let plan = chain.plan()?;
            let key_condition = plan.key_condition(&table.schema, table.config())?;
            let filter = plan.filter(&table.schema, table.config())?;
            let mut start = chain.start_item(&plan)?;
            let mut records = plan.limits.record_limit;
            let mut scanned = plan.limits.scan_limit;

            loop {
                if records == Some(0) || scanned == Some(0) {
                    break;
                }
                let limit = [
                    records.map(clamp),
                    scanned.map(clamp),
                    plan.limits.batch_size,
                ]
                .into_iter()
                .flatten()
                .min();
                let request = ScanRequest {
                    table: table.name(),
                    index: plan.index.clone(),
                    filter: filter.clone(),
                    limit,
                    exclusive_start_key: start.take(),
                    consistent_read: plan.consistent_read,
                    projection: chain.state.projection.clone(),
                };
                log::debug!(
                    "{:?} {} index={:?} limit={:?}",
                    plan.mode,
                    request.table,
                    request.index,
                    request.limit
                );
                let page = match &key_condition {
                    Some(key_condition) => table
                        .backend()
                        .query(QueryRequest {
                            scan: request,
                            key_condition: key_condition.clone(),
                            scan_forward: chain.state.scan_forward,
                        })
                        .await
                        .map_err(Error::Backend)?,
                    None => table.backend().scan(request).await.map_err(Error::Backend)?,
                };

                scanned = scanned.map(|n| n.saturating_sub(page.scanned_count));
                let mut documents = Vec::with_capacity(page.items.len());
                for item in &page.items {
                    if records == Some(0) {
                        break;
                    }
                    documents.push(table.load(item)?);
                    records = records.map(|n| n - 1);
                }
                let last_evaluated_key = page.last_evaluated_key;
                yield ResultPage {
                    documents,
                    last_evaluated_key: last_evaluated_key.clone(),
                };
                match last_evaluated_key {
                    Some(key) => start = Some(key),
                    None => break,
                }
            }
        })
    }

    pub fn stream(&self) -> ResultStream<Document> {
        let mut pages = self.pages();
        Box::pin(try_stream! {
            while let Some(page) = pages.next().await {
                for document in page?.documents {
                    yield document;
                }
            }
        })
    }

    pub async fn all(&self) -> Result<Vec<Document>, Error> {
        self.stream().try_collect().await
    }

    pub async fn first(&self) -> Result<Option<Document>, Error> {
        let chain = match self.state.limits.record_limit {
            Some(_) => self.clone(),
            None => self.clone().record_limit(1),
        };
        chain.stream().try_next().await
    }

    pub async fn count(&self) -> Result<usize, Error> {
        let schema = &self.table.schema;
        let keys = std::iter::once(schema.hash_key.clone()).chain(schema.range_key.clone());
        let chain = match self.state.projection {
            Some(_) => self.clone(),
            None => self.clone().project(keys),
        };
        chain
            .pages()
            .try_fold(0, |count, page| async move { Ok(count + page.documents.len()) })
            .await
    }

    /// Deletes every matching item with batch writes. Returns how many.
    pub async fn delete_all(&self) -> Result<usize, Error> {
        let mut keys = Vec::new();
        let mut stream = self.stream();
        while let Some(document) = stream.try_next().await? {
            keys.push(WriteRequest::Delete(self.table.key_item(&document.key()?)?));
        }
        let deleted = keys.len();
        self.table.batch_write(keys).await?;
        Ok(deleted)
    }
}

fn clamp(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
