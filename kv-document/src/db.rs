use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, TikvBackend};
use crate::chain::Chain;
use crate::dumping::dump_operand;
use crate::schema::{ModelSchema, Registry};
use crate::transaction::TransactionWrite;
use crate::{Attributes, Config, Document, Error, Item, Model, Value};

/// Application context: a storage backend, the configuration and the frozen
/// model registry. Cheap to clone.
#[derive(Clone)]
pub struct DB {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    config: Config,
    registry: Arc<Registry>,
}

impl DB {
    pub fn new(backend: Arc<dyn Backend>, config: Config, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                registry,
            }),
        }
    }

    /// Connects to a TiKV cluster through its placement driver endpoints.
    pub async fn connect(
        pd_endpoints: Vec<String>,
        config: Config,
        registry: Arc<Registry>,
    ) -> Result<Self, Error> {
        let backend = TikvBackend::new(pd_endpoints).await?;
        Ok(Self::new(Arc::new(backend), config, registry))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn table(&self, model: &str) -> Result<Table, Error> {
        Ok(Table {
            db: self.clone(),
            schema: self.inner.registry.get(model)?,
        })
    }

    pub fn table_of<M: Model>(&self) -> Result<Table, Error> {
        self.table(M::NAME)
    }

    pub fn transaction(&self) -> TransactionWrite {
        TransactionWrite::new(self.clone())
    }
}

/// Primary key of one item.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    pub hash: Value,
    pub range: Option<Value>,
}

impl Key {
    pub fn new(hash: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn with_range(hash: impl Into<Value>, range: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "({}, {})", self.hash, range),
            None => write!(f, "{}", self.hash),
        }
    }
}

macro_rules! impl_key_from {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Key {
                fn from(hash: $t) -> Self {
                    Key::new(hash)
                }
            }
        )+
    };
}

impl_key_from!(Value, &str, String, &String, i32, i64, u32, u64);

impl<H: Into<Value>, R: Into<Value>> From<(H, R)> for Key {
    fn from((hash, range): (H, R)) -> Self {
        Key::with_range(hash, range)
    }
}

/// One model's table, the entry point for finders, chains and writes.
#[derive(Clone)]
pub struct Table {
    pub(crate) db: DB,
    pub(crate) schema: Arc<ModelSchema>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table {{ model: {}, table: {} }}", self.schema.name, self.name())
    }
}

impl Table {
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    /// Physical table name, namespace included.
    pub fn name(&self) -> String {
        self.db.config().table_name(&self.schema.table)
    }

    pub(crate) fn config(&self) -> &Config {
        self.db.config()
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.db.backend()
    }

    pub(crate) fn timestamps(&self) -> bool {
        self.schema.timestamps && self.config().timestamps
    }

    /// A new, unsaved document.
    pub fn build(&self, attributes: Attributes) -> Result<Document, Error> {
        let mut document = Document::new(self.schema.clone());
        document.assign(attributes)?;
        Ok(document)
    }

    pub fn all(&self) -> Chain {
        Chain::new(self.clone())
    }

    /// A chain filtered by `attribute[.operator] => value` pairs.
    pub fn where_attrs(&self, attributes: Attributes) -> Result<Chain, Error> {
        self.all().where_attrs(attributes)
    }

    pub(crate) fn key_item(&self, key: &Key) -> Result<Item, Error> {
        let config = self.config();
        let mut item = Item::new();
        if key.hash.is_null() {
            return Err(Error::MissingHashKey(self.schema.name.clone()));
        }
        let hash = self.schema.require_attribute(&self.schema.hash_key)?;
        item.insert(hash.name.clone(), dump_operand(&key.hash, hash, config)?);
        if let Some(range_key) = &self.schema.range_key {
            let range = match &key.range {
                Some(range) if !range.is_null() => range,
                _ => return Err(Error::MissingRangeKey(self.schema.name.clone())),
            };
            let attribute = self.schema.require_attribute(range_key)?;
            item.insert(attribute.name.clone(), dump_operand(range, attribute, config)?);
        }
        Ok(item)
    }

    pub(crate) fn load(&self, item: &Item) -> Result<Document, Error> {
        Ok(Document::loaded(
            self.schema.clone(),
            crate::dumping::load_item(item, &self.schema, self.config())?,
        ))
    }
}
