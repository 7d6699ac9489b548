//! A document mapper for DynamoDB-style key/value stores.
//!
//! Models are declared as [`ModelSchema`]s (by hand or with
//! `#[derive(KvDocument)]`), collected into a frozen [`Registry`] and used
//! through a [`DB`] context that owns the storage [`Backend`](backend::Backend).
//!
//! ```no_run
//! use std::sync::Arc;
//! use kv_document::{Config, DB, FieldType, MemoryBackend, ModelSchema, Registry, attrs};
//!
//! # async fn run() -> Result<(), kv_document::Error> {
//! let registry = Registry::builder()
//!     .register(ModelSchema::builder("User").hash_key("id", FieldType::String))
//!     .build()?;
//! let db = DB::new(Arc::new(MemoryBackend::new()), Config::default(), registry);
//! let users = db.table("User")?;
//! let user = users.create(attrs! {}).await?;
//! assert!(users.find(user.key()?).await?.is_persisted());
//! # Ok(())
//! # }
//! ```

mod admin;
pub mod backend;
mod backoff;
mod chain;
mod config;
mod criteria;
mod db;
mod document;
mod dumping;
mod error;
mod lifecycle;
pub mod planner;
mod persistence;
mod schema;
mod transaction;
mod types;
mod update;
mod value;

pub use backend::{MemoryBackend, TikvBackend};
pub use backoff::{Backoff, BackoffRegistry, BackoffStrategy, Constant, Exponential};
pub use chain::{Chain, ResultPage, ResultStream};
pub use config::{BillingMode, Config};
pub use criteria::{Criteria, CriteriaNode, Operand, Operator};
pub use db::{DB, Key, Table};
pub use document::{Document, State};
pub use dumping::{dump, load};
pub use error::{BackendError, Error};
pub use lifecycle::{Event, HookResult, Timing};
pub use persistence::SaveOptions;
pub use schema::{
    AttributeDef, CREATED_AT, IndexKind, LOCK_VERSION, ModelDeclaration, ModelSchema,
    Projection, Registry, RegistryBuilder, SchemaBuilder, SecondaryIndex, UPDATED_AT,
};
pub use transaction::TransactionWrite;
pub use types::{CustomType, FieldType, KeyKind, TypeRegistry};
pub use update::UpdateBuilder;
pub use value::{AttributeValue, Attributes, FromValue, Item, Value};

pub use kv_document_derive::KvDocument;

#[doc(hidden)]
pub use inventory;

/// A typed model: its schema declaration plus conversion to and from
/// attribute maps. Usually derived with `#[derive(KvDocument)]`.
pub trait Model: Sized {
    /// Registry name of the model.
    const NAME: &'static str;

    fn schema() -> SchemaBuilder;

    fn to_attributes(&self) -> Attributes;

    fn from_attributes(attributes: &Attributes) -> Result<Self, Error>;

    /// The model's table in `db`.
    fn table(db: &DB) -> Result<Table, Error> {
        db.table(Self::NAME)
    }
}
