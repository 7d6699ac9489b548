use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};

use crate::backoff::{BackoffRegistry, BackoffStrategy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BillingMode {
    Provisioned,
    PayPerRequest,
}

/// Settings consumed by the persistence and query engine.
///
/// Built by value: `Config::default().namespace("app").consistent_read(true)`.
#[derive(Clone)]
pub struct Config {
    pub namespace: String,
    pub create_table_on_save: bool,
    pub read_capacity: u64,
    pub write_capacity: u64,
    pub billing_mode: BillingMode,
    pub consistent_read: bool,
    pub warn_on_scan: bool,
    pub raise_on_unknown_attribute: bool,
    pub timestamps: bool,
    pub store_empty_string_as_nil: bool,
    pub store_empty_collection_as_nil: bool,
    pub store_nil_as_null: bool,
    pub store_datetime_as_string: bool,
    pub store_date_as_string: bool,
    pub store_boolean_as_native: bool,
    /// Offset used when datetimes are written as strings.
    pub application_timezone: FixedOffset,
    /// Page size for queries and scans when the chain doesn't set one.
    pub batch_size: Option<u32>,
    pub backoff: Option<String>,
    pub backoff_strategies: BackoffRegistry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "kv_document".to_string(),
            create_table_on_save: true,
            read_capacity: 100,
            write_capacity: 20,
            billing_mode: BillingMode::Provisioned,
            consistent_read: false,
            warn_on_scan: true,
            raise_on_unknown_attribute: true,
            timestamps: true,
            store_empty_string_as_nil: true,
            store_empty_collection_as_nil: true,
            store_nil_as_null: false,
            store_datetime_as_string: false,
            store_date_as_string: false,
            store_boolean_as_native: true,
            application_timezone: Utc.fix(),
            batch_size: None,
            backoff: None,
            backoff_strategies: BackoffRegistry::default(),
        }
    }
}

macro_rules! setter {
    ($($name:ident: $t:ty),+ $(,)?) => {
        $(
            pub fn $name(mut self, value: $t) -> Self {
                self.$name = value;
                self
            }
        )+
    };
}

impl Config {
    setter!(
        create_table_on_save: bool,
        read_capacity: u64,
        write_capacity: u64,
        billing_mode: BillingMode,
        consistent_read: bool,
        warn_on_scan: bool,
        raise_on_unknown_attribute: bool,
        timestamps: bool,
        store_empty_string_as_nil: bool,
        store_empty_collection_as_nil: bool,
        store_nil_as_null: bool,
        store_datetime_as_string: bool,
        store_date_as_string: bool,
        store_boolean_as_native: bool,
        application_timezone: FixedOffset,
    );

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Select a registered backoff strategy for batch operations.
    pub fn backoff(mut self, name: impl Into<String>) -> Self {
        self.backoff = Some(name.into());
        self
    }

    pub fn register_backoff(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn BackoffStrategy>,
    ) -> Self {
        self.backoff_strategies.register(name, strategy);
        self
    }

    /// Physical table name for a declared table.
    pub fn table_name(&self, table: &str) -> String {
        if self.namespace.is_empty() {
            table.to_string()
        } else {
            format!("{}_{}", self.namespace, table)
        }
    }
}
