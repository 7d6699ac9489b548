//! Table administration: the pieces a `create_tables` or `ping` command wraps.

use crate::backend::{IndexDescription, KeyAttribute, TableDescription};
use crate::config::BillingMode;
use crate::error::BackendError;
use crate::schema::{AttributeDef, IndexKind};
use crate::types::FieldType;
use crate::{DB, Error, Table};

fn key_attribute(table: &Table, attribute: &AttributeDef) -> Result<KeyAttribute, Error> {
    let config = table.config();
    let store_as_string = attribute.store_as_string.unwrap_or(match attribute.field_type {
        FieldType::Date => config.store_date_as_string,
        _ => config.store_datetime_as_string,
    });
    let kind = attribute
        .field_type
        .key_kind(store_as_string)
        .ok_or_else(|| Error::UnsupportedKeyType {
            attribute: attribute.name.clone(),
            kind: attribute.field_type.name(),
        })?;
    Ok(KeyAttribute {
        name: attribute.name.clone(),
        kind,
    })
}

impl Table {
    /// Key schema, indexes, capacity and TTL for this table.
    pub fn description(&self) -> Result<TableDescription, Error> {
        let schema = &self.schema;
        let config = self.config();
        let key = |name: &str| key_attribute(self, schema.require_attribute(name)?);
        let capacity = match config.billing_mode {
            BillingMode::PayPerRequest => None,
            BillingMode::Provisioned => Some((
                schema.read_capacity.unwrap_or(config.read_capacity),
                schema.write_capacity.unwrap_or(config.write_capacity),
            )),
        };

        let mut indexes = Vec::with_capacity(schema.indexes.len());
        for index in &schema.indexes {
            let provisioned = index.kind == IndexKind::Global && capacity.is_some();
            indexes.push(IndexDescription {
                name: index.name.clone(),
                kind: index.kind,
                hash_key: key(&index.hash_key)?,
                range_key: index.range_key.as_deref().map(key).transpose()?,
                projection: index.projection.clone(),
                read_capacity: provisioned
                    .then(|| index.read_capacity.unwrap_or(config.read_capacity)),
                write_capacity: provisioned
                    .then(|| index.write_capacity.unwrap_or(config.write_capacity)),
            });
        }

        Ok(TableDescription {
            name: self.name(),
            hash_key: key(&schema.hash_key)?,
            range_key: schema.range_key.as_deref().map(key).transpose()?,
            indexes,
            ttl_attribute: schema.ttl.clone(),
            capacity,
            item_count: 0,
        })
    }

    /// Creates the table. An existing table is left as it is.
    pub async fn create_table(&self) -> Result<(), Error> {
        let description = self.description()?;
        log::info!("creating table {}", description.name);
        match self.backend().create_table(description).await {
            Ok(()) => {}
            Err(BackendError::ResourceInUse(resource)) => {
                log::debug!("{} already exists", resource);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(ttl) = &self.schema.ttl {
            self.backend()
                .update_time_to_live(self.name(), ttl.clone())
                .await?;
        }
        Ok(())
    }

    pub async fn delete_table(&self) -> Result<(), Error> {
        log::info!("deleting table {}", self.name());
        Ok(self.backend().delete_table(self.name()).await?)
    }
}

impl DB {
    /// Creates the table of every registered model that doesn't have one yet
    /// and returns the names of the tables created.
    pub async fn create_tables(&self) -> Result<Vec<String>, Error> {
        let existing = self.backend().list_tables().await?;
        let mut created = Vec::new();
        for schema in self.registry().models() {
            let table = self.table(&schema.name)?;
            let name = table.name();
            if existing.contains(&name) || created.contains(&name) {
                continue;
            }
            table.create_table().await?;
            created.push(name);
        }
        Ok(created)
    }

    /// A `list_tables` round trip.
    pub async fn ping(&self) -> Result<(), Error> {
        self.backend().list_tables().await?;
        Ok(())
    }
}
