//! Protobuf records persisted by the TiKV backend.

use std::collections::BTreeMap;

use crate::backend::{IndexDescription, KeyAttribute, TableDescription};
use crate::error::BackendError;
use crate::schema::{IndexKind, Projection};
use crate::types::KeyKind;
use crate::{AttributeValue, Item};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredItem {
    #[prost(btree_map = "string, message", tag = "1")]
    pub attributes: BTreeMap<String, StoredValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredValue {
    #[prost(oneof = "stored_value::Kind", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub kind: Option<stored_value::Kind>,
}

pub mod stored_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(string, tag = "1")]
        S(String),
        #[prost(string, tag = "2")]
        N(String),
        #[prost(bytes = "vec", tag = "3")]
        B(Vec<u8>),
        #[prost(bool, tag = "4")]
        Bool(bool),
        #[prost(bool, tag = "5")]
        Null(bool),
        #[prost(message, tag = "6")]
        Ss(super::StringList),
        #[prost(message, tag = "7")]
        Ns(super::StringList),
        #[prost(message, tag = "8")]
        Bs(super::BytesList),
        #[prost(message, tag = "9")]
        L(super::ValueList),
        #[prost(message, tag = "10")]
        M(super::StoredItem),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueList {
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<StoredValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredKeyAttribute {
    #[prost(string, tag = "1")]
    pub name: String,
    /// 0 string, 1 number, 2 binary.
    #[prost(uint32, tag = "2")]
    pub kind: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredIndex {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub local: bool,
    #[prost(message, optional, tag = "3")]
    pub hash_key: Option<StoredKeyAttribute>,
    #[prost(message, optional, tag = "4")]
    pub range_key: Option<StoredKeyAttribute>,
    /// 0 all, 1 keys only, 2 include.
    #[prost(uint32, tag = "5")]
    pub projection: u32,
    #[prost(string, repeated, tag = "6")]
    pub included: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoredTable {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub hash_key: Option<StoredKeyAttribute>,
    #[prost(message, optional, tag = "3")]
    pub range_key: Option<StoredKeyAttribute>,
    #[prost(message, repeated, tag = "4")]
    pub indexes: Vec<StoredIndex>,
    #[prost(string, optional, tag = "5")]
    pub ttl_attribute: Option<String>,
    #[prost(uint64, optional, tag = "6")]
    pub read_capacity: Option<u64>,
    #[prost(uint64, optional, tag = "7")]
    pub write_capacity: Option<u64>,
}

impl From<&AttributeValue> for StoredValue {
    fn from(value: &AttributeValue) -> Self {
        use stored_value::Kind;
        let kind = match value {
            AttributeValue::S(s) => Kind::S(s.clone()),
            AttributeValue::N(n) => Kind::N(n.clone()),
            AttributeValue::B(b) => Kind::B(b.clone()),
            AttributeValue::Bool(b) => Kind::Bool(*b),
            AttributeValue::Null => Kind::Null(true),
            AttributeValue::Ss(set) => Kind::Ss(StringList {
                values: set.iter().cloned().collect(),
            }),
            AttributeValue::Ns(set) => Kind::Ns(StringList {
                values: set.iter().cloned().collect(),
            }),
            AttributeValue::Bs(set) => Kind::Bs(BytesList {
                values: set.iter().cloned().collect(),
            }),
            AttributeValue::L(items) => Kind::L(ValueList {
                values: items.iter().map(StoredValue::from).collect(),
            }),
            AttributeValue::M(map) => Kind::M(StoredItem::from(map)),
        };
        StoredValue { kind: Some(kind) }
    }
}

impl From<&StoredValue> for AttributeValue {
    fn from(value: &StoredValue) -> Self {
        use stored_value::Kind;
        match &value.kind {
            None | Some(Kind::Null(_)) => AttributeValue::Null,
            Some(Kind::S(s)) => AttributeValue::S(s.clone()),
            Some(Kind::N(n)) => AttributeValue::N(n.clone()),
            Some(Kind::B(b)) => AttributeValue::B(b.clone()),
            Some(Kind::Bool(b)) => AttributeValue::Bool(*b),
            Some(Kind::Ss(list)) => AttributeValue::Ss(list.values.iter().cloned().collect()),
            Some(Kind::Ns(list)) => AttributeValue::Ns(list.values.iter().cloned().collect()),
            Some(Kind::Bs(list)) => AttributeValue::Bs(list.values.iter().cloned().collect()),
            Some(Kind::L(list)) => {
                AttributeValue::L(list.values.iter().map(AttributeValue::from).collect())
            }
            Some(Kind::M(map)) => AttributeValue::M(map.to_item()),
        }
    }
}

impl From<&Item> for StoredItem {
    fn from(item: &Item) -> Self {
        StoredItem {
            attributes: item
                .iter()
                .map(|(name, value)| (name.clone(), StoredValue::from(value)))
                .collect(),
        }
    }
}

impl StoredItem {
    pub fn to_item(&self) -> Item {
        self.attributes
            .iter()
            .map(|(name, value)| (name.clone(), AttributeValue::from(value)))
            .collect()
    }
}

fn stored_key(attribute: &KeyAttribute) -> StoredKeyAttribute {
    StoredKeyAttribute {
        name: attribute.name.clone(),
        kind: match attribute.kind {
            KeyKind::String => 0,
            KeyKind::Number => 1,
            KeyKind::Binary => 2,
        },
    }
}

fn key_attribute(stored: Option<&StoredKeyAttribute>) -> Result<KeyAttribute, BackendError> {
    let stored = stored
        .ok_or_else(|| BackendError::Validation("stored table lacks a key attribute".into()))?;
    Ok(KeyAttribute {
        name: stored.name.clone(),
        kind: match stored.kind {
            0 => KeyKind::String,
            1 => KeyKind::Number,
            _ => KeyKind::Binary,
        },
    })
}

impl From<&TableDescription> for StoredTable {
    fn from(table: &TableDescription) -> Self {
        StoredTable {
            name: table.name.clone(),
            hash_key: Some(stored_key(&table.hash_key)),
            range_key: table.range_key.as_ref().map(stored_key),
            indexes: table
                .indexes
                .iter()
                .map(|index| StoredIndex {
                    name: index.name.clone(),
                    local: index.kind == IndexKind::Local,
                    hash_key: Some(stored_key(&index.hash_key)),
                    range_key: index.range_key.as_ref().map(stored_key),
                    projection: match index.projection {
                        Projection::All => 0,
                        Projection::KeysOnly => 1,
                        Projection::Include(_) => 2,
                    },
                    included: match &index.projection {
                        Projection::Include(names) => names.clone(),
                        _ => Vec::new(),
                    },
                })
                .collect(),
            ttl_attribute: table.ttl_attribute.clone(),
            read_capacity: table.capacity.map(|(r, _)| r),
            write_capacity: table.capacity.map(|(_, w)| w),
        }
    }
}

impl StoredTable {
    pub fn to_description(&self) -> Result<TableDescription, BackendError> {
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            indexes.push(IndexDescription {
                name: index.name.clone(),
                kind: if index.local {
                    IndexKind::Local
                } else {
                    IndexKind::Global
                },
                hash_key: key_attribute(index.hash_key.as_ref())?,
                range_key: index
                    .range_key
                    .as_ref()
                    .map(|range| key_attribute(Some(range)))
                    .transpose()?,
                projection: match index.projection {
                    0 => Projection::All,
                    1 => Projection::KeysOnly,
                    _ => Projection::Include(index.included.clone()),
                },
                read_capacity: None,
                write_capacity: None,
            });
        }
        Ok(TableDescription {
            name: self.name.clone(),
            hash_key: key_attribute(self.hash_key.as_ref())?,
            range_key: self
                .range_key
                .as_ref()
                .map(|range| key_attribute(Some(range)))
                .transpose()?,
            indexes,
            ttl_attribute: self.ttl_attribute.clone(),
            capacity: self.read_capacity.zip(self.write_capacity),
            item_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn items_survive_encoding() {
        let item = Item::from([
            ("id".to_string(), AttributeValue::S("1".into())),
            ("n".to_string(), AttributeValue::N("1.5".into())),
            ("null".to_string(), AttributeValue::Null),
            (
                "nested".to_string(),
                AttributeValue::L(vec![AttributeValue::M(Item::from([(
                    "tags".to_string(),
                    AttributeValue::Ss(["a".to_string()].into()),
                )]))]),
            ),
        ]);
        let bytes = StoredItem::from(&item).encode_to_vec();
        let decoded = StoredItem::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.to_item(), item);
    }
}
