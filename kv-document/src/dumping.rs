//! Conversion between application values and storage primitives.
//!
//! `dump` returns `None` when the attribute should not be stored at all: nil
//! values, and (under the default policy) empty strings and empty sets/arrays.
//! Those inputs all load back as [`Value::Null`], so the round trip is
//! intentionally not a bijection for them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::schema::{AttributeDef, ModelSchema};
use crate::types::FieldType;
use crate::{AttributeValue, Attributes, Config, Error, Item, Value};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Dump one attribute according to its declaration.
pub fn dump(
    value: &Value,
    attribute: &AttributeDef,
    config: &Config,
) -> Result<Option<AttributeValue>, Error> {
    Dumper::new(config, attribute).dump(value, &attribute.field_type)
}

/// Load one attribute according to its declaration; absent loads as `Null`.
pub fn load(
    value: Option<&AttributeValue>,
    attribute: &AttributeDef,
    config: &Config,
) -> Result<Value, Error> {
    match value {
        None | Some(AttributeValue::Null) => Ok(Value::Null),
        Some(value) => Dumper::new(config, attribute).load(value, &attribute.field_type),
    }
}

/// Dump a scalar used as a condition operand or key. Empty values are kept.
pub fn dump_operand(
    value: &Value,
    attribute: &AttributeDef,
    config: &Config,
) -> Result<AttributeValue, Error> {
    let dumper = Dumper {
        keep_empty: true,
        ..Dumper::new(config, attribute)
    };
    Ok(dumper
        .dump(value, &attribute.field_type)?
        .unwrap_or(AttributeValue::Null))
}

/// Dump the element type of a set/array attribute, for `contains` operands.
pub fn dump_element(
    value: &Value,
    attribute: &AttributeDef,
    config: &Config,
) -> Result<AttributeValue, Error> {
    let dumper = Dumper {
        keep_empty: true,
        ..Dumper::new(config, attribute)
    };
    let element = match &attribute.field_type {
        FieldType::Set(Some(element)) | FieldType::Array(Some(element)) => Some(element.as_ref()),
        FieldType::Set(None) | FieldType::Array(None) => None,
        other => Some(other),
    };
    Ok(match element {
        Some(element) => dumper.dump(value, element)?,
        None => dumper.dump_inferred(value)?,
    }
    .unwrap_or(AttributeValue::Null))
}

/// Dump every declared attribute present in `attributes`.
pub fn dump_item(
    attributes: &Attributes,
    schema: &ModelSchema,
    config: &Config,
) -> Result<Item, Error> {
    let mut item = Item::new();
    for (name, value) in attributes {
        let attribute = schema.require_attribute(name)?;
        if let Some(dumped) = dump(value, attribute, config)? {
            item.insert(name.clone(), dumped);
        }
    }
    Ok(item)
}

/// Load a stored item. Attributes the schema doesn't declare are skipped.
pub fn load_item(item: &Item, schema: &ModelSchema, config: &Config) -> Result<Attributes, Error> {
    let mut attributes = Attributes::new();
    for (name, value) in item {
        let Some(attribute) = schema.attribute(name) else {
            log::debug!("skipping undeclared attribute {} of {}", name, schema.name);
            continue;
        };
        let loaded = load(Some(value), attribute, config)?;
        if !loaded.is_null() {
            attributes.insert(name.clone(), loaded);
        }
    }
    Ok(attributes)
}

struct Dumper<'a> {
    config: &'a Config,
    name: &'a str,
    store_as_string: Option<bool>,
    keep_empty: bool,
}

impl<'a> Dumper<'a> {
    fn new(config: &'a Config, attribute: &'a AttributeDef) -> Self {
        Self {
            config,
            name: &attribute.name,
            store_as_string: attribute.store_as_string,
            keep_empty: false,
        }
    }

    fn absent(&self) -> Option<AttributeValue> {
        if self.config.store_nil_as_null {
            Some(AttributeValue::Null)
        } else {
            None
        }
    }

    fn mismatch(&self, expected: &FieldType, value: &Value) -> Error {
        Error::mismatch(self.name, expected.name(), value)
    }

    fn dump(&self, value: &Value, field_type: &FieldType) -> Result<Option<AttributeValue>, Error> {
        if value.is_null() {
            return Ok(self.absent());
        }
        if !self.keep_empty && value.is_empty() {
            let collapse = match value {
                Value::String(_) => self.config.store_empty_string_as_nil,
                Value::Set(_) | Value::List(_) => self.config.store_empty_collection_as_nil,
                _ => false,
            };
            if collapse {
                return Ok(self.absent());
            }
        }

        let dumped = match (field_type, value) {
            (FieldType::String, Value::String(s)) => AttributeValue::S(s.clone()),
            (FieldType::String, Value::Integer(_) | Value::Number(_) | Value::Boolean(_)) => {
                AttributeValue::S(value.to_string())
            }
            (FieldType::Integer, Value::Integer(i)) => AttributeValue::N(i.to_string()),
            (FieldType::Integer, Value::Number(n)) if n.fract() == 0.0 => {
                AttributeValue::N((*n as i64).to_string())
            }
            (FieldType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => AttributeValue::N(i.to_string()),
                Err(_) => return Err(self.mismatch(field_type, value)),
            },
            (FieldType::Number, Value::Integer(i)) => AttributeValue::N(i.to_string()),
            (FieldType::Number, Value::Number(n)) if n.is_finite() => {
                AttributeValue::N(n.to_string())
            }
            (FieldType::Boolean, Value::Boolean(b)) => {
                if self.config.store_boolean_as_native {
                    AttributeValue::Bool(*b)
                } else {
                    AttributeValue::S(if *b { "t" } else { "f" }.to_string())
                }
            }
            (FieldType::DateTime, Value::DateTime(dt)) => self.dump_datetime(dt),
            (FieldType::Date, Value::Date(date)) => self.dump_date(date),
            (FieldType::Binary, Value::Binary(bytes)) => AttributeValue::B(bytes.clone()),
            (FieldType::Set(element), Value::Set(_) | Value::List(_)) => {
                self.dump_set(value, element.as_deref())?
            }
            (FieldType::Array(element), Value::List(items)) => {
                let mut dumped = Vec::with_capacity(items.len());
                for item in items {
                    let item = match element {
                        Some(element) => self.dump(item, element)?,
                        None => self.dump_inferred(item)?,
                    };
                    dumped.push(item.unwrap_or(AttributeValue::Null));
                }
                AttributeValue::L(dumped)
            }
            (FieldType::Map, Value::Map(_)) | (FieldType::Raw, _) => {
                return self.dump_inferred(value);
            }
            (FieldType::Serialized, value) => {
                AttributeValue::S(serde_json::to_string(&value_to_json(value))?)
            }
            (FieldType::Custom(custom), value) => (custom.dump)(value)?,
            _ => return Err(self.mismatch(field_type, value)),
        };
        Ok(Some(dumped))
    }

    fn store_as_string(&self, default: bool) -> bool {
        self.store_as_string.unwrap_or(default)
    }

    fn dump_datetime(&self, dt: &DateTime<Utc>) -> AttributeValue {
        if self.store_as_string(self.config.store_datetime_as_string) {
            AttributeValue::S(
                dt.with_timezone(&self.config.application_timezone)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )
        } else {
            AttributeValue::N(datetime_to_decimal(dt))
        }
    }

    fn dump_date(&self, date: &NaiveDate) -> AttributeValue {
        if self.store_as_string(self.config.store_date_as_string) {
            AttributeValue::S(date.format("%Y-%m-%d").to_string())
        } else {
            AttributeValue::N((*date - epoch_date()).num_days().to_string())
        }
    }

    fn dump_set(
        &self,
        value: &Value,
        element: Option<&FieldType>,
    ) -> Result<AttributeValue, Error> {
        let items: Vec<&Value> = match value {
            Value::Set(items) => items.iter().collect(),
            Value::List(items) => items.iter().collect(),
            _ => unreachable!("dump_set called with a scalar"),
        };
        let element_dumper = Dumper {
            keep_empty: true,
            ..*self
        };
        let mut strings = BTreeSet::new();
        let mut numbers = BTreeSet::new();
        let mut binaries = BTreeSet::new();
        for item in items {
            let dumped = match element {
                Some(element) => element_dumper.dump(item, element)?,
                None => element_dumper.dump_inferred(item)?,
            };
            match dumped {
                Some(AttributeValue::S(s)) => {
                    strings.insert(s);
                }
                Some(AttributeValue::N(n)) => {
                    numbers.insert(n);
                }
                Some(AttributeValue::B(b)) => {
                    binaries.insert(b);
                }
                _ => return Err(Error::mismatch(self.name, "set element", item)),
            }
        }
        let kinds = [!strings.is_empty(), !numbers.is_empty(), !binaries.is_empty()];
        if kinds.iter().filter(|&&present| present).count() > 1 {
            return Err(Error::mismatch(self.name, "homogeneous set", value));
        }
        Ok(if !numbers.is_empty() {
            AttributeValue::Ns(numbers)
        } else if !binaries.is_empty() {
            AttributeValue::Bs(binaries)
        } else if strings.is_empty() {
            match element.and_then(|e| e.key_kind(self.store_as_string(false))) {
                Some(crate::types::KeyKind::Number) => AttributeValue::Ns(numbers),
                Some(crate::types::KeyKind::Binary) => AttributeValue::Bs(binaries),
                _ => AttributeValue::Ss(strings),
            }
        } else {
            AttributeValue::Ss(strings)
        })
    }

    fn dump_inferred(&self, value: &Value) -> Result<Option<AttributeValue>, Error> {
        Ok(Some(match value {
            Value::Null => AttributeValue::Null,
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Integer(i) => AttributeValue::N(i.to_string()),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::Boolean(b) => AttributeValue::Bool(*b),
            Value::DateTime(dt) => self.dump_datetime(dt),
            Value::Date(date) => self.dump_date(date),
            Value::Binary(bytes) => AttributeValue::B(bytes.clone()),
            Value::Set(_) => self.dump_set(value, None)?,
            Value::List(items) => AttributeValue::L(
                items
                    .iter()
                    .map(|item| Ok(self.dump_inferred(item)?.unwrap_or(AttributeValue::Null)))
                    .collect::<Result<_, Error>>()?,
            ),
            Value::Map(map) => {
                let mut dumped = BTreeMap::new();
                for (key, item) in map {
                    if let Some(item) = self.dump_inferred(item)? {
                        dumped.insert(key.clone(), item);
                    }
                }
                AttributeValue::M(dumped)
            }
        }))
    }

    fn load_mismatch(&self, expected: &FieldType, value: &AttributeValue) -> Error {
        Error::mismatch(self.name, expected.name(), value)
    }

    fn load(&self, value: &AttributeValue, field_type: &FieldType) -> Result<Value, Error> {
        if let AttributeValue::Null = value {
            return Ok(Value::Null);
        }
        let loaded = match (field_type, value) {
            (FieldType::String, AttributeValue::S(s) | AttributeValue::N(s)) => {
                Value::String(s.clone())
            }
            (FieldType::Integer, AttributeValue::N(n) | AttributeValue::S(n)) => {
                match n.trim().parse::<i64>() {
                    Ok(i) => Value::Integer(i),
                    Err(_) => n
                        .trim()
                        .parse::<f64>()
                        .map(|f| Value::Integer(f as i64))
                        .map_err(|_| self.load_mismatch(field_type, value))?,
                }
            }
            (FieldType::Number, AttributeValue::N(n) | AttributeValue::S(n)) => n
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| self.load_mismatch(field_type, value))?,
            (FieldType::Boolean, AttributeValue::Bool(b)) => Value::Boolean(*b),
            (FieldType::Boolean, AttributeValue::S(s)) => match s.as_str() {
                "t" | "true" => Value::Boolean(true),
                "f" | "false" => Value::Boolean(false),
                _ => return Err(self.load_mismatch(field_type, value)),
            },
            (FieldType::DateTime, AttributeValue::N(n)) => decimal_to_datetime(n)
                .map(Value::DateTime)
                .ok_or_else(|| self.load_mismatch(field_type, value))?,
            (FieldType::DateTime, AttributeValue::S(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| self.load_mismatch(field_type, value))?,
            (FieldType::Date, AttributeValue::N(n)) => n
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|days| {
                    epoch_date().checked_add_signed(chrono::TimeDelta::try_days(days)?)
                })
                .map(Value::Date)
                .ok_or_else(|| self.load_mismatch(field_type, value))?,
            (FieldType::Date, AttributeValue::S(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| self.load_mismatch(field_type, value))?,
            (FieldType::Binary, AttributeValue::B(bytes)) => Value::Binary(bytes.clone()),
            (FieldType::Set(element), AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)) => {
                Value::Set(self.load_set(value, element.as_deref())?)
            }
            (FieldType::Set(element), AttributeValue::L(items)) => Value::Set(
                items
                    .iter()
                    .map(|item| self.load_element(item, element.as_deref()))
                    .collect::<Result<_, Error>>()?,
            ),
            (FieldType::Array(element), AttributeValue::L(items)) => Value::List(
                items
                    .iter()
                    .map(|item| self.load_element(item, element.as_deref()))
                    .collect::<Result<_, Error>>()?,
            ),
            (FieldType::Array(element), AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)) => {
                Value::List(self.load_set(value, element.as_deref())?.into_iter().collect())
            }
            (FieldType::Map, AttributeValue::M(_)) | (FieldType::Raw, _) => load_inferred(value),
            (FieldType::Serialized, AttributeValue::S(s)) => {
                json_to_value(serde_json::from_str(s)?)
            }
            (FieldType::Custom(custom), value) => (custom.load)(value)?,
            _ => return Err(self.load_mismatch(field_type, value)),
        };
        Ok(loaded)
    }

    fn load_element(
        &self,
        value: &AttributeValue,
        element: Option<&FieldType>,
    ) -> Result<Value, Error> {
        match element {
            Some(element) => self.load(value, element),
            None => Ok(load_inferred(value)),
        }
    }

    fn load_set(
        &self,
        value: &AttributeValue,
        element: Option<&FieldType>,
    ) -> Result<BTreeSet<Value>, Error> {
        let items: Vec<AttributeValue> = match value {
            AttributeValue::Ss(items) => items.iter().cloned().map(AttributeValue::S).collect(),
            AttributeValue::Ns(items) => items.iter().cloned().map(AttributeValue::N).collect(),
            AttributeValue::Bs(items) => items.iter().cloned().map(AttributeValue::B).collect(),
            _ => Vec::new(),
        };
        items
            .iter()
            .map(|item| self.load_element(item, element))
            .collect()
    }
}

fn load_inferred(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => load_number(n),
        AttributeValue::B(bytes) => Value::Binary(bytes.clone()),
        AttributeValue::Bool(b) => Value::Boolean(*b),
        AttributeValue::Null => Value::Null,
        AttributeValue::Ss(items) => Value::Set(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Set(items.iter().map(|n| load_number(n)).collect()),
        AttributeValue::Bs(items) => Value::Set(items.iter().cloned().map(Value::Binary).collect()),
        AttributeValue::L(items) => Value::List(items.iter().map(load_inferred).collect()),
        AttributeValue::M(map) => Value::Map(
            map.iter()
                .map(|(key, item)| (key.clone(), load_inferred(item)))
                .collect(),
        ),
    }
}

fn load_number(n: &str) -> Value {
    match n.parse::<i64>() {
        Ok(i) => Value::Integer(i),
        Err(_) => n
            .parse::<f64>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(n.to_string())),
    }
}

fn epoch_date() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

/// Seconds since the epoch as an exact decimal string, no float rounding.
pub(crate) fn datetime_to_decimal(dt: &DateTime<Utc>) -> String {
    let total = dt.timestamp() as i128 * NANOS_PER_SECOND + dt.timestamp_subsec_nanos() as i128;
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();
    let seconds = total / NANOS_PER_SECOND as u128;
    let nanos = total % NANOS_PER_SECOND as u128;
    if nanos == 0 {
        format!("{}{}", sign, seconds)
    } else {
        let fraction = format!("{:09}", nanos);
        format!("{}{}.{}", sign, seconds, fraction.trim_end_matches('0'))
    }
}

pub(crate) fn decimal_to_datetime(n: &str) -> Option<DateTime<Utc>> {
    let n = n.trim();
    if n.contains(['e', 'E']) {
        let seconds = n.parse::<f64>().ok()?;
        let nanos = (seconds * 1e9).round() as i128;
        return from_nanos(nanos);
    }
    let (negative, body) = match n.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, n),
    };
    let (seconds, fraction) = body.split_once('.').unwrap_or((body, ""));
    let seconds: i128 = if seconds.is_empty() { 0 } else { seconds.parse().ok()? };
    let mut digits: String = fraction.chars().take(9).collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: i128 = digits.parse().ok()?;
    let total = seconds * NANOS_PER_SECOND + nanos;
    from_nanos(if negative { -total } else { total })
}

fn from_nanos(total: i128) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(total.div_euclid(NANOS_PER_SECOND)).ok()?;
    let nanos = total.rem_euclid(NANOS_PER_SECOND) as u32;
    DateTime::from_timestamp(seconds, nanos)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::String(s) => Json::String(s.clone()),
        Value::Integer(i) => Json::from(*i),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Boolean(b) => Json::Bool(*b),
        Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Date(date) => Json::String(date.format("%Y-%m-%d").to_string()),
        Value::Binary(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Set(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), value_to_json(item)))
                .collect(),
        ),
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Number(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        Json::Object(map) => Value::Map(
            map.into_iter()
                .map(|(key, item)| (key, json_to_value(item)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attribute(field_type: FieldType) -> AttributeDef {
        AttributeDef::new("field", field_type)
    }

    fn round_trip(value: Value, field_type: FieldType, config: &Config) -> Value {
        let attribute = attribute(field_type);
        let dumped = dump(&value, &attribute, config).unwrap();
        load(dumped.as_ref(), &attribute, config).unwrap()
    }

    #[test]
    fn scalars_round_trip() {
        let config = Config::default();
        let dt = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let date = NaiveDate::from_ymd_opt(1969, 7, 20).unwrap();
        let cases = vec![
            (Value::from("Alex"), FieldType::String),
            (Value::from(-42), FieldType::Integer),
            (Value::from(0.1), FieldType::Number),
            (Value::from(3.0), FieldType::Number),
            (Value::from(true), FieldType::Boolean),
            (Value::from(dt), FieldType::DateTime),
            (Value::from(date), FieldType::Date),
            (Value::binary(vec![0u8, 1, 255]), FieldType::Binary),
            (Value::set(["a", "b"]), FieldType::set_of(FieldType::String)),
            (Value::set([1, 2]), FieldType::set_of(FieldType::Integer)),
            (Value::list([Value::from(1), Value::from("x")]), FieldType::Array(None)),
            (
                Value::Map(BTreeMap::from([("k".to_string(), Value::from("v"))])),
                FieldType::Map,
            ),
        ];
        for (value, field_type) in cases {
            assert_eq!(round_trip(value.clone(), field_type.clone(), &config), value, "{:?}", field_type);
        }
    }

    #[test]
    fn datetime_as_number_keeps_fractional_seconds() {
        let dt = Utc.timestamp_opt(-2, 500_000_000).unwrap();
        assert_eq!(datetime_to_decimal(&dt), "-1.5");
        assert_eq!(decimal_to_datetime("-1.5"), Some(dt));

        let dt = Utc.timestamp_opt(1_600_000_000, 1).unwrap();
        assert_eq!(datetime_to_decimal(&dt), "1600000000.000000001");
        assert_eq!(decimal_to_datetime("1600000000.000000001"), Some(dt));
    }

    #[test]
    fn datetime_as_string_uses_application_timezone() {
        let config = Config::default()
            .store_datetime_as_string(true)
            .application_timezone(chrono::FixedOffset::east_opt(3600).unwrap());
        let attribute = attribute(FieldType::DateTime);
        let dt = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let dumped = dump(&Value::from(dt), &attribute, &config).unwrap();
        assert_eq!(
            dumped,
            Some(AttributeValue::S("2021-01-01T01:00:00+01:00".into()))
        );
        assert_eq!(round_trip(Value::from(dt), FieldType::DateTime, &config), Value::from(dt));
    }

    #[test]
    fn empty_values_follow_the_configured_policy() {
        let attribute = attribute(FieldType::String);
        let config = Config::default();
        assert_eq!(dump(&Value::from(""), &attribute, &config).unwrap(), None);
        assert_eq!(dump(&Value::Null, &attribute, &config).unwrap(), None);

        let config = Config::default().store_empty_string_as_nil(false);
        assert_eq!(
            dump(&Value::from(""), &attribute, &config).unwrap(),
            Some(AttributeValue::S(String::new()))
        );

        let set = AttributeDef::new("tags", FieldType::set_of(FieldType::String));
        let empty = Value::Set(BTreeSet::new());
        assert_eq!(dump(&empty, &set, &Config::default()).unwrap(), None);
        let config = Config::default().store_empty_collection_as_nil(false);
        assert_eq!(
            dump(&empty, &set, &config).unwrap(),
            Some(AttributeValue::Ss(BTreeSet::new()))
        );

        let config = Config::default().store_nil_as_null(true);
        assert_eq!(
            dump(&Value::Null, &attribute, &config).unwrap(),
            Some(AttributeValue::Null)
        );
    }

    #[test]
    fn booleans_can_be_stored_as_strings() {
        let config = Config::default().store_boolean_as_native(false);
        let attribute = attribute(FieldType::Boolean);
        assert_eq!(
            dump(&Value::from(false), &attribute, &config).unwrap(),
            Some(AttributeValue::S("f".into()))
        );
        assert_eq!(round_trip(Value::from(true), FieldType::Boolean, &config), Value::from(true));
    }

    #[test]
    fn serialized_values_are_json_strings() {
        let config = Config::default();
        let value = Value::list([Value::from(1), Value::from("two")]);
        let attribute = attribute(FieldType::Serialized);
        assert_eq!(
            dump(&value, &attribute, &config).unwrap(),
            Some(AttributeValue::S("[1,\"two\"]".into()))
        );
        assert_eq!(round_trip(value.clone(), FieldType::Serialized, &config), value);
    }

    #[test]
    fn custom_types_delegate_to_registered_functions() {
        let money = crate::types::CustomType::new(
            "money",
            |value| match value {
                Value::Integer(cents) => Ok(AttributeValue::S(format!("{}c", cents))),
                other => Err(Error::mismatch("money", "cents", other)),
            },
            |value| match value {
                AttributeValue::S(s) => Ok(Value::Integer(
                    s.trim_end_matches('c').parse().unwrap_or_default(),
                )),
                other => Err(Error::mismatch("money", "cents", other)),
            },
        );
        let field_type = FieldType::Custom(std::sync::Arc::new(money));
        let config = Config::default();
        assert_eq!(round_trip(Value::from(250), field_type.clone(), &config), Value::from(250));
        assert!(dump(&Value::from("x"), &attribute(field_type), &config).is_err());
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let config = Config::default();
        assert!(matches!(
            dump(&Value::from(true), &attribute(FieldType::Integer), &config),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            dump(&Value::Number(f64::NAN), &attribute(FieldType::Number), &config),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn out_of_range_dates_are_mismatches() {
        let config = Config::default();
        let attribute = attribute(FieldType::Date);
        assert!(matches!(
            load(Some(&AttributeValue::N("9999999999999".into())), &attribute, &config),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            load(Some(&AttributeValue::N("-9999999999999".into())), &attribute, &config),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
