//! Condition evaluation and update application over stored items, shared by
//! every backend that evaluates expressions itself.

use std::cmp::Ordering;

use crate::backend::{
    AttrCondition, BackendResult, Comparator, Condition, IndexDescription, KeyAttribute,
    KeyCondition, ScanRequest, TableDescription, UpdateAction,
};
use crate::error::BackendError;
use crate::schema::{IndexKind, Projection};
use crate::{AttributeValue, Item};

/// Orders two scalars of the same primitive type; `None` when incomparable.
pub fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => compare_numbers(a, b),
        _ => None,
    }
}

fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(a), Ok(b)) => Some(a.cmp(&b)),
        _ => {
            let a = a.parse::<f64>().ok()?;
            let b = b.parse::<f64>().ok()?;
            a.partial_cmp(&b)
        }
    }
}

fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn contains(haystack: &AttributeValue, needle: &AttributeValue) -> bool {
    match (haystack, needle) {
        (AttributeValue::S(s), AttributeValue::S(sub)) => s.contains(sub.as_str()),
        (AttributeValue::B(b), AttributeValue::B(sub)) => {
            sub.is_empty() || b.windows(sub.len()).any(|w| w == sub.as_slice())
        }
        (AttributeValue::Ss(set), AttributeValue::S(s)) => set.contains(s),
        (AttributeValue::Ns(set), AttributeValue::N(n)) => {
            set.iter().any(|m| compare_numbers(m, n) == Some(Ordering::Equal))
        }
        (AttributeValue::Bs(set), AttributeValue::B(b)) => set.contains(b),
        (AttributeValue::L(items), needle) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

fn evaluate_attr(condition: &AttrCondition, item: &Item) -> bool {
    let actual = item.get(&condition.attribute);
    let first = condition.values.first();
    match condition.comparator {
        Comparator::Exists => actual.is_some(),
        Comparator::NotExists => actual.is_none(),
        Comparator::Ne => match (actual, first) {
            (Some(actual), Some(expected)) => !values_equal(actual, expected),
            _ => true,
        },
        Comparator::NotContains => match (actual, first) {
            (Some(actual), Some(needle)) => !contains(actual, needle),
            _ => true,
        },
        _ => {
            let Some(actual) = actual else {
                return false;
            };
            let ordering = |expected: Option<&AttributeValue>| {
                expected.and_then(|expected| compare(actual, expected))
            };
            match condition.comparator {
                Comparator::Eq => first.is_some_and(|expected| values_equal(actual, expected)),
                Comparator::Lt => ordering(first) == Some(Ordering::Less),
                Comparator::Lte => matches!(ordering(first), Some(Ordering::Less | Ordering::Equal)),
                Comparator::Gt => ordering(first) == Some(Ordering::Greater),
                Comparator::Gte => {
                    matches!(ordering(first), Some(Ordering::Greater | Ordering::Equal))
                }
                Comparator::Between => {
                    matches!(ordering(first), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(
                            ordering(condition.values.get(1)),
                            Some(Ordering::Less | Ordering::Equal)
                        )
                }
                Comparator::BeginsWith => match (actual, first) {
                    (AttributeValue::S(s), Some(AttributeValue::S(prefix))) => {
                        s.starts_with(prefix.as_str())
                    }
                    (AttributeValue::B(b), Some(AttributeValue::B(prefix))) => {
                        b.starts_with(prefix)
                    }
                    _ => false,
                },
                Comparator::In => condition
                    .values
                    .iter()
                    .any(|expected| values_equal(actual, expected)),
                Comparator::Contains => first.is_some_and(|needle| contains(actual, needle)),
                Comparator::Exists
                | Comparator::NotExists
                | Comparator::Ne
                | Comparator::NotContains => unreachable!(),
            }
        }
    }
}

/// Evaluates a condition against an item; a missing item is an empty map.
pub fn evaluate(condition: &Condition, item: &Item) -> bool {
    match condition {
        Condition::Attr(attr) => evaluate_attr(attr, item),
        Condition::And(conditions) => conditions.iter().all(|c| evaluate(c, item)),
        Condition::Or(conditions) => conditions.iter().any(|c| evaluate(c, item)),
        Condition::Not(condition) => !evaluate(condition, item),
    }
}

pub(crate) fn check(condition: Option<&Condition>, item: Option<&Item>) -> BackendResult<()> {
    let empty = Item::new();
    match condition {
        Some(condition) if !evaluate(condition, item.unwrap_or(&empty)) => {
            Err(BackendError::ConditionalCheckFailed)
        }
        _ => Ok(()),
    }
}

pub(crate) fn matches_key_condition(key_condition: &KeyCondition, item: &Item) -> bool {
    let hash_matches = item
        .get(&key_condition.hash_key)
        .is_some_and(|value| values_equal(value, &key_condition.hash_value));
    hash_matches
        && key_condition
            .range
            .as_ref()
            .is_none_or(|range| evaluate_attr(range, item))
}

fn add_numbers(a: &str, b: &str) -> BackendResult<String> {
    if let (Ok(a), Ok(b)) = (a.parse::<i128>(), b.parse::<i128>()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(sum.to_string());
        }
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(a), Ok(b)) => Ok((a + b).to_string()),
        _ => Err(BackendError::Validation(format!(
            "cannot add {} and {}",
            a, b
        ))),
    }
}

fn union(current: Option<AttributeValue>, value: AttributeValue) -> BackendResult<AttributeValue> {
    Ok(match (current, value) {
        (None, value) => value,
        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => AttributeValue::N(add_numbers(&a, &b)?),
        (Some(AttributeValue::Ss(mut a)), AttributeValue::Ss(b)) => {
            a.extend(b);
            AttributeValue::Ss(a)
        }
        (Some(AttributeValue::Ns(mut a)), AttributeValue::Ns(b)) => {
            a.extend(b);
            AttributeValue::Ns(a)
        }
        (Some(AttributeValue::Bs(mut a)), AttributeValue::Bs(b)) => {
            a.extend(b);
            AttributeValue::Bs(a)
        }
        (Some(current), value) => {
            return Err(BackendError::Validation(format!(
                "ADD of {:?} to {:?}",
                value, current
            )));
        }
    })
}

fn difference(
    current: Option<AttributeValue>,
    value: AttributeValue,
) -> BackendResult<Option<AttributeValue>> {
    let remaining = match (current, value) {
        (None, _) => return Ok(None),
        (Some(AttributeValue::Ss(mut a)), AttributeValue::Ss(b)) => {
            a.retain(|s| !b.contains(s));
            (!a.is_empty()).then_some(AttributeValue::Ss(a))
        }
        (Some(AttributeValue::Ns(mut a)), AttributeValue::Ns(b)) => {
            a.retain(|n| !b.contains(n));
            (!a.is_empty()).then_some(AttributeValue::Ns(a))
        }
        (Some(AttributeValue::Bs(mut a)), AttributeValue::Bs(b)) => {
            a.retain(|x| !b.contains(x));
            (!a.is_empty()).then_some(AttributeValue::Bs(a))
        }
        (Some(current), value) => {
            return Err(BackendError::Validation(format!(
                "DELETE of {:?} from {:?}",
                value, current
            )));
        }
    };
    Ok(remaining)
}

/// Applies update actions in order. Key attributes can't be modified.
pub(crate) fn apply_update(
    description: &TableDescription,
    item: &mut Item,
    actions: &[UpdateAction],
) -> BackendResult<()> {
    let is_key = |name: &str| {
        description.hash_key.name == name
            || description.range_key.as_ref().is_some_and(|r| r.name == name)
    };
    for action in actions {
        let name = match action {
            UpdateAction::Set(name, _)
            | UpdateAction::Remove(name)
            | UpdateAction::Add(name, _)
            | UpdateAction::Delete(name, _) => name,
        };
        if is_key(name) {
            return Err(BackendError::Validation(format!(
                "cannot update key attribute {}",
                name
            )));
        }
        match action {
            UpdateAction::Set(name, value) => {
                item.insert(name.clone(), value.clone());
            }
            UpdateAction::Remove(name) => {
                item.remove(name);
            }
            UpdateAction::Add(name, value) => {
                let updated = union(item.remove(name), value.clone())?;
                item.insert(name.clone(), updated);
            }
            UpdateAction::Delete(name, value) => {
                if let Some(remaining) = difference(item.remove(name), value.clone())? {
                    item.insert(name.clone(), remaining);
                }
            }
        }
    }
    Ok(())
}

/// Checks that `key` carries exactly the table's key attributes with the declared types.
pub(crate) fn validate_key(description: &TableDescription, key: &Item) -> BackendResult<()> {
    let expected = 1 + usize::from(description.range_key.is_some());
    if key.len() != expected {
        return Err(BackendError::Validation(format!(
            "the provided key does not match the schema of {}",
            description.name
        )));
    }
    validate_key_attributes(description, key)
}

pub(crate) fn validate_key_attributes(
    description: &TableDescription,
    item: &Item,
) -> BackendResult<()> {
    for attribute in std::iter::once(&description.hash_key).chain(description.range_key.as_ref()) {
        let value = item.get(&attribute.name).ok_or_else(|| {
            BackendError::Validation(format!("missing key attribute {}", attribute.name))
        })?;
        let valid = matches!(
            (attribute.kind, value),
            (crate::types::KeyKind::String, AttributeValue::S(_))
                | (crate::types::KeyKind::Number, AttributeValue::N(_))
                | (crate::types::KeyKind::Binary, AttributeValue::B(_))
        );
        if !valid {
            return Err(BackendError::Validation(format!(
                "type mismatch for key attribute {}",
                attribute.name
            )));
        }
    }
    Ok(())
}

/// Restricts an item to what a global index projects and then to the
/// requested attributes. Local indexes read the rest from the table.
pub(crate) fn project(
    description: &TableDescription,
    index: Option<&IndexDescription>,
    mut item: Item,
    projection: Option<&[String]>,
) -> Item {
    if let Some(index) = index.filter(|index| index.kind == IndexKind::Global) {
        let keep = |name: &str| {
            description.hash_key.name == name
                || description.range_key.as_ref().is_some_and(|r| r.name == name)
                || index.hash_key.name == name
                || index.range_key.as_ref().is_some_and(|r| r.name == name)
                || match &index.projection {
                    Projection::All => true,
                    Projection::KeysOnly => false,
                    Projection::Include(names) => names.iter().any(|n| n == name),
                }
        };
        item.retain(|name, _| keep(name));
    }
    if let Some(projection) = projection {
        item.retain(|name, _| projection.iter().any(|p| p == name));
    }
    item
}

/// Index named by a read request. Global indexes only serve eventually consistent reads.
pub(crate) fn resolve_index<'a>(
    description: &'a TableDescription,
    request: &ScanRequest,
) -> BackendResult<Option<&'a IndexDescription>> {
    let index = request
        .index
        .as_deref()
        .map(|name| description.index(name))
        .transpose()?;
    if request.consistent_read && index.is_some_and(|i| i.kind == IndexKind::Global) {
        return Err(BackendError::Validation(
            "consistent reads are not supported on global secondary indexes".into(),
        ));
    }
    Ok(index)
}

/// Attributes ordering entries: index keys first, then the table's primary key.
pub(crate) fn key_attributes<'a>(
    description: &'a TableDescription,
    index: Option<&'a IndexDescription>,
) -> Vec<&'a KeyAttribute> {
    let mut attributes: Vec<&KeyAttribute> = Vec::new();
    if let Some(index) = index {
        attributes.push(&index.hash_key);
        attributes.extend(index.range_key.as_ref());
    }
    attributes.push(&description.hash_key);
    attributes.extend(description.range_key.as_ref());
    attributes
}

/// Key attributes identifying an item's position in the table or index.
pub(crate) fn position_key(
    description: &TableDescription,
    index: Option<&IndexDescription>,
    item: &Item,
) -> Item {
    let mut key = Item::new();
    for attribute in key_attributes(description, index) {
        if let Some(value) = item.get(&attribute.name) {
            key.insert(attribute.name.clone(), value.clone());
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyKind;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_string())
    }

    fn item() -> Item {
        Item::from([
            ("id".to_string(), s("1")),
            ("age".to_string(), n("21")),
            ("name".to_string(), s("Alex")),
            (
                "tags".to_string(),
                AttributeValue::Ss(["a".to_string(), "b".to_string()].into()),
            ),
        ])
    }

    fn description() -> TableDescription {
        TableDescription {
            name: "users".into(),
            hash_key: KeyAttribute {
                name: "id".into(),
                kind: KeyKind::String,
            },
            range_key: None,
            indexes: Vec::new(),
            ttl_attribute: None,
            capacity: None,
            item_count: 0,
        }
    }

    #[test]
    fn evaluates_comparisons() {
        let item = item();
        let cases = vec![
            (Condition::eq("name", s("Alex")), true),
            (Condition::attr("age", Comparator::Gt, vec![n("20.5")]), true),
            (Condition::attr("age", Comparator::Lt, vec![n("3")]), false),
            (
                Condition::attr("age", Comparator::Between, vec![n("21"), n("30")]),
                true,
            ),
            (Condition::attr("name", Comparator::BeginsWith, vec![s("Al")]), true),
            (Condition::attr("name", Comparator::In, vec![s("Bob"), s("Alex")]), true),
            (Condition::attr("tags", Comparator::Contains, vec![s("b")]), true),
            (Condition::attr("tags", Comparator::NotContains, vec![s("c")]), true),
            (Condition::attr("missing", Comparator::Ne, vec![s("x")]), true),
            (Condition::attr("missing", Comparator::Gt, vec![n("0")]), false),
            (Condition::exists("id"), true),
            (Condition::not_exists("id"), false),
            (
                Condition::Or(vec![Condition::not_exists("id"), Condition::eq("age", n("21.0"))]),
                true,
            ),
        ];
        for (condition, expected) in cases {
            assert_eq!(evaluate(&condition, &item), expected, "{:?}", condition);
        }
    }

    #[test]
    fn applies_updates() {
        let mut item = item();
        apply_update(
            &description(),
            &mut item,
            &[
                UpdateAction::Add("age".into(), n("1")),
                UpdateAction::Add("count".into(), n("-2")),
                UpdateAction::Delete(
                    "tags".into(),
                    AttributeValue::Ss(["a".to_string(), "b".to_string()].into()),
                ),
                UpdateAction::Set("name".into(), s("Bob")),
                UpdateAction::Remove("missing".into()),
            ],
        )
        .unwrap();
        assert_eq!(item["age"], n("22"));
        assert_eq!(item["count"], n("-2"));
        assert_eq!(item["name"], s("Bob"));
        assert!(!item.contains_key("tags"));

        let error = apply_update(
            &description(),
            &mut item,
            &[UpdateAction::Set("id".into(), s("2"))],
        )
        .unwrap_err();
        assert!(matches!(error, BackendError::Validation(_)));
    }

    #[test]
    fn huge_counters_add_without_overflow() {
        let big = "99999999999999999999999999999999999999";
        let mut item = Item::from([("id".to_string(), s("1")), ("count".to_string(), n(big))]);
        apply_update(
            &description(),
            &mut item,
            &[UpdateAction::Add("count".into(), n(big))],
        )
        .unwrap();
        match &item["count"] {
            AttributeValue::N(sum) => assert_eq!(sum.parse::<f64>().unwrap(), 2e38),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn failed_checks_report_conditional_failure() {
        let condition = Condition::exists("id");
        assert!(check(Some(&condition), None).is_err_and(|e| e.is_conditional_check_failed()));
        assert!(check(Some(&condition), Some(&item())).is_ok());
        assert!(check(None, None).is_ok());
    }
}
