//! Chooses between a query on the table, a query on a secondary index and a
//! full scan, and splits the criteria into key and filter conditions.
//!
//! Preference order:
//!
//! 1. a forced index, which must have an equality condition on its hash key
//! 2. the table, when its hash key is matched and its range key is usable
//!    (or it has no range key)
//! 3. a local index whose range key is usable
//! 4. a global index with both keys usable
//! 5. the table, matched on the hash key only
//! 6. a global index matched on the hash key only
//! 7. a scan
//!
//! Global indexes that don't project the needed attributes are skipped.
//! Ties go to the index declared first.

use crate::backend::{AttrCondition, Condition, KeyCondition};
use crate::criteria::{CriteriaNode, Operand, Operator};
use crate::schema::{IndexKind, ModelSchema, Projection, SecondaryIndex};
use crate::{Config, Criteria, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Query,
    Scan,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Limits {
    /// Documents returned to the caller.
    pub record_limit: Option<usize>,
    /// Items examined by the backend, across all requests.
    pub scan_limit: Option<usize>,
    /// Items examined per request.
    pub batch_size: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct PlanOptions<'a> {
    pub index: Option<&'a str>,
    /// Attributes the caller asked for; `None` means all of them.
    pub projection: Option<&'a [String]>,
    pub consistent_read: bool,
    pub limits: Limits,
    pub warn_on_scan: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    pub mode: Mode,
    /// `None` is the table itself.
    pub index: Option<String>,
    /// Hash key equality first, then at most one range key condition.
    pub key_conditions: Vec<CriteriaNode>,
    pub filter_conditions: Vec<CriteriaNode>,
    pub consistent_read: bool,
    pub limits: Limits,
}

impl QueryPlan {
    pub(crate) fn key_condition(
        &self,
        schema: &ModelSchema,
        config: &Config,
    ) -> Result<Option<KeyCondition>, Error> {
        let mut nodes = self.key_conditions.iter();
        let Some(hash) = nodes.next() else {
            return Ok(None);
        };
        let hash_condition = hash.condition(schema, config)?;
        let Condition::Attr(AttrCondition { values, .. }) = hash_condition else {
            return Ok(None);
        };
        let Some(hash_value) = values.into_iter().next() else {
            return Ok(None);
        };
        let range = match nodes.next() {
            Some(node) => match node.condition(schema, config)? {
                Condition::Attr(range) => Some(range),
                _ => None,
            },
            None => None,
        };
        Ok(Some(KeyCondition {
            hash_key: hash.attribute.clone(),
            hash_value,
            range,
        }))
    }

    pub(crate) fn filter(
        &self,
        schema: &ModelSchema,
        config: &Config,
    ) -> Result<Option<Condition>, Error> {
        let conditions = self
            .filter_conditions
            .iter()
            .map(|node| node.condition(schema, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Condition::all(conditions))
    }
}

enum RangeUsage {
    Unused,
    /// The key condition plus the nodes it makes redundant.
    Used(CriteriaNode, Vec<usize>),
}

/// How the criteria can constrain `range_key`. Equality wins; a lower and an
/// upper bound combine into an inclusive `between`, strict bounds staying on
/// as filters.
fn range_usage(nodes: &[CriteriaNode], range_key: &str) -> Result<RangeUsage, Error> {
    let candidates: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| {
            n.attribute == range_key && (n.operator == Operator::Eq || n.operator.is_range())
        })
        .map(|(i, _)| i)
        .collect();
    if let Some(&eq) = candidates
        .iter()
        .find(|&&i| nodes[i].operator == Operator::Eq)
    {
        return Ok(RangeUsage::Used(nodes[eq].clone(), vec![eq]));
    }
    match candidates.as_slice() {
        [] => Ok(RangeUsage::Unused),
        [single] => Ok(RangeUsage::Used(nodes[*single].clone(), vec![*single])),
        [a, b] => {
            let lower = |i: usize| matches!(nodes[i].operator, Operator::Gt | Operator::Gte);
            let upper = |i: usize| matches!(nodes[i].operator, Operator::Lt | Operator::Lte);
            let (low, high) = if lower(*a) && upper(*b) {
                (*a, *b)
            } else if lower(*b) && upper(*a) {
                (*b, *a)
            } else {
                return Err(Error::MultipleRangeConditions(range_key.to_string()));
            };
            let bound = |i: usize| match &nodes[i].operand {
                Operand::Single(value) => Ok(value.clone()),
                _ => Err(Error::MultipleRangeConditions(range_key.to_string())),
            };
            let between = CriteriaNode {
                attribute: range_key.to_string(),
                operator: Operator::Between,
                operand: Operand::Pair(bound(low)?, bound(high)?),
            };
            let covered = [low, high]
                .into_iter()
                .filter(|&i| matches!(nodes[i].operator, Operator::Gte | Operator::Lte))
                .collect();
            Ok(RangeUsage::Used(between, covered))
        }
        _ => Err(Error::MultipleRangeConditions(range_key.to_string())),
    }
}

fn hash_equality(nodes: &[CriteriaNode], hash_key: &str) -> Option<usize> {
    nodes.iter().position(|n| {
        n.attribute == hash_key
            && n.operator == Operator::Eq
            && matches!(&n.operand, Operand::Single(v) if !v.is_null())
    })
}

/// Whether a global index carries every attribute the plan needs.
fn projects(
    schema: &ModelSchema,
    index: &SecondaryIndex,
    nodes: &[CriteriaNode],
    projection: Option<&[String]>,
) -> bool {
    let included = |name: &str| {
        schema.is_key_attribute(name)
            || index.key_attributes().any(|key| key == name)
            || match &index.projection {
                Projection::All => true,
                Projection::KeysOnly => false,
                Projection::Include(names) => names.iter().any(|n| n == name),
            }
    };
    let requested = match projection {
        Some(projection) => projection.iter().all(|name| included(name)),
        None => index.projection == Projection::All,
    };
    requested && nodes.iter().all(|node| included(&node.attribute))
}

struct Candidate<'a> {
    index: Option<&'a SecondaryIndex>,
    hash: usize,
    range: RangeUsage,
}

pub fn plan(
    schema: &ModelSchema,
    criteria: &Criteria,
    options: &PlanOptions<'_>,
) -> Result<QueryPlan, Error> {
    let nodes = criteria.nodes();

    let candidate = if let Some(name) = options.index {
        let index = schema.index(name)?;
        let hash = hash_equality(nodes, &index.hash_key).ok_or_else(|| Error::IndexIncompatible {
            index: index.name.clone(),
            reason: format!("no equality condition on hash key {}", index.hash_key),
        })?;
        let range = match &index.range_key {
            Some(range_key) => range_usage(nodes, range_key)?,
            None => RangeUsage::Unused,
        };
        Some(Candidate {
            index: Some(index),
            hash,
            range,
        })
    } else {
        choose(schema, nodes, options.projection)?
    };

    let plan = match candidate {
        Some(candidate) => {
            let mut key_conditions = vec![nodes[candidate.hash].clone()];
            let mut used = vec![candidate.hash];
            if let RangeUsage::Used(node, covered) = candidate.range {
                key_conditions.push(node);
                used.extend(covered);
            }
            QueryPlan {
                mode: Mode::Query,
                index: candidate.index.map(|index| index.name.clone()),
                key_conditions,
                filter_conditions: nodes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !used.contains(i))
                    .map(|(_, n)| n.clone())
                    .collect(),
                consistent_read: options.consistent_read,
                limits: options.limits,
            }
        }
        None => {
            if options.warn_on_scan && !criteria.is_empty() {
                let attributes: Vec<&str> = nodes.iter().map(|n| n.attribute.as_str()).collect();
                log::warn!(
                    "Queries without an index are forced to use scan and are generally much slower than indexed queries! \
                     You can index this query by adding an index declaration to {}: {:?}",
                    schema.name,
                    attributes
                );
            }
            QueryPlan {
                mode: Mode::Scan,
                index: None,
                key_conditions: Vec::new(),
                filter_conditions: nodes.to_vec(),
                consistent_read: options.consistent_read,
                limits: options.limits,
            }
        }
    };
    log::debug!("planned {:?} on {} via {:?}", plan.mode, schema.name, plan.index);
    Ok(plan)
}

fn choose<'a>(
    schema: &'a ModelSchema,
    nodes: &[CriteriaNode],
    projection: Option<&[String]>,
) -> Result<Option<Candidate<'a>>, Error> {
    let table_hash = hash_equality(nodes, &schema.hash_key);

    if let Some(hash) = table_hash {
        let range = match &schema.range_key {
            Some(range_key) => range_usage(nodes, range_key)?,
            None => RangeUsage::Unused,
        };
        if schema.range_key.is_none() || matches!(range, RangeUsage::Used(..)) {
            return Ok(Some(Candidate {
                index: None,
                hash,
                range,
            }));
        }
        for index in schema.indexes.iter().filter(|i| i.kind == IndexKind::Local) {
            let Some(range_key) = &index.range_key else { continue };
            if let range @ RangeUsage::Used(..) = range_usage(nodes, range_key)? {
                return Ok(Some(Candidate {
                    index: Some(index),
                    hash,
                    range,
                }));
            }
        }
    }

    let globals = || {
        schema
            .indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Global)
            .filter(|i| projects(schema, i, nodes, projection))
            .filter_map(|i| hash_equality(nodes, &i.hash_key).map(|hash| (i, hash)))
    };
    for (index, hash) in globals() {
        let Some(range_key) = &index.range_key else { continue };
        if let range @ RangeUsage::Used(..) = range_usage(nodes, range_key)? {
            return Ok(Some(Candidate {
                index: Some(index),
                hash,
                range,
            }));
        }
    }

    if let Some(hash) = table_hash {
        return Ok(Some(Candidate {
            index: None,
            hash,
            range: RangeUsage::Unused,
        }));
    }

    Ok(globals().next().map(|(index, hash)| Candidate {
        index: Some(index),
        hash,
        range: RangeUsage::Unused,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, TypeRegistry};
    use crate::{Attributes, Value, attrs};
    use chrono::{TimeZone, Utc};

    fn schema() -> ModelSchema {
        ModelSchema::builder("Post")
            .hash_key("id", FieldType::String)
            .range_key("seq", FieldType::Integer)
            .field("type", FieldType::String)
            .field("author", FieldType::String)
            .field("rating", FieldType::Number)
            .field("body", FieldType::String)
            .index(
                SecondaryIndex::global("type")
                    .range_key("created_at")
                    .projection(Projection::All),
            )
            .index(SecondaryIndex::global("author").projection(Projection::All))
            .index(SecondaryIndex::local("rating"))
            .build(&TypeRegistry::default())
            .unwrap()
    }

    fn plan_for(pairs: Attributes) -> Result<QueryPlan, Error> {
        plan_with(pairs, PlanOptions::default())
    }

    fn plan_with(pairs: Attributes, options: PlanOptions<'_>) -> Result<QueryPlan, Error> {
        let schema = schema();
        let mut criteria = Criteria::default();
        for (token, value) in pairs {
            criteria.add(&schema, &Config::default(), &token, value)?;
        }
        plan(&schema, &criteria, &options)
    }

    fn attributes(nodes: &[CriteriaNode]) -> Vec<(&str, Operator)> {
        nodes
            .iter()
            .map(|n| (n.attribute.as_str(), n.operator))
            .collect()
    }

    #[test]
    fn table_key_match_queries_the_table() {
        let plan = plan_for(attrs! { "id" => "1", "seq.gt" => 3, "body" => "x" }).unwrap();
        assert_eq!(plan.mode, Mode::Query);
        assert_eq!(plan.index, None);
        assert_eq!(
            attributes(&plan.key_conditions),
            vec![("id", Operator::Eq), ("seq", Operator::Gt)]
        );
        assert_eq!(attributes(&plan.filter_conditions), vec![("body", Operator::Eq)]);
    }

    #[test]
    fn global_index_with_range_condition_beats_scan() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let plan = plan_for(attrs! { "type" => "Client", "created_at.gt" => created }).unwrap();
        assert_eq!(plan.mode, Mode::Query);
        assert_eq!(plan.index.as_deref(), Some("index_type_created_at"));
        assert!(plan.filter_conditions.is_empty());
    }

    #[test]
    fn local_index_serves_range_conditions_on_other_attributes() {
        let plan = plan_for(attrs! { "id" => "1", "rating.gte" => 4.5 }).unwrap();
        assert_eq!(plan.index.as_deref(), Some("index_rating"));
        assert_eq!(
            attributes(&plan.key_conditions),
            vec![("id", Operator::Eq), ("rating", Operator::Gte)]
        );
    }

    #[test]
    fn hash_only_match_prefers_table_then_global_index() {
        let plan = plan_for(attrs! { "id" => "1", "author" => "ann" }).unwrap();
        assert_eq!(plan.index, None);
        assert_eq!(attributes(&plan.filter_conditions), vec![("author", Operator::Eq)]);

        let plan = plan_for(attrs! { "author" => "ann", "body" => "x" }).unwrap();
        assert_eq!(plan.index.as_deref(), Some("index_author"));
    }

    #[test]
    fn global_indexes_must_project_requested_attributes() {
        let keys_only = ModelSchema::builder("Post")
            .hash_key("id", FieldType::String)
            .field("author", FieldType::String)
            .field("body", FieldType::String)
            .index(SecondaryIndex::global("author"))
            .build(&TypeRegistry::default())
            .unwrap();
        let mut criteria = Criteria::default();
        criteria
            .add(&keys_only, &Config::default(), "author", Value::from("ann"))
            .unwrap();

        let plan = plan(&keys_only, &criteria, &PlanOptions::default()).unwrap();
        assert_eq!(plan.mode, Mode::Scan);

        let projection = vec!["id".to_string(), "author".to_string()];
        let options = PlanOptions {
            projection: Some(&projection),
            ..Default::default()
        };
        let plan = super::plan(&keys_only, &criteria, &options).unwrap();
        assert_eq!(plan.index.as_deref(), Some("index_author"));
    }

    #[test]
    fn bounds_on_the_range_key_become_between() {
        let plan = plan_for(attrs! { "id" => "1", "seq.gt" => 1, "seq.lte" => 9 }).unwrap();
        assert_eq!(plan.mode, Mode::Query);
        assert_eq!(
            plan.key_conditions[1],
            CriteriaNode {
                attribute: "seq".into(),
                operator: Operator::Between,
                operand: Operand::Pair(Value::Integer(1), Value::Integer(9)),
            }
        );
        // the strict bound still filters out the lower endpoint
        assert_eq!(attributes(&plan.filter_conditions), vec![("seq", Operator::Gt)]);

        assert!(matches!(
            plan_for(attrs! { "id" => "1", "seq.gt" => 1, "seq.gte" => 2 }),
            Err(Error::MultipleRangeConditions(attribute)) if attribute == "seq"
        ));
    }

    #[test]
    fn range_conditions_on_non_key_attributes_scan() {
        let plan = plan_for(attrs! { "body.begins_with" => "a", "type.gt" => "b" }).unwrap();
        assert_eq!(plan.mode, Mode::Scan);
        assert_eq!(plan.filter_conditions.len(), 2);
    }

    #[test]
    fn forced_index_is_used_or_rejected() {
        let options = PlanOptions {
            index: Some("index_author"),
            ..Default::default()
        };
        let plan = plan_with(attrs! { "id" => "1", "author" => "ann" }, options.clone()).unwrap();
        assert_eq!(plan.index.as_deref(), Some("index_author"));
        assert_eq!(attributes(&plan.filter_conditions), vec![("id", Operator::Eq)]);

        assert!(matches!(
            plan_with(attrs! { "id" => "1" }, options),
            Err(Error::IndexIncompatible { .. })
        ));
        let unknown = PlanOptions {
            index: Some("nope"),
            ..Default::default()
        };
        assert!(matches!(
            plan_with(attrs! { "id" => "1" }, unknown),
            Err(Error::UnknownIndex { .. })
        ));
    }

    #[test]
    fn planning_is_deterministic() {
        let pairs = attrs! { "type" => "a", "author" => "b", "rating.lt" => 3 };
        assert_eq!(plan_for(pairs.clone()).unwrap(), plan_for(pairs).unwrap());
    }

    #[test]
    fn key_condition_is_dumped() {
        let schema = schema();
        let plan = plan_for(attrs! { "id" => "1", "seq.between" => vec![1, 2] }).unwrap();
        let key = plan
            .key_condition(&schema, &Config::default())
            .unwrap()
            .unwrap();
        assert_eq!(key.hash_key, "id");
        assert_eq!(key.hash_value, crate::AttributeValue::S("1".into()));
        assert_eq!(key.range.unwrap().values.len(), 2);
    }
}
