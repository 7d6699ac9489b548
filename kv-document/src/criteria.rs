//! Conjunctive conditions built from `attribute.operator` tokens.

use std::fmt;

use crate::backend::{Comparator, Condition};
use crate::dumping::{dump_element, dump_operand};
use crate::schema::{AttributeDef, ModelSchema};
use crate::types::FieldType;
use crate::{Config, Error, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    BeginsWith,
    Between,
    In,
    Contains,
    NotContains,
    Null,
    NotNull,
}

impl Operator {
    pub fn parse(suffix: &str) -> Result<Self, Error> {
        Ok(match suffix {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "lte" => Operator::Lte,
            "begins_with" => Operator::BeginsWith,
            "between" => Operator::Between,
            "in" => Operator::In,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "null" => Operator::Null,
            "not_null" => Operator::NotNull,
            other => return Err(Error::UnknownOperator(other.to_string())),
        })
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::BeginsWith => "begins_with",
            Operator::Between => "between",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Null => "null",
            Operator::NotNull => "not_null",
        }
    }

    /// Operators a sort key condition can use.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Gt
                | Operator::Lt
                | Operator::Gte
                | Operator::Lte
                | Operator::Between
                | Operator::BeginsWith
        )
    }

    pub(crate) fn comparator(&self) -> Comparator {
        match self {
            Operator::Eq => Comparator::Eq,
            Operator::Ne => Comparator::Ne,
            Operator::Gt => Comparator::Gt,
            Operator::Lt => Comparator::Lt,
            Operator::Gte => Comparator::Gte,
            Operator::Lte => Comparator::Lte,
            Operator::BeginsWith => Comparator::BeginsWith,
            Operator::Between => Comparator::Between,
            Operator::In => Comparator::In,
            Operator::Contains => Comparator::Contains,
            Operator::NotContains => Comparator::NotContains,
            Operator::Null => Comparator::NotExists,
            Operator::NotNull => Comparator::Exists,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Raw comparison values of one node, not yet dumped.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    Single(Value),
    Pair(Value, Value),
    Many(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CriteriaNode {
    pub attribute: String,
    pub operator: Operator,
    pub operand: Operand,
}

impl CriteriaNode {
    /// Parses `attribute[.operator]` and shapes `value` for the operator.
    pub fn parse(token: &str, value: Value) -> Result<Self, Error> {
        let (attribute, mut operator) = match token.rsplit_once('.') {
            Some((attribute, suffix)) => (attribute, Operator::parse(suffix)?),
            None => (token, Operator::Eq),
        };
        let operand = match operator {
            Operator::Null | Operator::NotNull => {
                // `attr.null => false` asks for the attribute to be present
                if value.as_bool() == Some(false) {
                    operator = match operator {
                        Operator::Null => Operator::NotNull,
                        _ => Operator::Null,
                    };
                }
                Operand::None
            }
            Operator::Eq | Operator::Ne if value.is_null() => {
                operator = match operator {
                    Operator::Eq => Operator::Null,
                    _ => Operator::NotNull,
                };
                Operand::None
            }
            Operator::Between => match value {
                Value::List(values) => match <[Value; 2]>::try_from(values) {
                    Ok([low, high]) => Operand::Pair(low, high),
                    Err(values) => {
                        return Err(Error::mismatch(attribute, "a pair of bounds", values));
                    }
                },
                other => return Err(Error::mismatch(attribute, "a pair of bounds", other)),
            },
            Operator::In => match value {
                Value::List(values) => Operand::Many(values),
                Value::Set(values) => Operand::Many(values.into_iter().collect()),
                other => Operand::Many(vec![other]),
            },
            _ => Operand::Single(value),
        };
        Ok(CriteriaNode {
            attribute: attribute.to_string(),
            operator,
            operand,
        })
    }

    pub(crate) fn condition(&self, schema: &ModelSchema, config: &Config) -> Result<Condition, Error> {
        let fallback;
        let attribute = match schema.attribute(&self.attribute) {
            Some(attribute) => attribute,
            None => {
                fallback = AttributeDef::new(self.attribute.clone(), FieldType::Raw);
                &fallback
            }
        };
        let operand = |value: &Value| match self.operator {
            Operator::Contains | Operator::NotContains => dump_element(value, attribute, config),
            _ => dump_operand(value, attribute, config),
        };
        let values = match &self.operand {
            Operand::None => Vec::new(),
            Operand::Single(value) => vec![operand(value)?],
            Operand::Pair(low, high) => vec![operand(low)?, operand(high)?],
            Operand::Many(values) => values.iter().map(operand).collect::<Result<_, _>>()?,
        };
        Ok(Condition::attr(
            self.attribute.clone(),
            self.operator.comparator(),
            values,
        ))
    }
}

/// An AND-only set of criteria nodes, in the order they were first given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Criteria {
    nodes: Vec<CriteriaNode>,
}

impl Criteria {
    pub fn nodes(&self) -> &[CriteriaNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node; a node with the same attribute and operator is replaced.
    pub fn add(
        &mut self,
        schema: &ModelSchema,
        config: &Config,
        token: &str,
        value: Value,
    ) -> Result<(), Error> {
        let node = CriteriaNode::parse(token, value)?;
        if !schema.has_attribute(&node.attribute) {
            if config.raise_on_unknown_attribute {
                return Err(Error::UnknownAttribute {
                    model: schema.name.clone(),
                    attribute: node.attribute,
                });
            }
            log::warn!(
                "where conditions reference unknown attribute {} of {}",
                node.attribute,
                schema.name
            );
        }
        match self
            .nodes
            .iter_mut()
            .find(|n| n.attribute == node.attribute && n.operator == node.operator)
        {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
        Ok(())
    }

    pub(crate) fn conditions(
        &self,
        schema: &ModelSchema,
        config: &Config,
    ) -> Result<Vec<Condition>, Error> {
        self.nodes
            .iter()
            .map(|node| node.condition(schema, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;
    use crate::{AttributeValue, attrs};

    fn schema() -> ModelSchema {
        ModelSchema::builder("User")
            .hash_key("id", FieldType::String)
            .field("age", FieldType::Integer)
            .field("name", FieldType::String)
            .field("tags", FieldType::set_of(FieldType::String))
            .build(&TypeRegistry::default())
            .unwrap()
    }

    fn criteria(pairs: crate::Attributes) -> Result<Criteria, Error> {
        let mut criteria = Criteria::default();
        for (token, value) in pairs {
            criteria.add(&schema(), &Config::default(), &token, value)?;
        }
        Ok(criteria)
    }

    #[test]
    fn same_operator_overwrites_and_different_operators_accumulate() {
        let mut c = criteria(attrs! { "age.gt" => 1, "age.lt" => 9 }).unwrap();
        c.add(&schema(), &Config::default(), "age.gt", Value::from(5))
            .unwrap();
        assert_eq!(c.nodes().len(), 2);
        assert_eq!(c.nodes()[0].operand, Operand::Single(Value::Integer(5)));
    }

    #[test]
    fn parses_operator_shapes() {
        let c = criteria(attrs! {
            "age.between" => vec![1, 5],
            "name.in" => vec!["a", "b"],
            "tags.null" => false,
            "id" => Value::Null,
        })
        .unwrap();
        let by_attribute = |a: &str| c.nodes().iter().find(|n| n.attribute == a).unwrap();
        assert_eq!(
            by_attribute("age").operand,
            Operand::Pair(Value::Integer(1), Value::Integer(5))
        );
        assert_eq!(by_attribute("name").operator, Operator::In);
        assert_eq!(by_attribute("tags").operator, Operator::NotNull);
        assert_eq!(by_attribute("id").operator, Operator::Null);

        assert!(matches!(
            criteria(attrs! { "age.between" => 1 }),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            criteria(attrs! { "age.near" => 1 }),
            Err(Error::UnknownOperator(op)) if op == "near"
        ));
    }

    #[test]
    fn unknown_attributes_fail_unless_configured_to_warn() {
        assert!(matches!(
            criteria(attrs! { "nickname" => "x" }),
            Err(Error::UnknownAttribute { attribute, .. }) if attribute == "nickname"
        ));
        let config = Config::default().raise_on_unknown_attribute(false);
        let mut c = Criteria::default();
        c.add(&schema(), &config, "nickname", Value::from("x")).unwrap();
        let conditions = c.conditions(&schema(), &config).unwrap();
        assert_eq!(
            conditions,
            vec![Condition::eq("nickname", AttributeValue::S("x".into()))]
        );
    }

    #[test]
    fn contains_dumps_the_element_type() {
        let c = criteria(attrs! { "tags.contains" => "rust", "age.gte" => 3 }).unwrap();
        let conditions = c.conditions(&schema(), &Config::default()).unwrap();
        assert_eq!(
            conditions[0],
            Condition::attr("tags", Comparator::Contains, vec![AttributeValue::S("rust".into())])
        );
        assert_eq!(
            conditions[1],
            Condition::attr("age", Comparator::Gte, vec![AttributeValue::N("3".into())])
        );
    }
}
