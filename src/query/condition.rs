//! Condition algebra
//!
//! Filter predicates as a closed sum type. Lists of conditions keep their
//! insertion order and are only de-duplicated when asked to.

use crate::schema::{EntityType, Schema, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[default]
    #[serde(rename = "=", alias = "==")]
    Equal,
    #[serde(rename = "!=", alias = "<>")]
    NotEqual,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "contains", alias = "like")]
    Contains,
    #[serde(rename = "ends_with")]
    EndsWith,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThanOrEqual => ">=",
            Operator::GreaterThan => ">",
            Operator::StartsWith => "starts_with",
            Operator::Contains => "contains",
            Operator::EndsWith => "ends_with",
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Operator::Equal | Operator::NotEqual)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Leaf comparison of a (dotted) field path against a literal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityType>,
}

impl Condition {
    /// Equality condition
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::Equal, value)
    }

    pub fn with_operator(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            entity: None,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::Equal, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::NotEqual, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::LessThan, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::LessThanOrEqual, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::GreaterThan, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with_operator(field, Operator::GreaterThanOrEqual, value)
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_operator(field, Operator::StartsWith, Value::Text(value.into()))
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_operator(field, Operator::Contains, Value::Text(value.into()))
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_operator(field, Operator::EndsWith, Value::Text(value.into()))
    }

    /// Scope the condition to an owning entity type
    pub fn on(mut self, entity: impl Into<EntityType>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

/// Operands of an AND/OR combinator; either side may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<BaseCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<BaseCondition>>,
}

impl BiCondition {
    pub fn new(left: BaseCondition, right: BaseCondition) -> Self {
        Self {
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Compares a field of one entity type with a field of another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCondition {
    pub left_entity: EntityType,
    pub left_field: String,
    #[serde(default)]
    pub operator: Operator,
    pub right_entity: EntityType,
    pub right_field: String,
}

impl FieldCondition {
    pub fn new(
        left_entity: impl Into<EntityType>,
        left_field: impl Into<String>,
        operator: Operator,
        right_entity: impl Into<EntityType>,
        right_field: impl Into<String>,
    ) -> Self {
        Self {
            left_entity: left_entity.into(),
            left_field: left_field.into(),
            operator,
            right_entity: right_entity.into(),
            right_field: right_field.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
    Any,
    All,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::LongCount => "long_count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Average => "average",
            AggregateFunction::Any => "any",
            AggregateFunction::All => "all",
        }
    }

    /// Any/All yield a boolean directly
    pub fn is_predicate(self) -> bool {
        matches!(self, AggregateFunction::Any | AggregateFunction::All)
    }

    /// Functions that select a member of each element
    pub fn takes_field(self) -> bool {
        matches!(
            self,
            AggregateFunction::Sum
                | AggregateFunction::Min
                | AggregateFunction::Max
                | AggregateFunction::Average
        )
    }

    pub fn requires_numeric(self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Average)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    pub operator: Operator,
    pub value: Value,
}

/// Aggregate predicate over a related collection or a join group.
///
/// `entity` is the element type of the group when `collection` is empty,
/// otherwise the type that owns the `collection` navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateCondition {
    pub function: AggregateFunction,
    pub entity: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

impl AggregateCondition {
    pub fn new(function: AggregateFunction, entity: impl Into<EntityType>) -> Self {
        Self {
            function,
            entity: entity.into(),
            collection: None,
            field: None,
            conditions: ConditionList::new(),
            comparison: None,
        }
    }

    pub fn any(entity: impl Into<EntityType>) -> Self {
        Self::new(AggregateFunction::Any, entity)
    }

    pub fn all(entity: impl Into<EntityType>) -> Self {
        Self::new(AggregateFunction::All, entity)
    }

    pub fn count(entity: impl Into<EntityType>) -> Self {
        Self::new(AggregateFunction::Count, entity)
    }

    pub fn long_count(entity: impl Into<EntityType>) -> Self {
        Self::new(AggregateFunction::LongCount, entity)
    }

    pub fn sum(entity: impl Into<EntityType>, field: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Sum, entity).selecting(field)
    }

    pub fn min(entity: impl Into<EntityType>, field: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Min, entity).selecting(field)
    }

    pub fn max(entity: impl Into<EntityType>, field: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Max, entity).selecting(field)
    }

    pub fn average(entity: impl Into<EntityType>, field: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Average, entity).selecting(field)
    }

    /// Aggregate over a collection navigation of `entity`
    pub fn over(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn selecting(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Nested conditions restricting the aggregated elements
    pub fn filtered(mut self, conditions: ConditionList) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn compared(mut self, operator: Operator, value: impl Into<Value>) -> Self {
        self.comparison = Some(Comparison {
            operator,
            value: value.into(),
        });
        self
    }
}

/// A filter predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaseCondition {
    Condition(Condition),
    And(BiCondition),
    Or(BiCondition),
    Bool { value: bool },
    Field(FieldCondition),
    Aggregate(AggregateCondition),
}

impl BaseCondition {
    /// AND over a list, folded right-associatively
    pub fn and(conditions: Vec<BaseCondition>) -> Self {
        Self::fold(conditions, BaseCondition::And)
    }

    /// OR over a list, folded right-associatively
    pub fn or(conditions: Vec<BaseCondition>) -> Self {
        Self::fold(conditions, BaseCondition::Or)
    }

    fn fold(conditions: Vec<BaseCondition>, combine: fn(BiCondition) -> BaseCondition) -> Self {
        let mut rest = conditions.into_iter();
        let Some(left) = rest.next() else {
            return combine(BiCondition::default());
        };
        let remaining: Vec<BaseCondition> = rest.collect();
        let right = match remaining.len() {
            0 => None,
            1 => remaining.into_iter().next().map(Box::new),
            _ => Some(Box::new(Self::fold(remaining, combine))),
        };
        combine(BiCondition {
            left: Some(Box::new(left)),
            right,
        })
    }

    /// Entity type the condition is scoped to, if any
    pub fn scope(&self) -> Option<&EntityType> {
        match self {
            BaseCondition::Condition(c) => c.entity.as_ref(),
            BaseCondition::And(bi) | BaseCondition::Or(bi) => bi
                .left
                .as_deref()
                .and_then(BaseCondition::scope)
                .or_else(|| bi.right.as_deref().and_then(BaseCondition::scope)),
            BaseCondition::Bool { .. } => None,
            BaseCondition::Field(f) => Some(&f.left_entity),
            BaseCondition::Aggregate(a) => Some(&a.entity),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, BaseCondition::Aggregate(_))
    }
}

impl From<Condition> for BaseCondition {
    fn from(condition: Condition) -> Self {
        BaseCondition::Condition(condition)
    }
}

impl From<FieldCondition> for BaseCondition {
    fn from(condition: FieldCondition) -> Self {
        BaseCondition::Field(condition)
    }
}

impl From<AggregateCondition> for BaseCondition {
    fn from(condition: AggregateCondition) -> Self {
        BaseCondition::Aggregate(condition)
    }
}

impl fmt::Display for BaseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseCondition::Condition(c) => {
                if let Some(entity) = &c.entity {
                    write!(f, "{}.", entity)?;
                }
                write!(f, "{} {} {}", c.field, c.operator, c.value)
            }
            BaseCondition::And(bi) => write_bi(f, bi, "and"),
            BaseCondition::Or(bi) => write_bi(f, bi, "or"),
            BaseCondition::Bool { value } => write!(f, "{}", value),
            BaseCondition::Field(c) => write!(
                f,
                "{}.{} {} {}.{}",
                c.left_entity, c.left_field, c.operator, c.right_entity, c.right_field
            ),
            BaseCondition::Aggregate(a) => {
                write!(f, "{}({}", a.function, a.entity)?;
                if let Some(collection) = &a.collection {
                    write!(f, ".{}", collection)?;
                }
                if let Some(field) = &a.field {
                    write!(f, " -> {}", field)?;
                }
                if !a.conditions.is_empty() {
                    let nested: Vec<String> = a.conditions.iter().map(|c| c.to_string()).collect();
                    write!(f, " where {}", nested.join(" and "))?;
                }
                write!(f, ")")?;
                if let Some(comparison) = &a.comparison {
                    write!(f, " {} {}", comparison.operator, comparison.value)?;
                }
                Ok(())
            }
        }
    }
}

fn write_bi(f: &mut fmt::Formatter<'_>, bi: &BiCondition, keyword: &str) -> fmt::Result {
    match (&bi.left, &bi.right) {
        (Some(left), Some(right)) => write!(f, "({} {} {})", left, keyword, right),
        (Some(side), None) | (None, Some(side)) => write!(f, "{}", side),
        (None, None) => write!(f, "({})", keyword),
    }
}

/// Order-preserving list of conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionList(Vec<BaseCondition>);

impl ConditionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: impl Into<BaseCondition>) {
        self.0.push(condition.into());
    }

    pub fn with(mut self, condition: impl Into<BaseCondition>) -> Self {
        self.push(condition);
        self
    }

    pub fn extend(&mut self, conditions: impl IntoIterator<Item = BaseCondition>) {
        self.0.extend(conditions);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BaseCondition> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BaseCondition] {
        &self.0
    }

    /// Removes later structural duplicates, keeping first occurrences in order
    pub fn remove_duplicates(&mut self) {
        let mut index = self.0.len();
        while index > 0 {
            index -= 1;
            if self.0[..index].contains(&self.0[index]) {
                self.0.remove(index);
            }
        }
    }

    pub fn deduplicated(&self) -> Self {
        let mut copy = self.clone();
        copy.remove_duplicates();
        copy
    }

    /// Non-aggregate conditions that apply to elements of `entity`
    pub fn element_type_conditions(&self, entity: &EntityType, schema: &Schema) -> Self {
        self.scoped_to(entity, schema, false)
    }

    /// Aggregate conditions that apply to elements of `entity`
    pub fn aggregate_conditions(&self, entity: &EntityType, schema: &Schema) -> Self {
        self.scoped_to(entity, schema, true)
    }

    fn scoped_to(&self, entity: &EntityType, schema: &Schema, aggregates: bool) -> Self {
        self.0
            .iter()
            .filter(|c| c.is_aggregate() == aggregates)
            .filter(|c| c.scope().is_some_and(|scope| schema.applies_to(entity, scope)))
            .cloned()
            .collect()
    }
}

impl FromIterator<BaseCondition> for ConditionList {
    fn from_iter<I: IntoIterator<Item = BaseCondition>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ConditionList {
    type Item = BaseCondition;
    type IntoIter = std::vec::IntoIter<BaseCondition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConditionList {
    type Item = &'a BaseCondition;
    type IntoIter = std::slice::Iter<'a, BaseCondition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<BaseCondition>> for ConditionList {
    fn from(conditions: Vec<BaseCondition>) -> Self {
        Self(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDef, ValueType};

    #[test]
    fn test_remove_duplicates_keeps_first_occurrence() {
        let mut list = ConditionList::new()
            .with(Condition::new("X", 1))
            .with(Condition::new("X", 1))
            .with(Condition::new("Y", 2));
        list.remove_duplicates();
        assert_eq!(
            list,
            ConditionList::new()
                .with(Condition::new("X", 1))
                .with(Condition::new("Y", 2))
        );
    }

    #[test]
    fn test_owning_type_distinguishes_duplicates() {
        let list = ConditionList::new()
            .with(Condition::new("X", 1).on("Order"))
            .with(Condition::new("X", 1));
        assert_eq!(list.deduplicated().len(), 2);
    }

    #[test]
    fn test_and_folds_right_associatively() {
        let a = BaseCondition::from(Condition::new("A", 1));
        let b = BaseCondition::from(Condition::new("B", 2));
        let c = BaseCondition::from(Condition::new("C", 3));
        let folded = BaseCondition::and(vec![a.clone(), b.clone(), c.clone()]);
        let expected = BaseCondition::And(BiCondition::new(
            a.clone(),
            BaseCondition::And(BiCondition::new(b, c)),
        ));
        assert_eq!(folded, expected);

        let single = BaseCondition::or(vec![a.clone()]);
        assert_eq!(
            single,
            BaseCondition::Or(BiCondition {
                left: Some(Box::new(a)),
                right: None
            })
        );
    }

    #[test]
    fn test_partitions_by_scope_and_interface() {
        let schema = Schema::new()
            .with_entity(
                EntityDef::new("Order")
                    .scalar("Deleted", ValueType::Bool)
                    .implements("SoftDelete"),
            )
            .with_entity(EntityDef::new("Customer"));
        let list = ConditionList::new()
            .with(Condition::new("Deleted", false).on("SoftDelete"))
            .with(Condition::new("Country", "Germany").on("Customer"))
            .with(AggregateCondition::count("Order").compared(Operator::GreaterThan, 1))
            .with(Condition::new("Unscoped", 1));

        let order = EntityType::new("Order");
        assert_eq!(list.element_type_conditions(&order, &schema).len(), 1);
        assert_eq!(list.aggregate_conditions(&order, &schema).len(), 1);
        let customer = EntityType::new("Customer");
        assert_eq!(list.element_type_conditions(&customer, &schema).len(), 1);
        assert!(list.aggregate_conditions(&customer, &schema).is_empty());
    }

    #[test]
    fn test_scope_of_combinator_uses_left_then_right() {
        let bi = BaseCondition::and(vec![
            Condition::new("A", 1).into(),
            Condition::new("B", 1).on("Customer").into(),
        ]);
        assert_eq!(bi.scope(), Some(&EntityType::new("Customer")));
    }

    #[test]
    fn test_conditions_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            conditions: ConditionList,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[conditions]]
            kind = "condition"
            field = "Country"
            operator = "="
            value = "Germany"
            entity = "Customer"

            [[conditions]]
            kind = "condition"
            field = "Name"
            operator = "like"
            value = "Al"
            "#,
        )
        .unwrap();
        let expected = ConditionList::new()
            .with(Condition::new("Country", "Germany").on("Customer"))
            .with(Condition::contains("Name", "Al"));
        assert_eq!(doc.conditions, expected);
    }

    #[test]
    fn test_display() {
        let cond = BaseCondition::from(Condition::gt("Freight", 10).on("Order"));
        assert_eq!(cond.to_string(), "Order.Freight > 10");
        let agg = BaseCondition::from(
            AggregateCondition::count("Product").compared(Operator::GreaterThan, 5),
        );
        assert_eq!(agg.to_string(), "count(Product) > 5");
    }
}
