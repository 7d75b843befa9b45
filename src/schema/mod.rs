//! Schema introspection: entity definitions, members, associations and records

pub mod value;

pub use value::{Value, ValueType, parse_datetime};

use crate::error::{QueryError, QueryResult};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Name-based identifier of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Deterministic identity hash (FNV-1a over the name)
    pub fn type_key(&self) -> u32 {
        self.0.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
        })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

static NULL: Value = Value::Null;

/// A single entity instance: member name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Missing members read as null
    pub fn get(&self, name: &str) -> &Value {
        self.0.get(name).unwrap_or(&NULL)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Navigation between two entity types through a key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub target: EntityType,
    /// Key on the declaring entity
    pub this_key: String,
    /// Key on the target entity
    pub other_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberKind {
    Scalar {
        #[serde(rename = "type")]
        value_type: ValueType,
    },
    Reference(Relation),
    Collection(Relation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    #[serde(flatten)]
    pub kind: MemberKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Member {
    pub fn value_type(&self) -> Option<ValueType> {
        match &self.kind {
            MemberKind::Scalar { value_type } => Some(*value_type),
            _ => None,
        }
    }

    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind {
            MemberKind::Reference(relation) | MemberKind::Collection(relation) => Some(relation),
            MemberKind::Scalar { .. } => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, MemberKind::Collection(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, MemberKind::Reference(_))
    }
}

/// Definition of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: EntityType,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl EntityDef {
    pub fn new(name: impl Into<EntityType>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn scalar(mut self, name: &str, value_type: ValueType) -> Self {
        self.members.push(Member {
            name: name.to_string(),
            kind: MemberKind::Scalar { value_type },
            nullable: true,
        });
        self
    }

    pub fn reference(mut self, name: &str, target: &str, this_key: &str, other_key: &str) -> Self {
        self.members.push(Member {
            name: name.to_string(),
            kind: MemberKind::Reference(Relation {
                target: EntityType::new(target),
                this_key: this_key.to_string(),
                other_key: other_key.to_string(),
            }),
            nullable: true,
        });
        self
    }

    pub fn collection(mut self, name: &str, target: &str, this_key: &str, other_key: &str) -> Self {
        self.members.push(Member {
            name: name.to_string(),
            kind: MemberKind::Collection(Relation {
                target: EntityType::new(target),
                this_key: this_key.to_string(),
                other_key: other_key.to_string(),
            }),
            nullable: false,
        });
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    fn relations(&self) -> impl Iterator<Item = (&Member, &Relation)> {
        self.members
            .iter()
            .filter_map(|m| m.relation().map(|relation| (m, relation)))
    }
}

/// How many inner elements correspond to one outer element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// An association oriented from the outer (parent) entity's perspective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub property: String,
    pub cardinality: Cardinality,
    pub outer_key: String,
    pub inner_key: String,
}

impl Association {
    fn declared_on_outer(member: &Member, relation: &Relation) -> Self {
        Self {
            property: member.name.clone(),
            cardinality: if member.is_collection() {
                Cardinality::Many
            } else {
                Cardinality::One
            },
            outer_key: relation.this_key.clone(),
            inner_key: relation.other_key.clone(),
        }
    }

    fn declared_on_inner(member: &Member, relation: &Relation) -> Self {
        Self {
            property: member.name.clone(),
            cardinality: if member.is_collection() {
                Cardinality::One
            } else {
                Cardinality::Many
            },
            outer_key: relation.other_key.clone(),
            inner_key: relation.this_key.clone(),
        }
    }
}

/// Set of entity definitions queries are resolved against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.add_entity(entity);
        self
    }

    /// Adds or replaces the definition with the same name
    pub fn add_entity(&mut self, entity: EntityDef) {
        match self.entities.iter_mut().find(|e| e.name == entity.name) {
            Some(existing) => *existing = entity,
            None => self.entities.push(entity),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn contains(&self, entity: &EntityType) -> bool {
        self.entities.iter().any(|e| &e.name == entity)
    }

    pub fn entity(&self, entity: &EntityType) -> QueryResult<&EntityDef> {
        self.entities
            .iter()
            .find(|e| &e.name == entity)
            .ok_or_else(|| QueryError::entity_not_found(entity.name()))
    }

    pub fn member_info(&self, entity: &EntityType, name: &str) -> QueryResult<&Member> {
        let def = self.entity(entity)?;
        def.member(name).ok_or_else(|| {
            QueryError::member_not_found(entity.name(), name, Self::closest_member(def, name))
        })
    }

    /// Scalar type of a member; navigation members have none
    pub fn member_type(&self, entity: &EntityType, name: &str) -> QueryResult<ValueType> {
        let member = self.member_info(entity, name)?;
        member.value_type().ok_or_else(|| QueryError::Resolution {
            message: format!(
                "member '{}' on entity '{}' is a navigation, not a scalar",
                name, entity
            ),
            entity: Some(entity.name().to_string()),
            member: Some(name.to_string()),
        })
    }

    pub fn is_implementing_interface(&self, entity: &EntityType, interface: &str) -> bool {
        self.entity(entity)
            .map(|def| def.interfaces.iter().any(|i| i == interface))
            .unwrap_or(false)
    }

    /// Whether a condition scoped to `scope` applies to elements of `entity`
    pub fn applies_to(&self, entity: &EntityType, scope: &EntityType) -> bool {
        entity == scope || self.is_implementing_interface(entity, scope.name())
    }

    /// Closest member name for "did you mean" hints
    pub fn suggest(&self, entity: &EntityType, name: &str) -> Option<String> {
        self.entity(entity)
            .ok()
            .and_then(|def| Self::closest_member(def, name))
    }

    fn closest_member(def: &EntityDef, name: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default().ignore_case();
        def.members
            .iter()
            .filter_map(|m| {
                matcher
                    .fuzzy_match(&m.name, name)
                    .or_else(|| matcher.fuzzy_match(name, &m.name))
                    .map(|score| (score, &m.name))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, member)| member.clone())
    }

    /// Navigation member on `source` leading to `target`.
    ///
    /// A member named after the target type wins over the first relation
    /// targeting it.
    pub fn relation_to(&self, source: &EntityType, target: &EntityType) -> Option<&Member> {
        let def = self.entity(source).ok()?;
        def.relations()
            .find(|(m, r)| m.name == target.name() && &r.target == target)
            .or_else(|| def.relations().find(|(_, r)| &r.target == target))
            .map(|(member, _)| member)
    }

    pub fn find_association(
        &self,
        outer: &EntityType,
        inner: &EntityType,
        property_hint: Option<&str>,
    ) -> QueryResult<Association> {
        let outer_def = self.entity(outer)?;
        let inner_def = self.entity(inner)?;

        if let Some(hint) = property_hint.filter(|h| !h.is_empty()) {
            if let Some((member, relation)) = outer_def.relations().find(|(m, _)| m.name == hint) {
                if &relation.target != inner {
                    return Err(QueryError::resolution(format!(
                        "property '{}' on '{}' targets '{}', not '{}'",
                        hint, outer, relation.target, inner
                    )));
                }
                trace!("association {}.{} resolved from hint", outer, hint);
                return Ok(Association::declared_on_outer(member, relation));
            }
            if let Some((member, relation)) = inner_def.relations().find(|(m, _)| m.name == hint) {
                if &relation.target != outer {
                    return Err(QueryError::resolution(format!(
                        "property '{}' on '{}' targets '{}', not '{}'",
                        hint, inner, relation.target, outer
                    )));
                }
                trace!("association {}.{} resolved from hint", inner, hint);
                return Ok(Association::declared_on_inner(member, relation));
            }
            debug!(
                "hint '{}' matches no navigation between {} and {}, searching by type",
                hint, outer, inner
            );
        }

        if let Some((member, relation)) = outer_def.relations().find(|(_, r)| &r.target == inner) {
            return Ok(Association::declared_on_outer(member, relation));
        }
        if let Some((member, relation)) = inner_def.relations().find(|(_, r)| &r.target == outer) {
            return Ok(Association::declared_on_inner(member, relation));
        }

        Err(QueryError::Resolution {
            message: format!("no association between '{}' and '{}'", outer, inner),
            entity: Some(outer.name().to_string()),
            member: property_hint.map(str::to_string),
        })
    }

    /// Converts every scalar value of a record to its declared member type
    pub fn coerce_record(&self, entity: &EntityType, record: Record) -> QueryResult<Record> {
        let def = self.entity(entity)?;
        let mut coerced = Record::new();
        for (name, value) in record.0 {
            let Some(value_type) = def.member(&name).and_then(Member::value_type) else {
                trace!("keeping undeclared member {}.{} as-is", entity, name);
                coerced.set(name, value);
                continue;
            };
            let converted = value.convert(value_type).ok_or_else(|| {
                QueryError::argument(format!(
                    "value {} of {}.{} cannot be converted to {}",
                    value, entity, name, value_type
                ))
            })?;
            coerced.set(name, converted);
        }
        Ok(coerced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                EntityDef::new("Order")
                    .scalar("OrderId", ValueType::Int)
                    .scalar("CustomerId", ValueType::Int)
                    .reference("Customer", "Customer", "CustomerId", "CustomerId")
                    .implements("Auditable"),
            )
            .with_entity(
                EntityDef::new("Customer")
                    .scalar("CustomerId", ValueType::Int)
                    .scalar("Country", ValueType::Text)
                    .collection("Orders", "Order", "CustomerId", "CustomerId"),
            )
            .with_entity(EntityDef::new("Region").scalar("RegionId", ValueType::Int))
    }

    #[test]
    fn test_type_key_is_deterministic() {
        assert_eq!(EntityType::new("Order").type_key(), EntityType::new("Order").type_key());
        assert_ne!(EntityType::new("Order").type_key(), EntityType::new("Customer").type_key());
        // FNV-1a of the empty string is the offset basis
        assert_eq!(EntityType::new("").type_key(), 0x811c_9dc5);
    }

    #[test]
    fn test_find_association_from_outer_collection() {
        let assoc = schema()
            .find_association(&"Customer".into(), &"Order".into(), None)
            .unwrap();
        assert_eq!(assoc.property, "Orders");
        assert_eq!(assoc.cardinality, Cardinality::Many);
    }

    #[test]
    fn test_find_association_inverts_inner_declaration() {
        let schema = Schema::new()
            .with_entity(
                EntityDef::new("Order")
                    .scalar("CustomerRef", ValueType::Int)
                    .reference("Customer", "Customer", "CustomerRef", "Id"),
            )
            .with_entity(EntityDef::new("Customer").scalar("Id", ValueType::Int));
        let assoc = schema
            .find_association(&"Customer".into(), &"Order".into(), None)
            .unwrap();
        assert_eq!(assoc.cardinality, Cardinality::Many);
        assert_eq!(assoc.outer_key, "Id");
        assert_eq!(assoc.inner_key, "CustomerRef");
    }

    #[test]
    fn test_find_association_missing() {
        let err = schema()
            .find_association(&"Order".into(), &"Region".into(), None)
            .unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn test_member_info_suggests_close_name() {
        let err = schema()
            .member_info(&"Customer".into(), "Contry")
            .unwrap_err();
        assert!(err.to_string().contains("did you mean 'Country'"));
    }

    #[test]
    fn test_interfaces() {
        let schema = schema();
        assert!(schema.is_implementing_interface(&"Order".into(), "Auditable"));
        assert!(!schema.is_implementing_interface(&"Customer".into(), "Auditable"));
        assert!(schema.applies_to(&"Order".into(), &"Auditable".into()));
    }

    #[test]
    fn test_coerce_record_parses_dates() {
        let schema = Schema::new()
            .with_entity(EntityDef::new("Event").scalar("At", ValueType::DateTime));
        let record = Record::new().with("At", "2024-01-02");
        let coerced = schema.coerce_record(&"Event".into(), record).unwrap();
        assert_eq!(coerced.get("At").value_type(), Some(ValueType::DateTime));
        assert!(coerced.get("Missing").is_null());
    }

    #[test]
    fn test_schema_from_toml() {
        let schema = Schema::from_toml(
            r#"
            [[entities]]
            name = "Customer"

            [[entities.members]]
            name = "CustomerId"
            kind = "scalar"
            type = "int"

            [[entities.members]]
            name = "Orders"
            kind = "collection"
            target = "Order"
            this_key = "CustomerId"
            other_key = "CustomerId"
            "#,
        )
        .unwrap();
        let customer = schema.entity(&"Customer".into()).unwrap();
        assert_eq!(customer.members.len(), 2);
        assert!(customer.members[1].is_collection());
        assert_eq!(customer.members[0].value_type(), Some(ValueType::Int));
    }
}
