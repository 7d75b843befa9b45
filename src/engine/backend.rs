//! Backend abstraction
//!
//! A backend supplies base tables, classifies expression shapes, hands out
//! the four expression makers and finally runs a composed expression.
//! The makers default to the core builders; a backend overrides a factory
//! method only when it needs a specialized variant.

use crate::engine::condition::ConditionExpressionBuilder;
use crate::engine::join::JoinExpressionBuilder;
use crate::engine::ordering::OrderingExpressionBuilder;
use crate::engine::set_ops::SetOperationBuilder;
use crate::error::{QueryError, QueryResult};
use crate::query::{ConditionList, JoinTree, NodeId, OrderingList, Param, QueryExpr, Shape};
use crate::schema::{EntityType, Record, Schema};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Position a parameter is bound in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    /// The current element, or the outer side of a join
    Source,
    /// The inner side of a join or its group
    Inner,
    /// An element of an aggregated collection
    Element,
}

/// Canonical lambda parameter per (entity type, role).
///
/// Interior mutability makes this `!Sync`; one cache belongs to one backend.
#[derive(Debug, Default)]
pub struct ParameterCache {
    params: RefCell<HashMap<(EntityType, ParamRole), Param>>,
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(&self, entity: &EntityType, role: ParamRole) -> Param {
        self.params
            .borrow_mut()
            .entry((entity.clone(), role))
            .or_insert_with(|| {
                let base = entity.name().to_lowercase();
                let name = match role {
                    ParamRole::Source => base,
                    ParamRole::Inner => format!("{}_inner", base),
                    ParamRole::Element => format!("{}_item", base),
                };
                Param::new(name, entity.clone())
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.params.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.borrow().is_empty()
    }
}

/// One element produced by running an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Row {
    Entity(Rc<Record>),
    Pair(Rc<Record>, Option<Rc<Record>>),
    Group(Rc<Record>, Vec<Rc<Record>>),
}

impl Row {
    /// The outer record of the row
    pub fn primary(&self) -> &Rc<Record> {
        match self {
            Row::Entity(record) | Row::Pair(record, _) | Row::Group(record, _) => record,
        }
    }

    pub fn into_record(self) -> Record {
        let primary = match self {
            Row::Entity(record) | Row::Pair(record, _) | Row::Group(record, _) => record,
        };
        Rc::try_unwrap(primary).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Result of executing an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(Vec<Row>),
    Count(usize),
    Flag(bool),
    Single(Option<Row>),
}

impl Outcome {
    pub fn into_rows(self) -> QueryResult<Vec<Row>> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(unexpected("rows", &other)),
        }
    }

    pub fn into_count(self) -> QueryResult<usize> {
        match self {
            Outcome::Count(count) => Ok(count),
            other => Err(unexpected("a count", &other)),
        }
    }

    pub fn into_flag(self) -> QueryResult<bool> {
        match self {
            Outcome::Flag(flag) => Ok(flag),
            other => Err(unexpected("a flag", &other)),
        }
    }

    pub fn into_single(self) -> QueryResult<Option<Row>> {
        match self {
            Outcome::Single(row) => Ok(row),
            other => Err(unexpected("a single row", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Outcome) -> QueryError {
    let kind = match got {
        Outcome::Rows(_) => "rows",
        Outcome::Count(_) => "a count",
        Outcome::Flag(_) => "a flag",
        Outcome::Single(_) => "a single row",
    };
    QueryError::execution(format!("expected {} but the backend returned {}", wanted, kind))
}

pub trait ConditionMaker {
    /// Wraps `source` in one filter per condition
    fn make(
        &self,
        backend: &dyn Backend,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr>;

    /// Restricts the elements of every group in a group-join to those
    /// matching all conditions, keeping each outer row
    fn restrict_groups(
        &self,
        backend: &dyn Backend,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr>;
}

pub trait OrderingMaker {
    fn make(
        &self,
        backend: &dyn Backend,
        orderings: &OrderingList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr>;
}

pub trait JoinMaker {
    /// Folds the children of `node` into `source`
    fn make(
        &self,
        backend: &dyn Backend,
        tree: &JoinTree,
        node: NodeId,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr>;
}

pub trait SetOperationMaker {
    fn distinct(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr>;
    fn skip(&self, backend: &dyn Backend, source: QueryExpr, count: usize) -> QueryResult<QueryExpr>;
    fn take(&self, backend: &dyn Backend, source: QueryExpr, count: usize) -> QueryResult<QueryExpr>;
    fn union(
        &self,
        backend: &dyn Backend,
        source: QueryExpr,
        other: QueryExpr,
    ) -> QueryResult<QueryExpr>;
    fn except(
        &self,
        backend: &dyn Backend,
        source: QueryExpr,
        other: QueryExpr,
    ) -> QueryResult<QueryExpr>;
    fn count(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr>;
    fn any(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr>;
    fn first(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr>;
    fn first_or_default(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr>;
}

/// An execution backend
pub trait Backend {
    fn name(&self) -> &str;

    fn schema(&self) -> &Schema;

    fn parameters(&self) -> &ParameterCache;

    /// Opaque session handle, passed through unexamined
    fn current_context(&self) -> &dyn Any;

    /// Runs a composed expression
    fn execute(&self, expr: &QueryExpr) -> QueryResult<Outcome>;

    /// Base expression for an entity type
    fn table(&self, entity: &EntityType) -> QueryResult<QueryExpr> {
        if !self.schema().contains(entity) {
            return Err(QueryError::entity_not_found(entity.name()));
        }
        Ok(QueryExpr::source(entity.clone()))
    }

    fn element_shape(&self, expr: &QueryExpr) -> Shape {
        expr.shape()
    }

    fn create_join_maker(&self) -> Box<dyn JoinMaker> {
        Box::new(JoinExpressionBuilder)
    }

    fn create_ordering_maker(&self) -> Box<dyn OrderingMaker> {
        Box::new(OrderingExpressionBuilder)
    }

    fn create_condition_maker(&self) -> Box<dyn ConditionMaker> {
        Box::new(ConditionExpressionBuilder)
    }

    fn create_set_operation_maker(&self) -> Box<dyn SetOperationMaker> {
        Box::new(SetOperationBuilder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_cache_returns_canonical_params() {
        let cache = ParameterCache::new();
        let order = EntityType::new("Order");
        let first = cache.param(&order, ParamRole::Source);
        let second = cache.param(&order, ParamRole::Source);
        assert_eq!(first, second);
        assert_eq!(first.name, "order");
        assert_eq!(cache.param(&order, ParamRole::Inner).name, "order_inner");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_outcome_kind_mismatch() {
        let err = Outcome::Count(3).into_rows().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Execution error: expected rows but the backend returned a count"
        );
    }
}
