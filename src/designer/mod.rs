//! Query designer
//!
//! The handle callers chain operations on. Every operation folds through the
//! backend's makers and returns a new designer that shares the backend; the
//! `_in_place` variants replace the held expression only on success.

pub mod document;

pub use document::{NodeDocument, QueryDocument};

use crate::engine::{self, Backend, Row};
use crate::error::{QueryError, QueryResult};
use crate::query::{ConditionList, JoinTree, OrderingList, QueryExpr, Shape, explain};
use crate::schema::{EntityType, Record};
use log::debug;
use serde::de::DeserializeOwned;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct QueryDesigner {
    backend: Rc<dyn Backend>,
    expr: QueryExpr,
}

impl QueryDesigner {
    /// Designer over every element of one entity type
    pub fn new(backend: Rc<dyn Backend>, entity: impl Into<EntityType>) -> QueryResult<Self> {
        let entity = entity.into();
        if entity.name().trim().is_empty() {
            return Err(QueryError::argument("entity type is empty"));
        }
        let expr = backend.table(&entity)?;
        Ok(Self { backend, expr })
    }

    /// Designer over a whole join tree
    pub fn from_tree(
        backend: Rc<dyn Backend>,
        tree: &JoinTree,
        conditions: &ConditionList,
        orderings: &OrderingList,
    ) -> QueryResult<Self> {
        let expr = engine::fold_tree(
            backend.as_ref(),
            tree,
            &conditions.deduplicated(),
            &orderings.deduplicated(),
        )?;
        Ok(Self { backend, expr })
    }

    /// Adopts an expression composed elsewhere
    pub fn wrap(backend: Rc<dyn Backend>, expr: QueryExpr) -> QueryResult<Self> {
        if backend.element_shape(&expr) == Shape::Scalar {
            return Err(QueryError::argument(format!(
                "'{}' is a scalar result and cannot be designed further",
                expr
            )));
        }
        Ok(Self { backend, expr })
    }

    pub fn expression(&self) -> &QueryExpr {
        &self.expr
    }

    pub fn element_shape(&self) -> Shape {
        self.backend.element_shape(&self.expr)
    }

    pub fn element_type(&self) -> Option<EntityType> {
        self.element_shape().primary().cloned()
    }

    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.backend
    }

    fn with_expr(&self, expr: QueryExpr) -> Self {
        Self {
            backend: Rc::clone(&self.backend),
            expr,
        }
    }

    fn same_backend(&self, other: &QueryDesigner) -> QueryResult<()> {
        if std::ptr::addr_eq(Rc::as_ptr(&self.backend), Rc::as_ptr(&other.backend)) {
            Ok(())
        } else {
            Err(QueryError::argument(format!(
                "cannot combine queries from backends '{}' and '{}'",
                self.backend.name(),
                other.backend.name()
            )))
        }
    }

    /// Filters by every condition; an empty list is a no-op
    pub fn filter(&self, conditions: &ConditionList) -> QueryResult<Self> {
        if conditions.is_empty() {
            return Ok(self.clone());
        }
        let conditions = conditions.deduplicated();
        let expr = self.backend.create_condition_maker().make(
            self.backend.as_ref(),
            &conditions,
            self.expr.clone(),
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn filter_in_place(&mut self, conditions: &ConditionList) -> QueryResult<()> {
        self.expr = self.filter(conditions)?.expr;
        Ok(())
    }

    /// Sorts by the orderings in order; an empty list is a no-op
    pub fn order_by(&self, orderings: &OrderingList) -> QueryResult<Self> {
        if orderings.is_empty() {
            return Ok(self.clone());
        }
        let orderings = orderings.deduplicated();
        let expr = self.backend.create_ordering_maker().make(
            self.backend.as_ref(),
            &orderings,
            self.expr.clone(),
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn order_by_in_place(&mut self, orderings: &OrderingList) -> QueryResult<()> {
        self.expr = self.order_by(orderings)?.expr;
        Ok(())
    }

    /// Sorts by a textual ordering such as `"Name, Age DESC"`; blank input is
    /// a no-op
    pub fn order_by_expression(&self, expression: &str) -> QueryResult<Self> {
        if expression.trim().is_empty() {
            return Ok(self.clone());
        }
        self.order_by(&OrderingList::parse(expression))
    }

    /// Folds a join tree rooted at the current element type onto this query
    pub fn join(
        &self,
        tree: &JoinTree,
        conditions: &ConditionList,
        orderings: &OrderingList,
    ) -> QueryResult<Self> {
        let root = &tree.value(tree.root()).entity;
        if self.element_type().as_ref() != Some(root) {
            return Err(QueryError::structural(format!(
                "join tree rooted at '{}' does not match the designer's element type {}",
                root,
                self.element_shape()
            )));
        }
        let expr = engine::fold_tree_onto(
            self.backend.as_ref(),
            tree,
            &conditions.deduplicated(),
            &orderings.deduplicated(),
            self.expr.clone(),
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn skip(&self, count: usize) -> QueryResult<Self> {
        let expr = self.backend.create_set_operation_maker().skip(
            self.backend.as_ref(),
            self.expr.clone(),
            count,
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn take(&self, count: usize) -> QueryResult<Self> {
        let expr = self.backend.create_set_operation_maker().take(
            self.backend.as_ref(),
            self.expr.clone(),
            count,
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn distinct(&self) -> QueryResult<Self> {
        let expr = self
            .backend
            .create_set_operation_maker()
            .distinct(self.backend.as_ref(), self.expr.clone())?;
        Ok(self.with_expr(expr))
    }

    pub fn union(&self, other: &QueryDesigner) -> QueryResult<Self> {
        self.same_backend(other)?;
        let expr = self.backend.create_set_operation_maker().union(
            self.backend.as_ref(),
            self.expr.clone(),
            other.expr.clone(),
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn except(&self, other: &QueryDesigner) -> QueryResult<Self> {
        self.same_backend(other)?;
        let expr = self.backend.create_set_operation_maker().except(
            self.backend.as_ref(),
            self.expr.clone(),
            other.expr.clone(),
        )?;
        Ok(self.with_expr(expr))
    }

    pub fn count(&self) -> QueryResult<usize> {
        let expr = self
            .backend
            .create_set_operation_maker()
            .count(self.backend.as_ref(), self.expr.clone())?;
        self.backend.execute(&expr)?.into_count()
    }

    pub fn any(&self) -> QueryResult<bool> {
        let expr = self
            .backend
            .create_set_operation_maker()
            .any(self.backend.as_ref(), self.expr.clone())?;
        self.backend.execute(&expr)?.into_flag()
    }

    pub fn first(&self) -> QueryResult<Record> {
        let expr = self
            .backend
            .create_set_operation_maker()
            .first(self.backend.as_ref(), self.expr.clone())?;
        self.backend
            .execute(&expr)?
            .into_single()?
            .map(Row::into_record)
            .ok_or_else(|| QueryError::execution("first() on a sequence with no elements"))
    }

    pub fn first_or_default(&self) -> QueryResult<Option<Record>> {
        let expr = self
            .backend
            .create_set_operation_maker()
            .first_or_default(self.backend.as_ref(), self.expr.clone())?;
        Ok(self.backend.execute(&expr)?.into_single()?.map(Row::into_record))
    }

    pub fn rows(&self) -> QueryResult<Vec<Row>> {
        debug!("enumerating {}", self.expr);
        self.backend.execute(&self.expr)?.into_rows()
    }

    /// Primary record of every row
    pub fn records(&self) -> QueryResult<Vec<Record>> {
        Ok(self.rows()?.into_iter().map(Row::into_record).collect())
    }

    /// Deserializes every record into `T`
    pub fn cast<T: DeserializeOwned>(&self) -> QueryResult<Vec<T>> {
        self.records()?
            .into_iter()
            .map(|record| {
                serde_json::to_value(&record)
                    .and_then(serde_json::from_value::<T>)
                    .map_err(|e| QueryError::execution(format!("cannot cast record: {}", e)))
            })
            .collect()
    }

    pub fn explain(&self) -> String {
        explain(&self.expr)
    }
}

impl fmt::Debug for QueryDesigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDesigner")
            .field("backend", &self.backend.name())
            .field("expr", &self.expr.to_string())
            .finish()
    }
}

impl fmt::Display for QueryDesigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::query::{Condition, JoinNode};
    use crate::schema::{EntityDef, Schema, Value, ValueType};

    fn backend() -> Rc<dyn Backend> {
        let schema = Schema::new().with_entity(
            EntityDef::new("Person")
                .scalar("Id", ValueType::Int)
                .scalar("Name", ValueType::Text),
        );
        let rows = (1..=4).map(|id| {
            Record::new()
                .with("Id", id)
                .with("Name", format!("P{}", id))
        });
        Rc::new(MemoryBackend::new(schema).with_rows("Person", rows).unwrap())
    }

    #[test]
    fn test_empty_inputs_are_no_ops() {
        let designer = QueryDesigner::new(backend(), "Person").unwrap();
        let filtered = designer.filter(&ConditionList::new()).unwrap();
        assert_eq!(filtered.expression(), designer.expression());
        let ordered = designer.order_by_expression("   ").unwrap();
        assert_eq!(ordered.expression(), designer.expression());
    }

    #[test]
    fn test_failed_in_place_leaves_state() {
        let mut designer = QueryDesigner::new(backend(), "Person").unwrap();
        let before = designer.expression().clone();
        let err = designer
            .filter_in_place(&ConditionList::new().with(Condition::new("Missing", 1)))
            .unwrap_err();
        assert!(err.is_resolution());
        assert_eq!(designer.expression(), &before);

        designer
            .filter_in_place(&ConditionList::new().with(Condition::gt("Id", 2)))
            .unwrap();
        assert_eq!(designer.count().unwrap(), 2);
    }

    #[test]
    fn test_join_root_must_match() {
        let designer = QueryDesigner::new(backend(), "Person").unwrap();
        let tree = JoinTree::new(JoinNode::inner("Order"));
        let err = designer
            .join(&tree, &ConditionList::new(), &OrderingList::new())
            .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_terminals_do_not_consume() {
        let designer = QueryDesigner::new(backend(), "Person")
            .unwrap()
            .order_by_expression("Id DESC")
            .unwrap();
        assert_eq!(designer.count().unwrap(), 4);
        assert!(designer.any().unwrap());
        assert_eq!(designer.first().unwrap().get("Name"), &Value::from("P4"));
        assert_eq!(designer.records().unwrap().len(), 4);
    }

    #[test]
    fn test_set_operations() {
        let backend = backend();
        let all = QueryDesigner::new(Rc::clone(&backend), "Person").unwrap();
        let low = all
            .filter(&ConditionList::new().with(Condition::le("Id", 2)))
            .unwrap();
        assert_eq!(all.except(&low).unwrap().count().unwrap(), 2);
        assert_eq!(low.union(&all).unwrap().count().unwrap(), 4);
        assert_eq!(all.skip(1).unwrap().take(2).unwrap().count().unwrap(), 2);

        let foreign = QueryDesigner::new(self::backend(), "Person").unwrap();
        assert!(all.union(&foreign).unwrap_err().is_argument());
    }

    #[test]
    fn test_first_on_empty_fails() {
        let designer = QueryDesigner::new(backend(), "Person")
            .unwrap()
            .filter(&ConditionList::new().with(Condition::gt("Id", 10)))
            .unwrap();
        assert!(designer.first().is_err());
        assert_eq!(designer.first_or_default().unwrap(), None);
    }

    #[test]
    fn test_wrap_rejects_scalar() {
        let expr = QueryExpr::source("Person").terminal(crate::query::TerminalOp::Count);
        assert!(QueryDesigner::wrap(backend(), expr).unwrap_err().is_argument());
    }
}
