//! Expression assembly
//!
//! Folds a join tree plus condition and ordering lists into one
//! [`QueryExpr`] through the makers a [`Backend`] hands out.

pub mod backend;
pub mod condition;
pub mod join;
pub mod ordering;
pub mod set_ops;

pub use backend::{
    Backend, ConditionMaker, JoinMaker, Outcome, OrderingMaker, ParamRole, ParameterCache, Row,
    SetOperationMaker,
};
pub use condition::{ConditionExpressionBuilder, Scope};
pub use join::JoinExpressionBuilder;
pub use ordering::OrderingExpressionBuilder;
pub use set_ops::SetOperationBuilder;

use crate::error::{QueryError, QueryResult};
use crate::query::{ConditionList, JoinTree, Lambda, OrderingList, Param, QueryExpr, ScalarExpr};
use crate::schema::{EntityType, Schema, ValueType};
use log::debug;

/// Builds the full expression for a join tree, starting from the root's table
pub fn fold_tree(
    backend: &dyn Backend,
    tree: &JoinTree,
    conditions: &ConditionList,
    orderings: &OrderingList,
) -> QueryResult<QueryExpr> {
    let source = backend.table(&tree.value(tree.root()).entity)?;
    fold_tree_onto(backend, tree, conditions, orderings, source)
}

/// Like [`fold_tree`], but folds onto an existing expression whose element
/// type must be the root entity type
pub fn fold_tree_onto(
    backend: &dyn Backend,
    tree: &JoinTree,
    conditions: &ConditionList,
    orderings: &OrderingList,
    source: QueryExpr,
) -> QueryResult<QueryExpr> {
    let root = tree.root();
    let root_type = &tree.value(root).entity;
    let shape = backend.element_shape(&source);
    if shape.primary() != Some(root_type) {
        return Err(QueryError::structural(format!(
            "join tree rooted at '{}' cannot be folded onto a sequence of {}",
            root_type, shape
        )));
    }

    debug!(
        "folding {} join node(s) onto {} with {} condition(s)",
        tree.len(),
        root_type,
        conditions.len()
    );
    let joined = backend
        .create_join_maker()
        .make(backend, tree, root, conditions, source)?;
    let root_conditions = root_conditions(backend.schema(), tree, conditions);
    let filtered = backend
        .create_condition_maker()
        .make(backend, &root_conditions, joined)?;
    backend
        .create_ordering_maker()
        .make(backend, orderings, filtered)
}

/// Root node conditions plus every global condition that is not scoped to
/// a type joined below the root
fn root_conditions(schema: &Schema, tree: &JoinTree, conditions: &ConditionList) -> ConditionList {
    let root = tree.value(tree.root());
    let joined: Vec<&EntityType> = tree
        .descendants(tree.root())
        .into_iter()
        .map(|id| &tree.value(id).entity)
        .collect();

    let mut list = root.conditions.clone();
    list.extend(
        conditions
            .iter()
            .filter(|condition| match condition.scope() {
                None => true,
                Some(scope) => {
                    schema.applies_to(&root.entity, scope)
                        || !joined.iter().any(|entity| schema.applies_to(entity, scope))
                }
            })
            .cloned(),
    );
    list.remove_duplicates();
    list
}

/// Key lambdas for an equi-join, converted to the fields' common type
pub(crate) fn key_selectors(
    backend: &dyn Backend,
    outer: &Param,
    outer_field: &str,
    inner: &Param,
    inner_field: &str,
) -> QueryResult<(Lambda, Lambda)> {
    let schema = backend.schema();
    let outer_type = schema.member_type(&outer.entity, outer_field)?;
    let inner_type = schema.member_type(&inner.entity, inner_field)?;
    let common = outer_type.common(inner_type).ok_or_else(|| {
        QueryError::structural(format!(
            "join keys {}.{} ({}) and {}.{} ({}) have no common type",
            outer.entity, outer_field, outer_type, inner.entity, inner_field, inner_type
        ))
    })?;

    let select = |param: &Param, field: &str, field_type: ValueType| {
        let member = ScalarExpr::member(param, vec![field.to_string()]);
        let body = if field_type == common {
            member
        } else {
            member.convert(common)
        };
        Lambda::single(param.clone(), body)
    };
    Ok((
        select(outer, outer_field, outer_type),
        select(inner, inner_field, inner_type),
    ))
}

/// Splits a dotted member path
pub(crate) fn split_path(field: &str) -> Vec<String> {
    field.split('.').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::query::{Condition, JoinNode, Ordering};
    use crate::schema::EntityDef;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(
            Schema::new()
                .with_entity(
                    EntityDef::new("Customer")
                        .scalar("CustomerId", ValueType::Int)
                        .scalar("Name", ValueType::Text)
                        .collection("Orders", "Order", "CustomerId", "CustomerId"),
                )
                .with_entity(
                    EntityDef::new("Order")
                        .scalar("OrderId", ValueType::Int)
                        .scalar("CustomerId", ValueType::Int)
                        .scalar("Freight", ValueType::Float),
                ),
        )
    }

    #[test]
    fn test_root_conditions_exclude_child_scoped() {
        let mut tree = JoinTree::new(JoinNode::inner("Customer").with_condition(Condition::new("Name", "Ann")));
        let root = tree.root();
        tree.insert_child(root, JoinNode::inner("Order")).unwrap();
        let conditions = ConditionList::new()
            .with(Condition::gt("Freight", 1).on("Order"))
            .with(Condition::new("Name", "Ann"))
            .with(Condition::new("CustomerId", 1).on("Customer"));
        let root_list = root_conditions(backend().schema(), &tree, &conditions);
        assert_eq!(root_list.len(), 2);
    }

    #[test]
    fn test_key_types_are_unified() {
        let backend = backend();
        let customer = Param::new("customer", "Customer");
        let order = Param::new("order_inner", "Order");
        let (outer, inner) = key_selectors(&backend, &customer, "CustomerId", &order, "CustomerId").unwrap();
        assert_eq!(outer.to_string(), "|customer| customer.CustomerId");
        assert_eq!(inner.to_string(), "|order_inner| order_inner.CustomerId");

        let (_, freight) = key_selectors(&backend, &customer, "CustomerId", &order, "Freight").unwrap();
        assert_eq!(freight.to_string(), "|order_inner| order_inner.Freight");

        let err = key_selectors(&backend, &customer, "Name", &order, "Freight").unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_fold_onto_rejects_other_root() {
        let backend = backend();
        let tree = JoinTree::new(JoinNode::inner("Customer"));
        let err = fold_tree_onto(
            &backend,
            &tree,
            &ConditionList::new(),
            &OrderingList::new(),
            QueryExpr::source("Order"),
        )
        .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_fold_applies_conditions_then_orderings() {
        let backend = backend();
        let tree = JoinTree::new(JoinNode::inner("Customer"));
        let expr = fold_tree(
            &backend,
            &tree,
            &ConditionList::new().with(Condition::starts_with("Name", "A")),
            &OrderingList::new().with(Ordering::desc("Name")),
        )
        .unwrap();
        assert_eq!(
            expr.to_string(),
            "Customer.filter(|customer| customer.Name.starts_with('A')).order_by_desc(|customer| customer.Name)"
        );
    }
}
