//! Join assembly
//!
//! Folds the children of a join node into the parent's expression. Every
//! join ends in a projection back to the parent type, so siblings can be
//! folded one after another onto the same entity-shaped source.

use crate::engine::backend::{Backend, JoinMaker, ParamRole};
use crate::engine::key_selectors;
use crate::error::{QueryError, QueryResult};
use crate::query::{
    BaseCondition, ConditionList, FieldCondition, JoinKind, JoinTree, NodeId, Operator, QueryExpr,
};
use log::debug;

/// Default join maker
#[derive(Debug, Default, Clone, Copy)]
pub struct JoinExpressionBuilder;

/// Aggregates without a collection path range over the join group
fn is_group_aggregate(condition: &BaseCondition) -> bool {
    matches!(condition, BaseCondition::Aggregate(a) if a.collection.is_none())
}

/// Folds the child's element conditions into a group aggregate's own filter
fn merge_into_aggregate(condition: &BaseCondition, plain: &ConditionList) -> BaseCondition {
    match condition {
        BaseCondition::Aggregate(aggregate) if !plain.is_empty() => {
            let mut merged = aggregate.clone();
            merged.conditions.extend(plain.iter().cloned());
            merged.conditions.remove_duplicates();
            BaseCondition::Aggregate(merged)
        }
        other => other.clone(),
    }
}

impl JoinExpressionBuilder {
    #[allow(clippy::too_many_arguments)]
    fn join(
        &self,
        backend: &dyn Backend,
        tree: &JoinTree,
        parent: NodeId,
        child: NodeId,
        conditions: &ConditionList,
        outer: QueryExpr,
        inner: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        let schema = backend.schema();
        let parent_type = tree.value(parent).entity.clone();
        let node = tree.value(child);
        let child_type = node.entity.clone();

        let mut candidates = node.conditions.clone();
        candidates.extend(conditions.element_type_conditions(&child_type, schema));
        candidates.extend(conditions.aggregate_conditions(&child_type, schema));
        let (aggregates, plain): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(is_group_aggregate);
        let aggregates = ConditionList::from(aggregates).deduplicated();
        let plain = ConditionList::from(plain).deduplicated();

        let params = backend.parameters();
        let outer_param = params.param(&parent_type, ParamRole::Source);
        let inner_param = params.param(&child_type, ParamRole::Inner);

        let mut extra = ConditionList::new();
        let (outer_field, inner_field) = if node.has_field_pairs() {
            let mut pairs = node.field_pairs();
            let (parent_field, child_field) = pairs.next().ok_or_else(|| {
                QueryError::structural(format!("join to '{}' has no field pairs", child_type))
            })?;
            for (parent_extra, child_extra) in pairs {
                extra.push(FieldCondition::new(
                    parent_type.clone(),
                    parent_extra,
                    Operator::Equal,
                    child_type.clone(),
                    child_extra,
                ));
            }
            (parent_field.to_string(), child_field.to_string())
        } else {
            let association = schema.find_association(
                &parent_type,
                &child_type,
                node.associated_property.as_deref(),
            )?;
            debug!(
                "joining {} -> {} through '{}' ({:?})",
                parent_type, child_type, association.property, association.cardinality
            );
            (association.outer_key, association.inner_key)
        };
        let (outer_key, inner_key) =
            key_selectors(backend, &outer_param, &outer_field, &inner_param, &inner_field)?;

        // Extra pairs and element conditions: a filter after an inner join,
        // a restriction of each group before a left outer flatten
        let post_join: ConditionList = extra.iter().chain(plain.iter()).cloned().collect();
        let condition_maker = backend.create_condition_maker();

        match node.join_kind {
            JoinKind::Inner if !aggregates.is_empty() => {
                if !extra.is_empty() {
                    return Err(QueryError::unsupported(format!(
                        "join to '{}' combines aggregate conditions with more than one field pair",
                        child_type
                    )));
                }
                debug!(
                    "inner join {} -> {} as group join with {} aggregate(s)",
                    parent_type,
                    child_type,
                    aggregates.len()
                );
                let grouped = QueryExpr::GroupJoin {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    outer_key,
                    inner_key,
                };
                let merged: ConditionList = aggregates
                    .iter()
                    .map(|aggregate| merge_into_aggregate(aggregate, &plain))
                    .collect();
                let filtered = condition_maker.make(backend, &merged, grouped)?;
                Ok(filtered.projected(parent_type))
            }
            JoinKind::Inner => {
                debug!(
                    "inner join {} -> {} with {} post-join condition(s)",
                    parent_type,
                    child_type,
                    post_join.len()
                );
                let joined = QueryExpr::Join {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    outer_key,
                    inner_key,
                };
                let filtered = condition_maker.make(backend, &post_join, joined)?;
                Ok(filtered.projected(parent_type))
            }
            JoinKind::LeftOuter => {
                debug!(
                    "left outer join {} -> {} with {} aggregate(s) and {} group condition(s)",
                    parent_type,
                    child_type,
                    aggregates.len(),
                    post_join.len()
                );
                let grouped = QueryExpr::GroupJoin {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    outer_key,
                    inner_key,
                };
                let restricted = condition_maker.restrict_groups(backend, &post_join, grouped)?;
                let filtered = condition_maker.make(backend, &aggregates, restricted)?;
                Ok(filtered.flattened(true).projected(parent_type))
            }
        }
    }
}

impl JoinMaker for JoinExpressionBuilder {
    fn make(
        &self,
        backend: &dyn Backend,
        tree: &JoinTree,
        node: NodeId,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        tree.children(node).iter().try_fold(source, |outer, &child| {
            let mut inner = backend.table(&tree.value(child).entity)?;
            if !tree.children(child).is_empty() {
                inner = backend
                    .create_join_maker()
                    .make(backend, tree, child, conditions, inner)?;
            }
            self.join(backend, tree, node, child, conditions, outer, inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::query::{AggregateCondition, Condition, JoinNode};
    use crate::schema::{EntityDef, Schema, ValueType};

    fn backend() -> MemoryBackend {
        MemoryBackend::new(
            Schema::new()
                .with_entity(
                    EntityDef::new("Customer")
                        .scalar("CustomerId", ValueType::Int)
                        .scalar("Region", ValueType::Text)
                        .collection("Orders", "Order", "CustomerId", "CustomerId"),
                )
                .with_entity(
                    EntityDef::new("Order")
                        .scalar("OrderId", ValueType::Int)
                        .scalar("CustomerId", ValueType::Int)
                        .scalar("Region", ValueType::Text)
                        .scalar("Freight", ValueType::Float),
                )
                .with_entity(EntityDef::new("Note").scalar("Text", ValueType::Text)),
        )
    }

    fn tree(child: JoinNode) -> (JoinTree, NodeId) {
        let mut tree = JoinTree::new(JoinNode::inner("Customer"));
        let root = tree.root();
        tree.insert_child(root, child).unwrap();
        (tree, root)
    }

    fn fold(backend: &MemoryBackend, child: JoinNode, conditions: &ConditionList) -> QueryResult<QueryExpr> {
        let (tree, root) = tree(child);
        JoinExpressionBuilder.make(backend, &tree, root, conditions, QueryExpr::source("Customer"))
    }

    #[test]
    fn test_inner_join_uses_association_keys() {
        let backend = backend();
        let expr = fold(&backend, JoinNode::inner("Order"), &ConditionList::new()).unwrap();
        assert_eq!(
            expr.to_string(),
            "Customer.join(Order, |customer| customer.CustomerId, |order_inner| order_inner.CustomerId).project(Customer)"
        );
    }

    #[test]
    fn test_left_outer_flattens_with_default() {
        let backend = backend();
        let expr = fold(&backend, JoinNode::left_outer("Order"), &ConditionList::new()).unwrap();
        assert!(expr.to_string().contains(".group_join(Order,"));
        assert!(expr.to_string().ends_with(".flatten_default().project(Customer)"));
    }

    #[test]
    fn test_left_outer_restricts_groups_before_flatten() {
        let backend = backend();
        let child = JoinNode::left_outer("Order")
            .on_fields(["CustomerId", "Region"], ["CustomerId", "Region"])
            .with_condition(Condition::gt("Freight", 10));
        let expr = fold(&backend, child, &ConditionList::new()).unwrap();
        assert_eq!(
            expr.to_string(),
            "Customer.group_join(Order, |customer| customer.CustomerId, |order_inner| order_inner.CustomerId)\
             .filter_groups(|customer, order_inner| (customer.Region == order_inner.Region && order_inner.Freight > 10))\
             .flatten_default()\
             .project(Customer)"
        );
    }

    #[test]
    fn test_self_join_condition_reads_inner_side() {
        let backend = MemoryBackend::new(
            Schema::new().with_entity(
                EntityDef::new("Employee")
                    .scalar("EmployeeId", ValueType::Int)
                    .scalar("ManagerId", ValueType::Int)
                    .scalar("Name", ValueType::Text)
                    .collection("Reports", "Employee", "EmployeeId", "ManagerId"),
            ),
        );
        let mut tree = JoinTree::new(JoinNode::inner("Employee"));
        let root = tree.root();
        tree.insert_child(root, JoinNode::inner("Employee")).unwrap();
        let conditions = ConditionList::new().with(Condition::new("Name", "Bob").on("Employee"));
        let expr = JoinExpressionBuilder
            .make(&backend, &tree, root, &conditions, QueryExpr::source("Employee"))
            .unwrap();
        assert!(
            expr.to_string()
                .contains(".filter(|employee, employee_inner| employee_inner.Name == 'Bob')")
        );
    }

    #[test]
    fn test_global_conditions_scoped_to_child() {
        let backend = backend();
        let conditions = ConditionList::new().with(Condition::gt("Freight", 10).on("Order"));
        let expr = fold(&backend, JoinNode::inner("Order"), &conditions).unwrap();
        assert!(
            expr.to_string()
                .contains(".filter(|customer, order_inner| order_inner.Freight > 10)")
        );
    }

    #[test]
    fn test_aggregates_switch_to_group_join() {
        let backend = backend();
        let child = JoinNode::inner("Order")
            .with_condition(Condition::gt("Freight", 10))
            .with_condition(AggregateCondition::any("Order"));
        let expr = fold(&backend, child, &ConditionList::new()).unwrap();
        assert_eq!(
            expr.to_string(),
            "Customer.group_join(Order, |customer| customer.CustomerId, |order_inner| order_inner.CustomerId)\
             .filter(|customer, order_inner| order_inner.any(|order_item| order_item.Freight > 10))\
             .project(Customer)"
        );
    }

    #[test]
    fn test_extra_field_pairs_become_conditions() {
        let backend = backend();
        let child = JoinNode::inner("Order").on_fields(["CustomerId", "Region"], ["CustomerId", "Region"]);
        let expr = fold(&backend, child, &ConditionList::new()).unwrap();
        assert!(
            expr.to_string()
                .contains(".filter(|customer, order_inner| customer.Region == order_inner.Region)")
        );
    }

    #[test]
    fn test_extra_field_pairs_with_aggregates_unsupported() {
        let backend = backend();
        let child = JoinNode::inner("Order")
            .on_fields(["CustomerId", "Region"], ["CustomerId", "Region"])
            .with_condition(AggregateCondition::any("Order"));
        let err = fold(&backend, child, &ConditionList::new()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_missing_association() {
        let backend = backend();
        let err = fold(&backend, JoinNode::inner("Note"), &ConditionList::new()).unwrap_err();
        assert!(err.is_resolution());
    }
}
