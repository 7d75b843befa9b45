//! Condition lowering
//!
//! Turns [`BaseCondition`] values into predicate lambdas bound to the
//! parameters of the expression currently being filtered.

use crate::engine::backend::{Backend, ConditionMaker, ParamRole};
use crate::engine::{key_selectors, split_path};
use crate::error::{QueryError, QueryResult};
use crate::query::{
    AggregateCondition, AggregateFunction, BaseCondition, BiCondition, BinaryOp, CollectionSource,
    Condition, ConditionList, FieldCondition, Lambda, Operator, Param, QueryExpr, ScalarExpr, Shape,
    TextMethod,
};
use crate::schema::{EntityType, MemberKind, Relation, Schema, Value, ValueType};
use log::{debug, trace};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Row,
    Group,
}

#[derive(Debug, Clone)]
struct Binding {
    param: Param,
    kind: BindingKind,
}

/// Parameter bindings a condition is lowered against
#[derive(Debug, Clone)]
pub struct Scope {
    bindings: Vec<Binding>,
    default: usize,
}

impl Scope {
    /// Entity shapes bind one row; pairs bind outer and inner rows (inner is
    /// the default); groups bind the outer row and the group.
    pub fn for_shape(backend: &dyn Backend, shape: &Shape) -> QueryResult<Self> {
        let params = backend.parameters();
        match shape {
            Shape::Entity(entity) => Ok(Self::single(params.param(entity, ParamRole::Source))),
            Shape::Pair { outer, inner, .. } => Ok(Self {
                bindings: vec![
                    Binding {
                        param: params.param(outer, ParamRole::Source),
                        kind: BindingKind::Row,
                    },
                    Binding {
                        param: params.param(inner, ParamRole::Inner),
                        kind: BindingKind::Row,
                    },
                ],
                default: 1,
            }),
            Shape::Group { outer, inner } => Ok(Self {
                bindings: vec![
                    Binding {
                        param: params.param(outer, ParamRole::Source),
                        kind: BindingKind::Row,
                    },
                    Binding {
                        param: params.param(inner, ParamRole::Inner),
                        kind: BindingKind::Group,
                    },
                ],
                default: 1,
            }),
            Shape::Scalar => Err(QueryError::unsupported(
                "conditions cannot be applied to a scalar expression",
            )),
        }
    }

    pub fn single(param: Param) -> Self {
        Self {
            bindings: vec![Binding {
                param,
                kind: BindingKind::Row,
            }],
            default: 0,
        }
    }

    pub fn params(&self) -> Vec<Param> {
        self.bindings.iter().map(|b| b.param.clone()).collect()
    }

    fn default_binding(&self) -> &Binding {
        &self.bindings[self.default]
    }

    /// Default binding first, then the rest in order
    fn search_order(&self) -> impl Iterator<Item = &Binding> {
        std::iter::once(self.default_binding()).chain(
            self.bindings
                .iter()
                .enumerate()
                .filter(move |(index, _)| *index != self.default)
                .map(|(_, binding)| binding),
        )
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .bindings
            .iter()
            .map(|b| match b.kind {
                BindingKind::Row => b.param.entity.to_string(),
                BindingKind::Group => format!("[{}]", b.param.entity),
            })
            .collect();
        write!(f, "({})", names.join(", "))
    }
}

/// Result of walking a member path from a parameter
enum Walk {
    Scalar {
        expr: ScalarExpr,
        value_type: ValueType,
    },
    /// The path crosses a collection; `rest` continues on its elements
    Crossing {
        source: CollectionSource,
        element: EntityType,
        rest: Vec<String>,
    },
}

/// Which binding a scoped member reads from when several share its type.
/// Leaf conditions read the default (inner) binding; field comparisons read
/// the outer binding on the left and the inner one on the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefer {
    Default,
    First,
    Last,
}

struct Lowering<'a> {
    backend: &'a dyn Backend,
    scope: &'a Scope,
}

impl<'a> Lowering<'a> {
    fn new(backend: &'a dyn Backend, scope: &'a Scope) -> Self {
        Self { backend, scope }
    }

    fn schema(&self) -> &'a Schema {
        self.backend.schema()
    }

    fn lower(&self, condition: &BaseCondition) -> QueryResult<ScalarExpr> {
        match condition {
            BaseCondition::Condition(leaf) => self.lower_condition(leaf),
            BaseCondition::And(bi) => self.lower_bi(bi, "AND", ScalarExpr::and),
            BaseCondition::Or(bi) => self.lower_bi(bi, "OR", ScalarExpr::or),
            BaseCondition::Bool { value } => Ok(ScalarExpr::literal(*value)),
            BaseCondition::Field(field) => self.lower_field(field),
            BaseCondition::Aggregate(aggregate) => self.lower_aggregate(aggregate),
        }
    }

    fn lower_bi(
        &self,
        bi: &BiCondition,
        keyword: &str,
        combine: fn(ScalarExpr, ScalarExpr) -> ScalarExpr,
    ) -> QueryResult<ScalarExpr> {
        match (&bi.left, &bi.right) {
            (Some(left), Some(right)) => Ok(combine(self.lower(left)?, self.lower(right)?)),
            (Some(side), None) | (None, Some(side)) => self.lower(side),
            (None, None) => Err(QueryError::structural(format!(
                "{} condition has neither a left nor a right operand",
                keyword
            ))),
        }
    }

    /// Binding a condition owned by `owner` reads from, plus the navigation
    /// prefix needed to reach `owner` from it
    fn resolve(
        &self,
        owner: Option<&EntityType>,
        prefer: Prefer,
    ) -> QueryResult<(&'a Binding, Vec<String>)> {
        let scope: &'a Scope = self.scope;
        let Some(owner) = owner else {
            return Ok((scope.default_binding(), Vec::new()));
        };
        let schema = self.schema();

        let default = scope.default_binding();
        let mut direct = scope
            .bindings
            .iter()
            .filter(|b| schema.applies_to(&b.param.entity, owner));
        let found = match prefer {
            Prefer::Default
                if default.kind == BindingKind::Row
                    && schema.applies_to(&default.param.entity, owner) =>
            {
                Some(default)
            }
            Prefer::Default | Prefer::First => direct.next(),
            Prefer::Last => direct.last(),
        };
        if let Some(binding) = found {
            return Ok((binding, Vec::new()));
        }

        for binding in scope.search_order() {
            if binding.kind != BindingKind::Row {
                continue;
            }
            if let Some(member) = schema.relation_to(&binding.param.entity, owner) {
                trace!(
                    "reaching {} from {} through '{}'",
                    owner, binding.param.entity, member.name
                );
                return Ok((binding, vec![member.name.clone()]));
            }
        }

        Err(QueryError::Resolution {
            message: format!(
                "'{}' is neither bound in {} nor reachable through a navigation",
                owner, scope
            ),
            entity: Some(owner.name().to_string()),
            member: None,
        })
    }

    fn walk(&self, param: &Param, path: &[String]) -> QueryResult<Walk> {
        let schema = self.schema();
        let mut entity = param.entity.clone();
        for (index, segment) in path.iter().enumerate() {
            let last = index + 1 == path.len();
            let member = schema.member_info(&entity, segment)?;
            match &member.kind {
                MemberKind::Scalar { value_type } => {
                    if !last {
                        return Err(QueryError::Resolution {
                            message: format!(
                                "'{}' on '{}' is a scalar and cannot be navigated",
                                segment, entity
                            ),
                            entity: Some(entity.name().to_string()),
                            member: Some(segment.clone()),
                        });
                    }
                    return Ok(Walk::Scalar {
                        expr: ScalarExpr::member(param, path.to_vec()),
                        value_type: *value_type,
                    });
                }
                MemberKind::Reference(relation) | MemberKind::Collection(relation) if last => {
                    return Err(QueryError::Resolution {
                        message: format!(
                            "path ends at navigation '{}' on '{}'; name a member of '{}'",
                            segment, entity, relation.target
                        ),
                        entity: Some(entity.name().to_string()),
                        member: Some(segment.clone()),
                    });
                }
                MemberKind::Reference(relation) => entity = relation.target.clone(),
                MemberKind::Collection(relation) => {
                    return Ok(Walk::Crossing {
                        source: CollectionSource::Navigation {
                            param: param.clone(),
                            path: path[..=index].to_vec(),
                        },
                        element: relation.target.clone(),
                        rest: path[index + 1..].to_vec(),
                    });
                }
            }
        }
        Err(QueryError::argument("member path is empty"))
    }

    fn lower_condition(&self, condition: &Condition) -> QueryResult<ScalarExpr> {
        if condition.field.trim().is_empty() {
            return Err(QueryError::argument("condition field name is empty"));
        }
        let (binding, mut path) = self.resolve(condition.entity.as_ref(), Prefer::Default)?;
        if binding.kind == BindingKind::Group {
            return Err(QueryError::unsupported(format!(
                "condition on '{}' targets a join group; use an aggregate condition",
                condition.field
            )));
        }
        path.extend(split_path(&condition.field));
        self.lower_comparison(&binding.param, &path, condition.operator, &condition.value)
    }

    /// A path crossing a collection becomes an `any` over its elements
    fn lower_comparison(
        &self,
        param: &Param,
        path: &[String],
        operator: Operator,
        value: &Value,
    ) -> QueryResult<ScalarExpr> {
        match self.walk(param, path)? {
            Walk::Scalar { expr, value_type } => {
                compare_with_literal(expr, value_type, operator, value, &path.join("."))
            }
            Walk::Crossing {
                source,
                element,
                rest,
            } => {
                let element = self.backend.parameters().param(&element, ParamRole::Element);
                let filter = self.lower_comparison(&element, &rest, operator, value)?;
                Ok(ScalarExpr::Aggregate {
                    function: AggregateFunction::Any,
                    source,
                    element,
                    filter: Some(Box::new(filter)),
                    selector: None,
                })
            }
        }
    }

    fn field_operand(
        &self,
        entity: &EntityType,
        field: &str,
        prefer: Prefer,
    ) -> QueryResult<(ScalarExpr, ValueType)> {
        let (binding, mut path) = self.resolve(Some(entity), prefer)?;
        if binding.kind == BindingKind::Group {
            return Err(QueryError::unsupported(format!(
                "field comparison on '{}.{}' targets a join group",
                entity, field
            )));
        }
        path.extend(split_path(field));
        match self.walk(&binding.param, &path)? {
            Walk::Scalar { expr, value_type } => Ok((expr, value_type)),
            Walk::Crossing { .. } => Err(QueryError::unsupported(format!(
                "field comparison through collection path '{}.{}'",
                entity, field
            ))),
        }
    }

    fn lower_field(&self, condition: &FieldCondition) -> QueryResult<ScalarExpr> {
        let (left, left_type) =
            self.field_operand(&condition.left_entity, &condition.left_field, Prefer::First)?;
        let (right, right_type) =
            self.field_operand(&condition.right_entity, &condition.right_field, Prefer::Last)?;

        if let Some(method) = text_method(condition.operator) {
            if left_type != ValueType::Text || right_type != ValueType::Text {
                return Err(QueryError::unsupported(format!(
                    "operator {} compares {} with {}; both sides must be text",
                    condition.operator, left_type, right_type
                )));
            }
            return Ok(ScalarExpr::Text {
                method,
                target: Box::new(left),
                argument: Box::new(right),
            });
        }

        let op = binary_op(condition.operator)?;
        let (left, right) = match left_type.common(right_type) {
            Some(common) => (
                convert_to(left, left_type, common),
                convert_to(right, right_type, common),
            ),
            None => {
                debug!(
                    "casting {}.{} ({}) to {} for field comparison",
                    condition.right_entity, condition.right_field, right_type, left_type
                );
                (left, right.convert(left_type))
            }
        };
        Ok(ScalarExpr::compare(op, left, right))
    }

    fn collection_source(
        &self,
        param: &Param,
        path: Vec<String>,
    ) -> QueryResult<(CollectionSource, EntityType)> {
        let schema = self.schema();
        let mut entity = param.entity.clone();
        for (index, segment) in path.iter().enumerate() {
            let last = index + 1 == path.len();
            let member = schema.member_info(&entity, segment)?;
            match (&member.kind, last) {
                (MemberKind::Collection(relation), true) => {
                    let element = relation.target.clone();
                    return Ok((
                        CollectionSource::Navigation {
                            param: param.clone(),
                            path: path.clone(),
                        },
                        element,
                    ));
                }
                (MemberKind::Reference(relation), false) => entity = relation.target.clone(),
                _ => {
                    return Err(QueryError::Resolution {
                        message: format!(
                            "'{}' on '{}' is not a collection navigation",
                            segment, entity
                        ),
                        entity: Some(entity.name().to_string()),
                        member: Some(segment.clone()),
                    });
                }
            }
        }
        Err(QueryError::argument("aggregate collection path is empty"))
    }

    fn lower_aggregate(&self, aggregate: &AggregateCondition) -> QueryResult<ScalarExpr> {
        let schema = self.schema();
        let function = aggregate.function;

        let (source, element_type) = match &aggregate.collection {
            None => {
                let group = self
                    .scope
                    .bindings
                    .iter()
                    .find(|b| {
                        b.kind == BindingKind::Group
                            && schema.applies_to(&b.param.entity, &aggregate.entity)
                    })
                    .ok_or_else(|| QueryError::Resolution {
                        message: format!(
                            "{} over '{}' needs a join group or a collection navigation",
                            function, aggregate.entity
                        ),
                        entity: Some(aggregate.entity.name().to_string()),
                        member: None,
                    })?;
                (
                    CollectionSource::Param(group.param.clone()),
                    group.param.entity.clone(),
                )
            }
            Some(collection) => {
                let (binding, mut path) = self.resolve(Some(&aggregate.entity), Prefer::Default)?;
                if binding.kind == BindingKind::Group {
                    return Err(QueryError::unsupported(format!(
                        "{} over '{}.{}' starts from a join group",
                        function, aggregate.entity, collection
                    )));
                }
                path.extend(split_path(collection));
                self.collection_source(&binding.param, path)?
            }
        };

        let element = self
            .backend
            .parameters()
            .param(&element_type, ParamRole::Element);

        let filter = if aggregate.conditions.is_empty() {
            None
        } else {
            let scope = Scope::single(element.clone());
            let nested = Lowering::new(self.backend, &scope);
            let parts = aggregate
                .conditions
                .iter()
                .map(|c| nested.lower(c))
                .collect::<QueryResult<Vec<_>>>()?;
            ScalarExpr::all_of(parts).map(Box::new)
        };

        let (selector, result_type) = if function.takes_field() {
            let field = aggregate
                .field
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .ok_or_else(|| {
                    QueryError::unsupported(format!(
                        "{} over '{}' needs a field to aggregate",
                        function, element_type
                    ))
                })?;
            match self.walk(&element, &split_path(field))? {
                Walk::Scalar { expr, value_type } => {
                    if function.requires_numeric() && !value_type.is_numeric() {
                        return Err(QueryError::unsupported(format!(
                            "{} needs a numeric field, '{}.{}' is {}",
                            function, element_type, field, value_type
                        )));
                    }
                    let result = match function {
                        AggregateFunction::Average => ValueType::Float,
                        _ => value_type,
                    };
                    (Some(Box::new(expr)), result)
                }
                Walk::Crossing { .. } => {
                    return Err(QueryError::unsupported(format!(
                        "{} cannot select through collection path '{}'",
                        function, field
                    )));
                }
            }
        } else {
            if let Some(field) = &aggregate.field {
                return Err(QueryError::unsupported(format!(
                    "{} does not take a field (got '{}')",
                    function, field
                )));
            }
            let result = if function.is_predicate() {
                ValueType::Bool
            } else {
                ValueType::Int
            };
            (None, result)
        };

        let expr = ScalarExpr::Aggregate {
            function,
            source,
            element,
            filter,
            selector,
        };
        match &aggregate.comparison {
            Some(comparison) => compare_with_literal(
                expr,
                result_type,
                comparison.operator,
                &comparison.value,
                &format!("{}({})", function, element_type),
            ),
            None if function.is_predicate() => Ok(expr),
            None => Err(QueryError::unsupported(format!(
                "{} over '{}' needs a comparison to form a predicate",
                function, element_type
            ))),
        }
    }
}

fn text_method(operator: Operator) -> Option<TextMethod> {
    match operator {
        Operator::StartsWith => Some(TextMethod::StartsWith),
        Operator::Contains => Some(TextMethod::Contains),
        Operator::EndsWith => Some(TextMethod::EndsWith),
        _ => None,
    }
}

fn binary_op(operator: Operator) -> QueryResult<BinaryOp> {
    match operator {
        Operator::LessThan => Ok(BinaryOp::Lt),
        Operator::LessThanOrEqual => Ok(BinaryOp::Le),
        Operator::Equal => Ok(BinaryOp::Eq),
        Operator::NotEqual => Ok(BinaryOp::Ne),
        Operator::GreaterThanOrEqual => Ok(BinaryOp::Ge),
        Operator::GreaterThan => Ok(BinaryOp::Gt),
        other => Err(QueryError::unsupported(format!(
            "operator {} has no relational form",
            other
        ))),
    }
}

fn convert_to(expr: ScalarExpr, from: ValueType, to: ValueType) -> ScalarExpr {
    if from == to { expr } else { expr.convert(to) }
}

/// Compares a typed expression with a literal, converting both to their
/// common type. String operators take the literal verbatim.
fn compare_with_literal(
    expr: ScalarExpr,
    expr_type: ValueType,
    operator: Operator,
    value: &Value,
    label: &str,
) -> QueryResult<ScalarExpr> {
    if let Some(method) = text_method(operator) {
        if expr_type != ValueType::Text {
            return Err(QueryError::unsupported(format!(
                "operator {} needs a text member, '{}' is {}",
                operator, label, expr_type
            )));
        }
        let argument = value
            .convert(ValueType::Text)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                QueryError::argument(format!(
                    "operator {} on '{}' needs a text value, got {}",
                    operator, label, value
                ))
            })?;
        return Ok(ScalarExpr::Text {
            method,
            target: Box::new(expr),
            argument: Box::new(ScalarExpr::Literal(argument)),
        });
    }

    let op = binary_op(operator)?;
    let Some(value_type) = value.value_type() else {
        if !operator.is_equality() {
            return Err(QueryError::unsupported(format!(
                "null can only be compared with = or !=, '{}' uses {}",
                label, operator
            )));
        }
        return Ok(ScalarExpr::compare(op, expr, ScalarExpr::Literal(Value::Null)));
    };

    let common = expr_type.common(value_type).ok_or_else(|| {
        QueryError::argument(format!(
            "cannot compare '{}' ({}) with {} ({})",
            label, expr_type, value, value_type
        ))
    })?;
    let literal = value.convert(common).ok_or_else(|| {
        QueryError::argument(format!(
            "value {} cannot be converted to {} for '{}'",
            value, common, label
        ))
    })?;
    Ok(ScalarExpr::compare(
        op,
        convert_to(expr, expr_type, common),
        ScalarExpr::Literal(literal),
    ))
}

/// A top-level leaf whose path starts with a collection navigation
struct CollectionLeaf<'c> {
    outer: EntityType,
    relation: Relation,
    rest: Vec<String>,
    condition: &'c Condition,
}

/// Default condition maker
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionExpressionBuilder;

impl ConditionExpressionBuilder {
    fn collection_leaf<'c>(
        schema: &Schema,
        condition: &'c BaseCondition,
        shape: &Shape,
    ) -> Option<CollectionLeaf<'c>> {
        let (BaseCondition::Condition(leaf), Shape::Entity(entity)) = (condition, shape) else {
            return None;
        };
        if leaf
            .entity
            .as_ref()
            .is_some_and(|owner| !schema.applies_to(entity, owner))
        {
            return None;
        }
        let path = split_path(&leaf.field);
        if path.len() < 2 {
            return None;
        }
        let member = schema.entity(entity).ok()?.member(&path[0])?;
        match &member.kind {
            MemberKind::Collection(relation) => Some(CollectionLeaf {
                outer: entity.clone(),
                relation: relation.clone(),
                rest: path[1..].to_vec(),
                condition: leaf,
            }),
            _ => None,
        }
    }

    /// Inner join with the collection's elements, filter on the inner side,
    /// project back to the outer type
    fn join_collection(
        backend: &dyn Backend,
        leaf: CollectionLeaf<'_>,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        debug!(
            "implicit join {} -> {} for condition on '{}'",
            leaf.outer, leaf.relation.target, leaf.condition.field
        );
        let params = backend.parameters();
        let outer_param = params.param(&leaf.outer, ParamRole::Source);
        let inner_param = params.param(&leaf.relation.target, ParamRole::Inner);
        let (outer_key, inner_key) = key_selectors(
            backend,
            &outer_param,
            &leaf.relation.this_key,
            &inner_param,
            &leaf.relation.other_key,
        )?;
        let joined = QueryExpr::Join {
            outer: Box::new(source),
            inner: Box::new(backend.table(&leaf.relation.target)?),
            outer_key,
            inner_key,
        };

        let scope = Scope::for_shape(backend, &backend.element_shape(&joined))?;
        let body = Lowering::new(backend, &scope).lower_comparison(
            &inner_param,
            &leaf.rest,
            leaf.condition.operator,
            &leaf.condition.value,
        )?;
        Ok(joined
            .filtered(Lambda::new(scope.params(), body))
            .projected(leaf.outer))
    }

    fn apply(
        &self,
        backend: &dyn Backend,
        condition: &BaseCondition,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        let shape = backend.element_shape(&source);
        if let Some(leaf) = Self::collection_leaf(backend.schema(), condition, &shape) {
            return Self::join_collection(backend, leaf, source);
        }
        let scope = Scope::for_shape(backend, &shape)?;
        let body = Lowering::new(backend, &scope).lower(condition)?;
        trace!("filter {} over {}", condition, scope);
        Ok(source.filtered(Lambda::new(scope.params(), body)))
    }
}

impl ConditionMaker for ConditionExpressionBuilder {
    fn make(
        &self,
        backend: &dyn Backend,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        conditions
            .iter()
            .try_fold(source, |expr, condition| self.apply(backend, condition, expr))
    }

    fn restrict_groups(
        &self,
        backend: &dyn Backend,
        conditions: &ConditionList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        if conditions.is_empty() {
            return Ok(source);
        }
        let (outer, inner) = match backend.element_shape(&source) {
            Shape::Group { outer, inner } => (outer, inner),
            other => {
                return Err(QueryError::structural(format!(
                    "group conditions need a group-join, got a sequence of {}",
                    other
                )));
            }
        };
        let scope = Scope::for_shape(
            backend,
            &Shape::Pair {
                outer,
                inner,
                optional: false,
            },
        )?;
        let lowering = Lowering::new(backend, &scope);
        let parts = conditions
            .iter()
            .map(|condition| lowering.lower(condition))
            .collect::<QueryResult<Vec<_>>>()?;
        let Some(body) = ScalarExpr::all_of(parts) else {
            return Ok(source);
        };
        trace!("restrict groups by {} condition(s) over {}", conditions.len(), scope);
        Ok(source.groups_filtered(Lambda::new(scope.params(), body)))
    }
}
