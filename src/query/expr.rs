//! Logical query expressions
//!
//! An owned expression tree describing "apply operation X to expression Y".
//! Builders only ever wrap expressions; backends lower or evaluate them.

use crate::query::condition::AggregateFunction;
use crate::query::ordering::Direction;
use crate::schema::{EntityType, Value, ValueType};
use std::fmt;

/// A lambda parameter bound to elements of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub entity: EntityType,
}

impl Param {
    pub fn new(name: impl Into<String>, entity: impl Into<EntityType>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: ScalarExpr,
}

impl Lambda {
    pub fn new(params: Vec<Param>, body: ScalarExpr) -> Self {
        Self { params, body }
    }

    pub fn single(param: Param, body: ScalarExpr) -> Self {
        Self::new(vec![param], body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextMethod {
    StartsWith,
    Contains,
    EndsWith,
}

impl TextMethod {
    pub fn name(self) -> &'static str {
        match self {
            TextMethod::StartsWith => "starts_with",
            TextMethod::Contains => "contains",
            TextMethod::EndsWith => "ends_with",
        }
    }
}

/// Where an aggregate draws its elements from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSource {
    /// A group binding of a group-join
    Param(Param),
    /// A collection navigation reached from a parameter
    Navigation { param: Param, path: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarExpr {
    Literal(Value),
    Member {
        param: Param,
        path: Vec<String>,
    },
    Convert {
        expr: Box<ScalarExpr>,
        to: ValueType,
    },
    Compare {
        op: BinaryOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Text {
        method: TextMethod,
        target: Box<ScalarExpr>,
        argument: Box<ScalarExpr>,
    },
    And(Box<ScalarExpr>, Box<ScalarExpr>),
    Or(Box<ScalarExpr>, Box<ScalarExpr>),
    Aggregate {
        function: AggregateFunction,
        source: CollectionSource,
        element: Param,
        filter: Option<Box<ScalarExpr>>,
        selector: Option<Box<ScalarExpr>>,
    },
}

impl ScalarExpr {
    pub fn literal(value: impl Into<Value>) -> Self {
        ScalarExpr::Literal(value.into())
    }

    pub fn member(param: &Param, path: Vec<String>) -> Self {
        ScalarExpr::Member {
            param: param.clone(),
            path,
        }
    }

    pub fn compare(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Or(Box::new(left), Box::new(right))
    }

    pub fn convert(self, to: ValueType) -> Self {
        ScalarExpr::Convert {
            expr: Box::new(self),
            to,
        }
    }

    /// ANDs a non-empty list left to right
    pub fn all_of(exprs: Vec<ScalarExpr>) -> Option<Self> {
        exprs.into_iter().reduce(ScalarExpr::and)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOp {
    Distinct,
    Skip(usize),
    Take(usize),
    Union(Box<QueryExpr>),
    Except(Box<QueryExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalOp {
    Count,
    Any,
    First,
    FirstOrDefault,
}

/// Element kind of an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Entity(EntityType),
    /// Joined pair; `optional` when the inner side may be absent
    Pair {
        outer: EntityType,
        inner: EntityType,
        optional: bool,
    },
    Group {
        outer: EntityType,
        inner: EntityType,
    },
    Scalar,
}

impl Shape {
    /// The entity type rows of this shape are projected back to
    pub fn primary(&self) -> Option<&EntityType> {
        match self {
            Shape::Entity(entity) => Some(entity),
            Shape::Pair { outer, .. } | Shape::Group { outer, .. } => Some(outer),
            Shape::Scalar => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Entity(entity) => write!(f, "{}", entity),
            Shape::Pair {
                outer,
                inner,
                optional,
            } => write!(f, "({}, {}{})", outer, inner, if *optional { "?" } else { "" }),
            Shape::Group { outer, inner } => write!(f, "({}, [{}])", outer, inner),
            Shape::Scalar => f.write_str("scalar"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    Source {
        entity: EntityType,
    },
    Filter {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },
    Join {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
    },
    GroupJoin {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
    },
    /// Keeps the elements of every group that satisfy `predicate`, which
    /// takes the outer row and one element; groups may end up empty
    FilterGroups {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },
    Flatten {
        source: Box<QueryExpr>,
        default_if_empty: bool,
    },
    Project {
        source: Box<QueryExpr>,
        to: EntityType,
    },
    Sort {
        source: Box<QueryExpr>,
        key: Lambda,
        direction: Direction,
        then_by: bool,
    },
    Set {
        source: Box<QueryExpr>,
        op: SetOp,
    },
    Terminal {
        source: Box<QueryExpr>,
        op: TerminalOp,
    },
}

impl QueryExpr {
    pub fn source(entity: impl Into<EntityType>) -> Self {
        QueryExpr::Source {
            entity: entity.into(),
        }
    }

    pub fn filtered(self, predicate: Lambda) -> Self {
        QueryExpr::Filter {
            source: Box::new(self),
            predicate,
        }
    }

    pub fn groups_filtered(self, predicate: Lambda) -> Self {
        QueryExpr::FilterGroups {
            source: Box::new(self),
            predicate,
        }
    }

    pub fn projected(self, to: EntityType) -> Self {
        QueryExpr::Project {
            source: Box::new(self),
            to,
        }
    }

    pub fn flattened(self, default_if_empty: bool) -> Self {
        QueryExpr::Flatten {
            source: Box::new(self),
            default_if_empty,
        }
    }

    pub fn sorted(self, key: Lambda, direction: Direction, then_by: bool) -> Self {
        QueryExpr::Sort {
            source: Box::new(self),
            key,
            direction,
            then_by,
        }
    }

    pub fn with_set(self, op: SetOp) -> Self {
        QueryExpr::Set {
            source: Box::new(self),
            op,
        }
    }

    pub fn terminal(self, op: TerminalOp) -> Self {
        QueryExpr::Terminal {
            source: Box::new(self),
            op,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            QueryExpr::Source { entity } => Shape::Entity(entity.clone()),
            QueryExpr::Filter { source, .. }
            | QueryExpr::FilterGroups { source, .. }
            | QueryExpr::Sort { source, .. }
            | QueryExpr::Set { source, .. } => source.shape(),
            QueryExpr::Join { outer, inner, .. } => {
                match (outer.element_type(), inner.element_type()) {
                    (Some(outer), Some(inner)) => Shape::Pair {
                        outer,
                        inner,
                        optional: false,
                    },
                    _ => Shape::Scalar,
                }
            }
            QueryExpr::GroupJoin { outer, inner, .. } => {
                match (outer.element_type(), inner.element_type()) {
                    (Some(outer), Some(inner)) => Shape::Group { outer, inner },
                    _ => Shape::Scalar,
                }
            }
            QueryExpr::Flatten {
                source,
                default_if_empty,
            } => match source.shape() {
                Shape::Group { outer, inner } => Shape::Pair {
                    outer,
                    inner,
                    optional: *default_if_empty,
                },
                other => other,
            },
            QueryExpr::Project { to, .. } => Shape::Entity(to.clone()),
            QueryExpr::Terminal { .. } => Shape::Scalar,
        }
    }

    /// Primary entity type of the element shape
    pub fn element_type(&self) -> Option<EntityType> {
        self.shape().primary().cloned()
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "|{}| {}", params.join(", "), self.body)
    }
}

impl fmt::Display for CollectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionSource::Param(param) => write!(f, "{}", param),
            CollectionSource::Navigation { param, path } => {
                write!(f, "{}.{}", param, path.join("."))
            }
        }
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Literal(value) => write!(f, "{}", value),
            ScalarExpr::Member { param, path } => {
                if path.is_empty() {
                    write!(f, "{}", param)
                } else {
                    write!(f, "{}.{}", param, path.join("."))
                }
            }
            ScalarExpr::Convert { expr, to } => write!(f, "{} as {}", expr, to),
            ScalarExpr::Compare { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            ScalarExpr::Text {
                method,
                target,
                argument,
            } => write!(f, "{}.{}({})", target, method.name(), argument),
            ScalarExpr::And(left, right) => write!(f, "({} && {})", left, right),
            ScalarExpr::Or(left, right) => write!(f, "({} || {})", left, right),
            ScalarExpr::Aggregate {
                function,
                source,
                element,
                filter,
                selector,
            } => {
                write!(f, "{}.{}(", source, function)?;
                match (filter, selector) {
                    (Some(filter), Some(selector)) => {
                        write!(f, "|{}| {} => {}", element, filter, selector)?
                    }
                    (Some(filter), None) => write!(f, "|{}| {}", element, filter)?,
                    (None, Some(selector)) => write!(f, "|{}| {}", element, selector)?,
                    (None, None) => {}
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::Source { entity } => write!(f, "{}", entity),
            QueryExpr::Filter { source, predicate } => write!(f, "{}.filter({})", source, predicate),
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
            } => write!(f, "{}.join({}, {}, {})", outer, inner, outer_key, inner_key),
            QueryExpr::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
            } => write!(f, "{}.group_join({}, {}, {})", outer, inner, outer_key, inner_key),
            QueryExpr::FilterGroups { source, predicate } => {
                write!(f, "{}.filter_groups({})", source, predicate)
            }
            QueryExpr::Flatten {
                source,
                default_if_empty,
            } => {
                if *default_if_empty {
                    write!(f, "{}.flatten_default()", source)
                } else {
                    write!(f, "{}.flatten()", source)
                }
            }
            QueryExpr::Project { source, to } => write!(f, "{}.project({})", source, to),
            QueryExpr::Sort {
                source,
                key,
                direction,
                then_by,
            } => {
                let method = match (then_by, direction) {
                    (false, Direction::Ascending) => "order_by",
                    (false, Direction::Descending) => "order_by_desc",
                    (true, Direction::Ascending) => "then_by",
                    (true, Direction::Descending) => "then_by_desc",
                };
                write!(f, "{}.{}({})", source, method, key)
            }
            QueryExpr::Set { source, op } => match op {
                SetOp::Distinct => write!(f, "{}.distinct()", source),
                SetOp::Skip(n) => write!(f, "{}.skip({})", source, n),
                SetOp::Take(n) => write!(f, "{}.take({})", source, n),
                SetOp::Union(other) => write!(f, "{}.union({})", source, other),
                SetOp::Except(other) => write!(f, "{}.except({})", source, other),
            },
            QueryExpr::Terminal { source, op } => {
                let method = match op {
                    TerminalOp::Count => "count",
                    TerminalOp::Any => "any",
                    TerminalOp::First => "first",
                    TerminalOp::FirstOrDefault => "first_or_default",
                };
                write!(f, "{}.{}()", source, method)
            }
        }
    }
}
