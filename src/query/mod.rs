//! Query model: conditions, orderings, join topology and logical expressions

pub mod condition;
pub mod explain;
pub mod expr;
pub mod node;
pub mod ordering;

pub use condition::{
    AggregateCondition, AggregateFunction, BaseCondition, BiCondition, Comparison, Condition,
    ConditionList, FieldCondition, Operator,
};
pub use explain::explain;
pub use expr::{
    BinaryOp, CollectionSource, Lambda, Param, QueryExpr, ScalarExpr, SetOp, Shape, TerminalOp,
    TextMethod,
};
pub use node::{BaseNode, JoinKind, JoinNode, JoinTree, NodeId, OUTER_JOIN_PENALTY, Tree, TreeNode};
pub use ordering::{Direction, Ordering, OrderingList};
