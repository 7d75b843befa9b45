//! Declarative join-tree query designer
//!
//! A query is described as a tree of joined entity types plus lists of
//! conditions and orderings. The [`engine`] folds that description into a
//! backend-neutral [`QueryExpr`], which a [`Backend`] executes. The
//! [`QueryDesigner`] wraps the result in an immutable, chainable builder.

pub mod cli;
pub mod commands;
pub mod config;
pub mod designer;
pub mod engine;
pub mod error;
pub mod memory;
pub mod query;
pub mod registry;
pub mod schema;

pub use designer::{NodeDocument, QueryDesigner, QueryDocument};
pub use engine::{Backend, Outcome, Row, fold_tree};
pub use error::{QueryError, QueryResult};
pub use memory::MemoryBackend;
pub use query::{
    AggregateCondition, BaseCondition, Condition, ConditionList, Direction, FieldCondition,
    JoinKind, JoinNode, JoinTree, Operator, Ordering, OrderingList, QueryExpr,
};
pub use registry::BackendRegistry;
pub use schema::{EntityDef, EntityType, Record, Schema, Value, ValueType};
