//! Join topology
//!
//! A rooted tree stored as an arena: nodes are addressed by [`NodeId`],
//! parents are plain handles and children are ordered handle lists.

use crate::error::{QueryError, QueryResult};
use crate::query::condition::{BaseCondition, ConditionList};
use crate::schema::EntityType;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Added to the sort key of non-inner joins so they follow inner siblings
pub const OUTER_JOIN_PENALTY: u64 = 1 << 32;

/// Behavior a tree payload supplies to the arena
pub trait TreeNode {
    fn entity(&self) -> &EntityType;

    /// Sibling ordering key
    fn sort_key(&self) -> u64;

    /// Called once when the node is inserted below `parent`
    fn attach_to(&mut self, _parent: &Self) {}

    fn validate(&self) -> QueryResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct BaseNode<T> {
    level: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: T,
}

impl<T> BaseNode<T> {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

#[derive(Debug, Clone)]
pub struct Tree<T> {
    nodes: Vec<BaseNode<T>>,
}

impl<T: TreeNode> Tree<T> {
    pub fn new(root: T) -> Self {
        Self {
            nodes: vec![BaseNode {
                level: 0,
                parent: None,
                children: Vec::new(),
                value: root,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn get(&self, id: NodeId) -> Option<&BaseNode<T>> {
        self.nodes.get(id.0)
    }

    pub fn value(&self, id: NodeId) -> &T {
        &self[id].value
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self[id].children
    }

    pub fn level(&self, id: NodeId) -> usize {
        self[id].level
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Attaches `child` below `parent` and returns its handle.
    ///
    /// Fails when a sibling already has the child's entity type or when the
    /// child does not validate. Siblings are re-sorted by sort key (stable).
    pub fn insert_child(&mut self, parent: NodeId, mut child: T) -> QueryResult<NodeId> {
        let parent_node = self
            .nodes
            .get(parent.0)
            .ok_or_else(|| QueryError::argument(format!("node {} is not part of this tree", parent.0)))?;

        if parent_node
            .children
            .iter()
            .any(|c| self.nodes[c.0].value.entity() == child.entity())
        {
            return Err(QueryError::structural(format!(
                "duplicate child entity type '{}' under '{}'",
                child.entity(),
                parent_node.value.entity()
            )));
        }

        child.attach_to(&parent_node.value);
        child.validate()?;
        let level = parent_node.level + 1;

        let id = NodeId(self.nodes.len());
        self.nodes.push(BaseNode {
            level,
            parent: Some(parent),
            children: Vec::new(),
            value: child,
        });

        let mut siblings = std::mem::take(&mut self.nodes[parent.0].children);
        siblings.push(id);
        siblings.sort_by_key(|c| self.nodes[c.0].value.sort_key());
        self.nodes[parent.0].children = siblings;
        Ok(id)
    }

    /// Searches the whole tree: ascend to the root, then depth-first
    pub fn find(&self, from: NodeId, entity: &EntityType) -> Option<NodeId> {
        let mut top = from;
        while let Some(parent) = self.get(top)?.parent {
            top = parent;
        }
        if self[top].value.entity() == entity {
            return Some(top);
        }
        self.find_in_children(top, entity, true)
    }

    /// Searches below `from`; only direct children unless `recursive`
    pub fn find_in_children(
        &self,
        from: NodeId,
        entity: &EntityType,
        recursive: bool,
    ) -> Option<NodeId> {
        for &child in &self.get(from)?.children {
            if self[child].value.entity() == entity {
                return Some(child);
            }
            if recursive {
                if let Some(found) = self.find_in_children(child, entity, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn require(&self, from: NodeId, entity: &EntityType) -> QueryResult<NodeId> {
        self.find(from, entity).ok_or_else(|| {
            QueryError::structural(format!("entity type '{}' is not part of the join tree", entity))
        })
    }

    /// All nodes below `id`, depth-first in sibling order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }
}

impl<T> Index<NodeId> for Tree<T> {
    type Output = BaseNode<T>;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.0]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    LeftOuter,
}

/// One entity type in a join topology
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub entity: EntityType,
    pub join_kind: JoinKind,
    /// Navigation used to derive join keys
    pub associated_property: Option<String>,
    pub parent_fields: Vec<String>,
    pub current_fields: Vec<String>,
    pub conditions: ConditionList,
}

impl JoinNode {
    pub fn new(entity: impl Into<EntityType>, join_kind: JoinKind) -> Self {
        Self {
            entity: entity.into(),
            join_kind,
            associated_property: None,
            parent_fields: Vec::new(),
            current_fields: Vec::new(),
            conditions: ConditionList::new(),
        }
    }

    pub fn inner(entity: impl Into<EntityType>) -> Self {
        Self::new(entity, JoinKind::Inner)
    }

    pub fn left_outer(entity: impl Into<EntityType>) -> Self {
        Self::new(entity, JoinKind::LeftOuter)
    }

    pub fn via(mut self, property: impl Into<String>) -> Self {
        self.associated_property = Some(property.into());
        self
    }

    /// Explicit field-to-field join: parent_fields[i] = current_fields[i]
    pub fn on_fields<P, C>(mut self, parent_fields: P, current_fields: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.parent_fields = parent_fields.into_iter().map(Into::into).collect();
        self.current_fields = current_fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<BaseCondition>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionList) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn is_inner(&self) -> bool {
        self.join_kind == JoinKind::Inner
    }

    pub fn has_field_pairs(&self) -> bool {
        !self.parent_fields.is_empty()
    }

    /// Paired (parent, current) join fields
    pub fn field_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parent_fields
            .iter()
            .map(String::as_str)
            .zip(self.current_fields.iter().map(String::as_str))
    }
}

impl TreeNode for JoinNode {
    fn entity(&self) -> &EntityType {
        &self.entity
    }

    fn sort_key(&self) -> u64 {
        let key = self.entity.type_key() as u64;
        if self.is_inner() {
            key
        } else {
            key + OUTER_JOIN_PENALTY
        }
    }

    fn attach_to(&mut self, parent: &Self) {
        if parent.join_kind == JoinKind::LeftOuter {
            self.join_kind = JoinKind::LeftOuter;
        }
    }

    fn validate(&self) -> QueryResult<()> {
        if self.entity.name().is_empty() {
            return Err(QueryError::argument("join node entity type is empty"));
        }
        if self.parent_fields.len() != self.current_fields.len() {
            return Err(QueryError::structural(format!(
                "join to '{}' pairs {} parent fields with {} current fields",
                self.entity,
                self.parent_fields.len(),
                self.current_fields.len()
            )));
        }
        Ok(())
    }
}

pub type JoinTree = Tree<JoinNode>;
