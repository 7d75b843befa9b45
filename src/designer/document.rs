use crate::designer::QueryDesigner;
use crate::engine::Backend;
use crate::error::{QueryError, QueryResult};
use crate::query::{ConditionList, JoinKind, JoinNode, JoinTree, NodeId, OrderingList};
use crate::schema::EntityType;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// A query described in TOML: a join tree, filters, ordering and paging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub root: NodeDocument,
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,
    /// Ordering clauses, e.g. `"OrderDate DESC, OrderId"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
    #[serde(default)]
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub entity: EntityType,
    #[serde(default)]
    pub join: JoinKind,
    /// Navigation used to find the join keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDocument>,
}

impl NodeDocument {
    fn to_node(&self) -> JoinNode {
        let mut node = JoinNode::new(self.entity.clone(), self.join)
            .on_fields(self.parent_fields.clone(), self.current_fields.clone())
            .with_conditions(self.conditions.clone());
        node.associated_property = self.property.clone();
        node
    }

    fn insert_children(&self, tree: &mut JoinTree, parent: NodeId) -> QueryResult<()> {
        for child in &self.children {
            let id = tree.insert_child(parent, child.to_node())?;
            child.insert_children(tree, id)?;
        }
        Ok(())
    }
}

impl QueryDocument {
    pub fn from_toml(content: &str) -> QueryResult<Self> {
        toml::from_str(content)
            .map_err(|e| QueryError::argument(format!("invalid query document: {}", e)))
    }

    pub fn to_tree(&self) -> QueryResult<JoinTree> {
        let mut tree = JoinTree::new(self.root.to_node());
        let root = tree.root();
        self.root.insert_children(&mut tree, root)?;
        Ok(tree)
    }

    /// Parsed `order_by`; missing or blank means unordered
    pub fn orderings(&self) -> OrderingList {
        match self.order_by.as_deref() {
            Some(clauses) if !clauses.trim().is_empty() => OrderingList::parse(clauses),
            _ => OrderingList::new(),
        }
    }

    pub fn build(&self, backend: Rc<dyn Backend>) -> QueryResult<QueryDesigner> {
        let tree = self.to_tree()?;
        let mut designer =
            QueryDesigner::from_tree(backend, &tree, &self.conditions, &self.orderings())?;
        if self.distinct {
            designer = designer.distinct()?;
        }
        if let Some(skip) = self.skip {
            designer = designer.skip(skip)?;
        }
        if let Some(take) = self.take {
            designer = designer.take(take)?;
        }
        Ok(designer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Condition, Direction};

    const DOCUMENT: &str = r#"
        name = "recent_german_orders"
        order_by = "OrderDate DESC"
        take = 2

        [root]
        entity = "Order"

        [[root.children]]
        entity = "Customer"
        join = "left_outer"
        property = "Orders"

        [[root.children.children]]
        entity = "Region"

        [[conditions]]
        kind = "condition"
        entity = "Customer"
        field = "Country"
        value = "Germany"
    "#;

    #[test]
    fn test_document_builds_tree() {
        let doc = QueryDocument::from_toml(DOCUMENT).unwrap();
        assert_eq!(doc.name.as_deref(), Some("recent_german_orders"));
        assert_eq!(doc.take, Some(2));
        assert_eq!(
            doc.conditions,
            ConditionList::new().with(Condition::new("Country", "Germany").on("Customer"))
        );

        let tree = doc.to_tree().unwrap();
        assert_eq!(tree.len(), 3);
        let region = tree.find(tree.root(), &EntityType::new("Region")).unwrap();
        assert_eq!(tree.value(region).join_kind, JoinKind::LeftOuter);
        assert_eq!(tree.level(region), 2);

        let orderings = doc.orderings();
        assert_eq!(orderings.len(), 1);
        assert_eq!(orderings.iter().next().unwrap().direction, Direction::Descending);
    }

    #[test]
    fn test_blank_order_by_is_unordered() {
        let doc = QueryDocument::from_toml("order_by = \"  \"\n[root]\nentity = \"Order\"\n").unwrap();
        assert!(doc.orderings().is_empty());
    }

    #[test]
    fn test_duplicate_children_rejected() {
        let doc = QueryDocument::from_toml(
            r#"
            [root]
            entity = "Order"
            [[root.children]]
            entity = "Customer"
            [[root.children]]
            entity = "Customer"
            "#,
        )
        .unwrap();
        assert!(doc.to_tree().unwrap_err().is_structural());
    }

    #[test]
    fn test_malformed_document() {
        let err = QueryDocument::from_toml("[root]\n").unwrap_err();
        assert!(err.is_argument());
    }
}
