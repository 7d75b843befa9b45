mod common;

use common::{ints, northwind};
use query_designer::{
    Condition, ConditionList, Direction, JoinNode, JoinTree, Ordering, OrderingList,
    QueryDesigner, QueryDocument,
};
use serde::Deserialize;

fn german_orders_tree() -> JoinTree {
    let mut tree = JoinTree::new(JoinNode::inner("Order"));
    let root = tree.root();
    tree.insert_child(root, JoinNode::inner("Customer").via("Orders"))
        .unwrap();
    tree
}

#[test]
fn test_german_orders_newest_first() {
    let designer = QueryDesigner::from_tree(
        northwind(),
        &german_orders_tree(),
        &ConditionList::new().with(Condition::new("Country", "Germany").on("Customer")),
        &OrderingList::new().with(Ordering::desc("OrderDate").on("Order")),
    )
    .unwrap();

    let records = designer.records().unwrap();
    assert_eq!(ints(&records, "OrderId"), vec![10252, 10250, 10249]);
    assert_eq!(designer.count().unwrap(), 3);
}

#[test]
fn test_german_orders_from_bundled_document() {
    let document =
        QueryDocument::from_toml(include_str!("../demos/northwind/german_orders.toml")).unwrap();
    let records = document.build(northwind()).unwrap().records().unwrap();
    assert_eq!(ints(&records, "OrderId"), vec![10252, 10250, 10249]);
}

#[test]
fn test_ordering_text_parsing() {
    let orderings = OrderingList::parse("Name, Age DESC");
    let parsed: Vec<(&str, Direction)> = orderings
        .iter()
        .map(|o| (o.column.as_str(), o.direction))
        .collect();
    assert_eq!(
        parsed,
        vec![("Name", Direction::Ascending), ("Age", Direction::Descending)]
    );
}

#[test]
fn test_duplicate_conditions_removed_in_order() {
    let mut conditions = ConditionList::new()
        .with(Condition::new("X", 1))
        .with(Condition::new("X", 1))
        .with(Condition::new("Y", 2));
    conditions.remove_duplicates();
    assert_eq!(
        conditions,
        ConditionList::new()
            .with(Condition::new("X", 1))
            .with(Condition::new("Y", 2))
    );
}

#[derive(Debug, Deserialize)]
struct OrderSummary {
    #[serde(rename = "OrderId")]
    order_id: i64,
    #[serde(rename = "Freight")]
    freight: f64,
}

#[test]
fn test_count_leaves_designer_untouched() {
    let designer = QueryDesigner::new(northwind(), "Order").unwrap();
    assert_eq!(designer.count().unwrap(), 5);
    assert!(designer.any().unwrap());

    let orders: Vec<OrderSummary> = designer.cast().unwrap();
    assert_eq!(orders.len(), 5);
    assert_eq!(orders[0].order_id, 10248);
    assert!((orders[0].freight - 32.38).abs() < 1e-9);
}

#[test]
fn test_paging_and_first() {
    let designer = QueryDesigner::new(northwind(), "Order")
        .unwrap()
        .order_by_expression("Freight DESC")
        .unwrap();
    let page = designer.skip(1).unwrap().take(2).unwrap();
    assert_eq!(ints(&page.records().unwrap(), "OrderId"), vec![10252, 10251]);
    assert_eq!(ints(&[designer.first().unwrap()], "OrderId"), vec![10250]);

    let nothing = designer.filter(&ConditionList::new().with(Condition::gt("Freight", 1000))).unwrap();
    assert!(nothing.first().unwrap_err().to_string().starts_with("Execution error"));
    assert_eq!(nothing.first_or_default().unwrap(), None);
    assert!(!nothing.any().unwrap());
}

#[test]
fn test_union_and_except() {
    let backend = northwind();
    let orders = QueryDesigner::new(backend.clone(), "Order").unwrap();
    let cheap = orders
        .filter(&ConditionList::new().with(Condition::lt("Freight", 40)))
        .unwrap();
    let bonap = orders
        .filter(&ConditionList::new().with(Condition::new("CustomerId", "BONAP")))
        .unwrap();

    let either = cheap.union(&bonap).unwrap();
    assert_eq!(
        ints(&either.order_by_expression("OrderId").unwrap().records().unwrap(), "OrderId"),
        vec![10248, 10249, 10251]
    );
    let cheap_elsewhere = cheap.except(&bonap).unwrap();
    assert_eq!(ints(&cheap_elsewhere.records().unwrap(), "OrderId"), vec![10249]);

    let other = QueryDesigner::new(northwind(), "Order").unwrap();
    assert!(orders.union(&other).unwrap_err().is_argument());
}

#[test]
fn test_failed_filter_keeps_expression() {
    let mut designer = QueryDesigner::new(northwind(), "Order").unwrap();
    let before = designer.expression().clone();
    let err = designer
        .filter_in_place(&ConditionList::new().with(Condition::new("Colour", "red")))
        .unwrap_err();
    assert!(err.is_resolution());
    assert_eq!(designer.expression(), &before);

    designer
        .filter_in_place(&ConditionList::new().with(Condition::starts_with("CustomerId", "B")))
        .unwrap();
    assert_eq!(designer.count().unwrap(), 3);
}

#[test]
fn test_reference_navigation_in_condition() {
    let designer = QueryDesigner::new(northwind(), "Order")
        .unwrap()
        .filter(&ConditionList::new().with(Condition::new("Customer.Country", "France")))
        .unwrap();
    assert_eq!(ints(&designer.records().unwrap(), "OrderId"), vec![10248, 10251]);
}
