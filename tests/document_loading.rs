mod common;

use common::{ints, northwind};
use query_designer::{JoinKind, QueryDocument};

const CHEAPEST_GERMAN: &str = r#"
name = "cheapest_german"
order_by = "Freight"
take = 1
distinct = true

[root]
entity = "Order"

[[root.children]]
entity = "Customer"
parent_fields = ["CustomerId"]
current_fields = ["CustomerId"]

[[root.children.conditions]]
kind = "condition"
field = "Country"
value = "Germany"
"#;

#[test]
fn test_node_conditions_and_paging() {
    let document = QueryDocument::from_toml(CHEAPEST_GERMAN).unwrap();
    let designer = document.build(northwind()).unwrap();
    assert_eq!(ints(&designer.records().unwrap(), "OrderId"), vec![10249]);
    assert!(designer.explain().starts_with("Take 1\n"));
}

#[test]
fn test_round_trip_through_toml() {
    let document = QueryDocument::from_toml(CHEAPEST_GERMAN).unwrap();
    let text = toml::to_string(&document).unwrap();
    let reparsed = QueryDocument::from_toml(&text).unwrap();
    assert_eq!(reparsed, document);
    assert_eq!(reparsed.root.children[0].join, JoinKind::Inner);
}

#[test]
fn test_mismatched_field_pairs() {
    let document = QueryDocument::from_toml(
        r#"
        [root]
        entity = "Order"
        [[root.children]]
        entity = "Customer"
        parent_fields = ["CustomerId", "OrderId"]
        current_fields = ["CustomerId"]
        "#,
    )
    .unwrap();
    assert!(document.build(northwind()).unwrap_err().is_structural());
}

#[test]
fn test_unknown_member_in_document() {
    let document = QueryDocument::from_toml(
        r#"
        [root]
        entity = "Customer"
        [[conditions]]
        kind = "condition"
        field = "Contry"
        value = "Germany"
        "#,
    )
    .unwrap();
    let err = document.build(northwind()).unwrap_err();
    assert!(err.is_resolution());
    assert!(err.to_string().contains("did you mean 'Country'?"));
}
