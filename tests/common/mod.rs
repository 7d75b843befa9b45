//! Shared fixtures for the integration tests
#![allow(dead_code)]

use query_designer::{Backend, EntityDef, MemoryBackend, Record, Schema, Value, ValueType};
use std::rc::Rc;

pub fn northwind_schema() -> Schema {
    Schema::from_toml(include_str!("../../demos/northwind/schema.toml")).unwrap()
}

/// Four customers (two German) and five orders, three of them German
pub fn northwind() -> Rc<dyn Backend> {
    let backend = MemoryBackend::from_json(
        northwind_schema(),
        include_str!("../../demos/northwind/data.json"),
    )
    .unwrap();
    Rc::new(backend)
}

/// Parents A1, A2; child B1 belongs to A1; toy T1 belongs to B1
pub fn family() -> Rc<dyn Backend> {
    let schema = Schema::new()
        .with_entity(
            EntityDef::new("Parent")
                .scalar("ParentId", ValueType::Int)
                .scalar("Name", ValueType::Text)
                .collection("Children", "Child", "ParentId", "ParentId"),
        )
        .with_entity(
            EntityDef::new("Child")
                .scalar("ChildId", ValueType::Int)
                .scalar("ParentId", ValueType::Int)
                .scalar("Label", ValueType::Text)
                .collection("Toys", "Toy", "ChildId", "ChildId"),
        )
        .with_entity(
            EntityDef::new("Toy")
                .scalar("ToyId", ValueType::Int)
                .scalar("ChildId", ValueType::Int),
        );

    let backend = MemoryBackend::new(schema)
        .with_rows(
            "Parent",
            [
                Record::new().with("ParentId", 1).with("Name", "A1"),
                Record::new().with("ParentId", 2).with("Name", "A2"),
            ],
        )
        .unwrap()
        .with_rows(
            "Child",
            [Record::new().with("ChildId", 10).with("ParentId", 1).with("Label", "B1")],
        )
        .unwrap()
        .with_rows("Toy", [Record::new().with("ToyId", 100).with("ChildId", 10)])
        .unwrap();
    Rc::new(backend)
}

/// Integer member of every record, in order
pub fn ints(records: &[Record], member: &str) -> Vec<i64> {
    records
        .iter()
        .map(|record| match record.get(member) {
            Value::Int(i) => *i,
            other => panic!("{} is not an int: {}", member, other),
        })
        .collect()
}

pub fn texts(records: &[Record], member: &str) -> Vec<String> {
    records
        .iter()
        .map(|record| match record.get(member) {
            Value::Text(s) => s.clone(),
            other => panic!("{} is not text: {}", member, other),
        })
        .collect()
}
