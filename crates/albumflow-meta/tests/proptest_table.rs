//! Property-based tests for the metadata table using proptest.
//!
//! A random sequence of single-key operations is applied both to the table
//! and to a plain HashMap model; the two must agree afterwards, and the
//! change log must account for every effective mutation.

use albumflow_meta::{ChangeKind, MetadataRecord, MetadataStore, RecordField, RecordTable};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Put(String),
    Update(String, String),
    Delete(String),
}

fn any_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a.png".to_string()),
        Just("b.jpeg".to_string()),
        Just("dir/c.png".to_string()),
    ]
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any_key().prop_map(Op::Put),
        (any_key(), "[a-z ]{0,12}").prop_map(|(k, d)| Op::Update(k, d)),
        any_key().prop_map(Op::Delete),
    ]
}

proptest! {
    /// Test: the table behaves like a map where update/delete of an absent key do nothing.
    #[test]
    fn test_table_matches_model(ops in proptest::collection::vec(any_op(), 0..60)) {
        let table = RecordTable::in_memory(1_000);
        let log = table.change_log();
        log.register_consumer("model");
        let mut model: HashMap<String, Option<String>> = HashMap::new();
        let mut expected_changes = 0usize;

        for op in ops {
            match op {
                Op::Put(key) => {
                    table.put(MetadataRecord::new(key.clone())).unwrap();
                    model.insert(key, None);
                    expected_changes += 1;
                }
                Op::Update(key, desc) => {
                    let applied = table
                        .update(&key, RecordField::Description, desc.clone())
                        .unwrap();
                    prop_assert_eq!(applied, model.contains_key(&key));
                    if let Some(slot) = model.get_mut(&key) {
                        *slot = Some(desc);
                        expected_changes += 1;
                    }
                }
                Op::Delete(key) => {
                    let deleted = table.delete(&key).unwrap();
                    prop_assert_eq!(deleted, model.remove(&key).is_some());
                    if deleted {
                        expected_changes += 1;
                    }
                }
            }
        }

        prop_assert_eq!(table.len().unwrap(), model.len());
        for (key, desc) in &model {
            let record = table.get(key).unwrap().unwrap();
            prop_assert_eq!(&record.description, desc);
        }

        let changes = log.consume("model", 10_000);
        prop_assert_eq!(changes.len(), expected_changes);
        for change in &changes {
            match change.kind {
                ChangeKind::Insert => prop_assert!(change.old.is_none() && change.new.is_some()),
                ChangeKind::Modify => prop_assert!(change.old.is_some() && change.new.is_some()),
                ChangeKind::Remove => prop_assert!(change.old.is_some() && change.new.is_none()),
            }
        }
    }
}
