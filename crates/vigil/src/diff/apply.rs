//! Applying a delta to a schema snapshot.
//!
//! This is a simulation of what the DDL emitter does to the database, used for
//! dry runs: `diff(apply(a, diff(a, b)), b)` must come out empty.

use vigil_schema::tree::{MetaNode, SCHEMAS, TABLES};

use super::{DeltaEntry, DeltaNode, Object};

/// Apply `delta` to a copy of `tree`.
pub fn apply(tree: &MetaNode, delta: &DeltaNode) -> MetaNode {
    let mut root = tree.as_object().cloned().unwrap_or_default();
    move_tables_across_schemas(&mut root, delta);
    apply_entries(&mut root, delta);
    MetaNode::Object(root)
}

/// Tables renamed into another schema are moved first, under their new key,
/// so the regular pass below finds them where the delta expects them.
fn move_tables_across_schemas(root: &mut Object, delta: &DeltaNode) {
    let Some(schemas) = delta.child(SCHEMAS) else {
        return;
    };
    for (schema_name, entry) in &schemas.entries {
        let DeltaEntry::Node(schema) = entry else {
            continue;
        };
        let Some(tables) = schema.child(TABLES) else {
            continue;
        };
        for (table_name, entry) in &tables.entries {
            let DeltaEntry::Node(table) = entry else {
                continue;
            };
            let Some(from) = &table.renamed_from else {
                continue;
            };
            let Some(old_schema) = &from.schema else {
                continue;
            };
            let moved = object_entry(object_entry(root, SCHEMAS), old_schema)
                .get_mut(TABLES)
                .and_then(MetaNode::as_object_mut)
                .and_then(|tables| tables.shift_remove(&from.key));
            if let Some(moved) = moved {
                let target = object_entry(object_entry(object_entry(root, SCHEMAS), schema_name), TABLES);
                target.insert(table_name.clone(), moved);
            }
        }
    }
}

/// The object at `key`, created empty if missing (a scalar in the way is replaced).
fn object_entry<'a>(map: &'a mut Object, key: &str) -> &'a mut Object {
    let node = map.entry(key.to_string()).or_default();
    if let MetaNode::Scalar(_) = node {
        *node = MetaNode::default();
    }
    match node {
        MetaNode::Object(object) => object,
        MetaNode::Scalar(_) => unreachable!("scalars were replaced above"),
    }
}

fn apply_entries(target: &mut Object, delta: &DeltaNode) {
    for (key, entry) in &delta.entries {
        match entry {
            DeltaEntry::Value(value) => {
                target.insert(key.clone(), MetaNode::Scalar(value.clone()));
            }
            DeltaEntry::Cleared(_) => {
                target.shift_remove(key);
            }
            DeltaEntry::Node(child) => apply_child(target, key, child),
        }
    }
}

fn apply_child(target: &mut Object, key: &str, child: &DeltaNode) {
    let action = child.action;
    if action.remove && !action.add {
        target.shift_remove(key);
        return;
    }
    if action.add && (action.remove || !target.contains_key(key)) {
        target.insert(key.to_string(), materialize(child));
        return;
    }

    match &child.renamed_from {
        Some(from) if from.schema.is_none() && from.key != key => {
            let mut node = match target.shift_remove(&from.key) {
                Some(MetaNode::Object(object)) => object,
                _ => Object::new(),
            };
            apply_entries(&mut node, child);
            target.insert(key.to_string(), MetaNode::Object(node));
        }
        _ => apply_entries(object_entry(target, key), child),
    }
}

/// Build the object described by an added node.
fn materialize(node: &DeltaNode) -> MetaNode {
    MetaNode::Object(
        node.entries
            .iter()
            .filter_map(|(key, entry)| {
                let value = match entry {
                    DeltaEntry::Value(value) => MetaNode::Scalar(value.clone()),
                    DeltaEntry::Cleared(_) => return None,
                    DeltaEntry::Node(child) if child.action.remove && !child.action.add => {
                        return None;
                    }
                    DeltaEntry::Node(child) => materialize(child),
                };
                Some((key.clone(), value))
            })
            .collect(),
    )
}
