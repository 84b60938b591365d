//! Rename passes.
//!
//! The naive diff sees a renamed table as one table dropped and another one
//! created. These passes look at the `oldName` / `oldSchemaName` hints carried
//! by the desired schema and fold such pairs into a single rename.

use tracing::{debug, warn};
use vigil_schema::tree::{
    COLUMNS, CONSTRAINTS, FOREIGN_SCHEMA_NAME, FOREIGN_TABLE_NAME, MetaNode, NAME, OLD_NAME,
    OLD_SCHEMA_NAME, RELATIONS, SCHEMA_NAME, SCHEMAS, SIDES, TABLE_NAME, TABLES,
};

use super::{
    DeltaNode, DiffError, MigrationAction, Object, RenamedFrom, diff_objects,
    scalars_differ,
};

/// A table rename that was resolved against the live schema.
#[derive(Debug, Clone)]
pub(super) struct TableRename {
    pub old_schema: String,
    pub old_name: String,
    pub schema: String,
    pub name: String,
}

impl TableRename {
    fn is_target(&self, schema: &str, name: &str) -> bool {
        self.schema == schema && self.name == name
    }
}

fn object<'a>(node: &'a MetaNode, path: &[&str]) -> Option<&'a Object> {
    node.get_path(path)?.as_object()
}

fn root_object<'a>(root: &'a Object, path: &[&str]) -> Option<&'a Object> {
    let (first, rest) = path.split_first()?;
    object(root.get(*first)?, rest)
}

/// Diff of a node against its previous incarnation, flagged as a rename.
///
/// `identity` lists the keys that are expected to differ because of the rename
/// itself; they don't count as a change.
fn renamed(from: &Object, to: &Object, renamed_from: RenamedFrom, identity: &[&str]) -> DeltaNode {
    let mut node = diff_objects(from, to);
    node.action = MigrationAction {
        rename: true,
        change: scalars_differ(from, to, identity),
        ..Default::default()
    };
    node.renamed_from = Some(renamed_from);
    node
}

fn unresolved(
    kind: &'static str,
    from: String,
    to: String,
    lenient: bool,
) -> Result<(), DiffError> {
    if lenient {
        warn!(kind, %from, %to, "rename source not found in live schema, treating as a plain add");
        Ok(())
    } else {
        Err(DiffError::UnresolvedRename { kind, from, to })
    }
}

/// Resolve table renames (and moves across schemas).
pub(super) fn tables(
    from: &Object,
    to: &Object,
    delta: &mut DeltaNode,
    lenient: bool,
) -> Result<Vec<TableRename>, DiffError> {
    let mut renames = Vec::new();
    let Some(schemas) = to.get(SCHEMAS).and_then(MetaNode::as_object) else {
        return Ok(renames);
    };

    for (schema_name, schema) in schemas {
        let Some(tables) = object(schema, &[TABLES]) else {
            continue;
        };
        for (table_name, table) in tables {
            let old_name = table.str_field(OLD_NAME);
            let old_schema = table.str_field(OLD_SCHEMA_NAME);
            if old_name.is_none() && old_schema.is_none() {
                continue;
            }
            let old_name = old_name.unwrap_or(table_name);
            let old_schema = old_schema.unwrap_or(schema_name);
            if old_name == table_name && old_schema == schema_name {
                continue;
            }
            let Some(desired) = table.as_object() else {
                continue;
            };

            let new_path = [SCHEMAS, schema_name.as_str(), TABLES, table_name.as_str()];
            let old_path = [SCHEMAS, old_schema, TABLES, old_name];

            if root_object(to, &old_path).is_some() {
                warn!(
                    table = %table_name,
                    old = %format!("{old_schema}.{old_name}"),
                    "rename source is still part of the desired schema, ignoring rename"
                );
                continue;
            }

            let Some(live) = root_object(from, &old_path) else {
                let freshly_added = delta.get_path(&new_path).is_some_and(|n| n.action.add);
                if freshly_added {
                    unresolved(
                        "table",
                        format!("{old_schema}.{old_name}"),
                        format!("{schema_name}.{table_name}"),
                        lenient,
                    )?;
                } else {
                    debug!(table = %table_name, "rename already applied");
                }
                continue;
            };

            delta.remove_path(&old_path);
            let mut node = renamed(
                live,
                desired,
                RenamedFrom {
                    schema: (old_schema != schema_name).then(|| old_schema.to_string()),
                    key: old_name.to_string(),
                },
                &[NAME, SCHEMA_NAME],
            );
            rename_constraints(&mut node, live, desired, old_name, table_name);
            *delta.path_or_insert(&new_path) = node;

            debug!(from = %old_name, to = %table_name, "table rename detected");
            renames.push(TableRename {
                old_schema: old_schema.to_string(),
                old_name: old_name.to_string(),
                schema: schema_name.clone(),
                name: table_name.clone(),
            });
        }
    }
    Ok(renames)
}

fn same_ignoring_name(a: &Object, b: &Object) -> bool {
    let strip = |o: &Object| {
        o.iter()
            .filter(|(key, _)| key.as_str() != NAME)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Vec<_>>()
    };
    strip(a) == strip(b)
}

/// Constraint names embed the table name (`Task_pkey`). When the table is
/// renamed, so are they; accept the pairing only if nothing else differs.
fn rename_constraints(
    node: &mut DeltaNode,
    live: &Object,
    desired: &Object,
    old_table: &str,
    new_table: &str,
) {
    let (Some(live_constraints), Some(desired_constraints)) = (
        live.get(CONSTRAINTS).and_then(MetaNode::as_object),
        desired.get(CONSTRAINTS).and_then(MetaNode::as_object),
    ) else {
        return;
    };
    let Some(delta) = node.child_mut(CONSTRAINTS) else {
        return;
    };

    for (key, constraint) in desired_constraints {
        if live_constraints.contains_key(key) {
            continue;
        }
        let old_key = key.replacen(new_table, old_table, 1);
        if old_key == *key || desired_constraints.contains_key(&old_key) {
            continue;
        }
        let (Some(old), Some(new)) = (
            live_constraints.get(&old_key).and_then(MetaNode::as_object),
            constraint.as_object(),
        ) else {
            continue;
        };
        if !same_ignoring_name(old, new) {
            continue;
        }

        delta.entries.shift_remove(&old_key);
        let node = renamed(
            old,
            new,
            RenamedFrom {
                schema: None,
                key: old_key,
            },
            &[NAME],
        );
        delta.insert_node(key, node);
    }
}

/// Re-key the relation sides that belong to renamed tables, and mark the
/// opposite sides as merely re-pointed.
pub(super) fn relations(from: &Object, to: &Object, delta: &mut DeltaNode, renames: &[TableRename]) {
    if renames.is_empty() {
        return;
    }
    let Some(relations) = to.get(RELATIONS).and_then(MetaNode::as_object) else {
        return;
    };

    for (relation_name, relation) in relations {
        let Some(sides) = object(relation, &[SIDES]) else {
            continue;
        };
        let Some(live_sides) = root_object(from, &[RELATIONS, relation_name.as_str(), SIDES])
        else {
            continue;
        };
        let sides_path = [RELATIONS, relation_name.as_str(), SIDES];

        for (side_key, side) in sides {
            let Some(desired) = side.as_object() else {
                continue;
            };
            let schema = side.str_field(SCHEMA_NAME).unwrap_or_default();
            let table = side.str_field(TABLE_NAME).unwrap_or_default();
            let field = side.str_field(NAME).unwrap_or_default();
            let foreign_schema = side.str_field(FOREIGN_SCHEMA_NAME).unwrap_or_default();
            let foreign_table = side.str_field(FOREIGN_TABLE_NAME).unwrap_or_default();

            if let Some(rename) = renames.iter().find(|r| r.is_target(schema, table)) {
                let old_key = format!("{}.{}.{}", rename.old_schema, rename.old_name, field);
                if live_sides.contains_key(side_key) {
                    continue;
                }
                let Some(live) = live_sides.get(&old_key).and_then(MetaNode::as_object) else {
                    continue;
                };
                let sides_delta = delta.path_or_insert(&sides_path);
                sides_delta.entries.shift_remove(&old_key);
                let node = renamed(
                    live,
                    desired,
                    RenamedFrom {
                        schema: None,
                        key: old_key,
                    },
                    &[SCHEMA_NAME, TABLE_NAME, FOREIGN_SCHEMA_NAME, FOREIGN_TABLE_NAME],
                );
                sides_delta.insert_node(side_key, node);
            } else if renames
                .iter()
                .any(|r| r.is_target(foreign_schema, foreign_table))
            {
                let Some(live) = live_sides.get(side_key).and_then(MetaNode::as_object) else {
                    continue;
                };
                let mut side_path = sides_path.to_vec();
                side_path.push(side_key.as_str());
                let Some(node) = delta.get_path_mut(&side_path) else {
                    continue;
                };
                node.action.change =
                    scalars_differ(live, desired, &[FOREIGN_SCHEMA_NAME, FOREIGN_TABLE_NAME]);
                node.action.rename = true;
            }
        }
    }
}

/// Resolve column renames, looking the old column up in the table's previous
/// incarnation when the table itself was renamed.
pub(super) fn columns(
    from: &Object,
    to: &Object,
    delta: &mut DeltaNode,
    table_renames: &[TableRename],
    lenient: bool,
) -> Result<(), DiffError> {
    let Some(schemas) = to.get(SCHEMAS).and_then(MetaNode::as_object) else {
        return Ok(());
    };

    for (schema_name, schema) in schemas {
        let Some(tables) = object(schema, &[TABLES]) else {
            continue;
        };
        for (table_name, table) in tables {
            let Some(columns) = object(table, &[COLUMNS]) else {
                continue;
            };
            let live_table_path: [&str; 4] = match table_renames
                .iter()
                .find(|r| r.is_target(schema_name, table_name))
            {
                Some(rename) => [
                    SCHEMAS,
                    rename.old_schema.as_str(),
                    TABLES,
                    rename.old_name.as_str(),
                ],
                None => [SCHEMAS, schema_name.as_str(), TABLES, table_name.as_str()],
            };
            let live_columns = root_object(from, &live_table_path)
                .and_then(|t| t.get(COLUMNS))
                .and_then(MetaNode::as_object);
            let columns_path = [
                SCHEMAS,
                schema_name.as_str(),
                TABLES,
                table_name.as_str(),
                COLUMNS,
            ];

            for (column_name, column) in columns {
                let Some(old_name) = column.str_field(OLD_NAME) else {
                    continue;
                };
                if old_name == column_name {
                    continue;
                }
                let Some(desired) = column.as_object() else {
                    continue;
                };
                if columns.contains_key(old_name) {
                    warn!(
                        table = %table_name,
                        column = %column_name,
                        old = %old_name,
                        "rename source is still part of the desired table, ignoring rename"
                    );
                    continue;
                }

                let live = live_columns
                    .and_then(|c| c.get(old_name))
                    .and_then(MetaNode::as_object);
                let Some(live) = live else {
                    let freshly_added = delta
                        .get_path(&columns_path)
                        .and_then(|c| c.child(column_name))
                        .is_some_and(|n| n.action.add);
                    if freshly_added {
                        unresolved(
                            "column",
                            format!("{table_name}.{old_name}"),
                            format!("{table_name}.{column_name}"),
                            lenient,
                        )?;
                    } else {
                        debug!(table = %table_name, column = %column_name, "rename already applied");
                    }
                    continue;
                };

                let columns_delta = delta.path_or_insert(&columns_path);
                columns_delta.entries.shift_remove(old_name);
                let node = renamed(
                    live,
                    desired,
                    RenamedFrom {
                        schema: None,
                        key: old_name.to_string(),
                    },
                    &[NAME],
                );
                columns_delta.insert_node(column_name, node);
                debug!(table = %table_name, from = %old_name, to = %column_name, "column rename detected");
            }
        }
    }
    Ok(())
}
