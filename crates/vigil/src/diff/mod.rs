//! Schema diffing - compare the live schema against the desired one.
//!
//! Both sides are converted to [`MetaNode`] trees first (see
//! [`DbMeta::to_tree`]), then compared key by key. The result is a
//! [`DeltaNode`] tree with the same shape as the inputs, where every node that
//! needs DDL carries a [`MigrationAction`].
//!
//! ## Passes
//!
//! 1. A recursive union-of-keys diff marks added, removed and changed nodes.
//! 2. Table renames (`oldName` / `oldSchemaName` on a desired table) replace
//!    the naive drop + add with a single rename. Constraint names and relation
//!    sides follow the table.
//! 3. Column renames, same idea one level down.
//! 4. Enums whose values changed are recreated, and every column typed with
//!    them is flagged so the DDL emitter casts it.
//!
//! ### Example
//!
//! ```text
//! // Instead of:
//! schemas:
//!   public:
//!     tables:
//!       - Task
//!       + Todo
//!
//! // You'll see:
//! schemas:
//!   public:
//!     tables:
//!       ~ Todo (from Task)
//! ```

use indexmap::{IndexMap, IndexSet};
use std::fmt;
use vigil_schema::DbMeta;
use vigil_schema::tree::{
    COLUMN_NAME, COLUMNS, CUSTOM_TYPE, ENUMS, MetaNode, NAME, OLD_NAME, OLD_SCHEMA_NAME,
    SCHEMA_NAME, SCHEMAS, Scalar, TABLE_NAME, TABLES, TYPE, VALUES,
};

mod apply;
mod rename;

pub use apply::apply;

pub(crate) type Object = IndexMap<String, MetaNode>;

/// Keys that only exist to drive rename detection. They never show up in a delta.
const RENAME_BOOKKEEPING: [&str; 2] = [OLD_NAME, OLD_SCHEMA_NAME];

/// Errors that make a diff impossible.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The desired schema has no tables and no enums. Diffing against it would drop everything.
    #[error("desired schema is empty, refusing to diff against it")]
    EmptyDesiredState,

    /// A rename marker points at something the live schema doesn't have.
    #[error("cannot rename {kind} {from} to {to}: {from} does not exist in the live schema")]
    UnresolvedRename {
        kind: &'static str,
        from: String,
        to: String,
    },
}

/// Knobs for [`diff`].
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Schemas left out of the comparison on both sides (generated view schemas).
    pub ignored_schemas: Vec<String>,
    /// Downgrade an unresolved rename to a plain add (with a warning) instead of failing.
    pub lenient_renames: bool,
}

/// What the DDL emitter has to do with one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationAction {
    pub add: bool,
    pub remove: bool,
    pub change: bool,
    pub rename: bool,
}

impl MigrationAction {
    pub fn is_none(&self) -> bool {
        !(self.add || self.remove || self.change || self.rename)
    }

    /// Dropped and recreated.
    pub fn is_replace(&self) -> bool {
        self.add && self.remove
    }

    fn marker(&self) -> &'static str {
        if self.is_replace() {
            "±"
        } else if self.add {
            "+"
        } else if self.remove {
            "-"
        } else if self.change || self.rename {
            "~"
        } else {
            " "
        }
    }
}

/// Where a renamed node used to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedFrom {
    /// Previous schema, only set when a table moved across schemas.
    pub schema: Option<String>,
    /// Previous key in the parent object.
    pub key: String,
}

impl fmt::Display for RenamedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEntry {
    /// New value of a scalar (or the identity of the node, which is always kept).
    Value(Scalar),
    /// A scalar only the live side has, with its last value.
    Cleared(Scalar),
    Node(DeltaNode),
}

/// One node of the delta tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaNode {
    pub action: MigrationAction,
    pub renamed_from: Option<RenamedFrom>,
    pub entries: IndexMap<String, DeltaEntry>,
}

impl DeltaNode {
    /// No action here and no child node below: nothing for the DDL emitter to do.
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
            && self
                .entries
                .values()
                .all(|entry| !matches!(entry, DeltaEntry::Node(_)))
    }

    pub fn child(&self, key: &str) -> Option<&DeltaNode> {
        match self.entries.get(key)? {
            DeltaEntry::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut DeltaNode> {
        match self.entries.get_mut(key)? {
            DeltaEntry::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn get_path(&self, path: &[&str]) -> Option<&DeltaNode> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    pub fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut DeltaNode> {
        path.iter().try_fold(self, |node, key| node.child_mut(key))
    }

    pub fn value(&self, key: &str) -> Option<&Scalar> {
        match self.entries.get(key)? {
            DeltaEntry::Value(value) | DeltaEntry::Cleared(value) => Some(value),
            DeltaEntry::Node(_) => None,
        }
    }

    /// Every node carrying an action, as `(dotted.path, action)` in tree order.
    pub fn actions(&self) -> Vec<(String, MigrationAction)> {
        let mut out = Vec::new();
        self.collect_actions("", &mut out);
        out
    }

    fn collect_actions(&self, prefix: &str, out: &mut Vec<(String, MigrationAction)>) {
        for (key, entry) in &self.entries {
            let DeltaEntry::Node(node) = entry else {
                continue;
            };
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if !node.action.is_none() {
                out.push((path.clone(), node.action));
            }
            node.collect_actions(&path, out);
        }
    }

    fn insert_value(&mut self, key: &str, value: Scalar) {
        self.entries.insert(key.to_string(), DeltaEntry::Value(value));
    }

    fn insert_node(&mut self, key: &str, node: DeltaNode) {
        self.entries.insert(key.to_string(), DeltaEntry::Node(node));
    }

    /// The child at `key`, created empty if missing (a scalar in the way is replaced).
    pub(crate) fn child_or_insert(&mut self, key: &str) -> &mut DeltaNode {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| DeltaEntry::Node(DeltaNode::default()));
        if !matches!(entry, DeltaEntry::Node(_)) {
            *entry = DeltaEntry::Node(DeltaNode::default());
        }
        match entry {
            DeltaEntry::Node(node) => node,
            _ => unreachable!("value entries were replaced above"),
        }
    }

    pub(crate) fn path_or_insert(&mut self, path: &[&str]) -> &mut DeltaNode {
        path.iter()
            .fold(self, |node, key| node.child_or_insert(key))
    }

    /// Remove the entry at `path`, returning it if it was a node.
    pub(crate) fn remove_path(&mut self, path: &[&str]) -> Option<DeltaNode> {
        let (last, parent) = path.split_last()?;
        match self.get_path_mut(parent)?.entries.shift_remove(*last)? {
            DeltaEntry::Node(node) => Some(node),
            _ => None,
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = depth * 2;
        for (key, entry) in &self.entries {
            match entry {
                DeltaEntry::Value(value) => writeln!(f, "{:indent$}  {key}: {value}", "")?,
                DeltaEntry::Cleared(value) => {
                    writeln!(f, "{:indent$}  {key}: {value} (cleared)", "")?
                }
                DeltaEntry::Node(node) => {
                    write!(f, "{:indent$}{} {key}", "", node.action.marker())?;
                    if let Some(from) = &node.renamed_from {
                        write!(f, " (from {from})")?;
                    }
                    writeln!(f)?;
                    node.write_tree(f, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for DeltaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "(no changes)");
        }
        self.write_tree(f, 0)
    }
}

/// Diff the live schema (`from`) against the desired one (`to`).
pub fn diff(from: &DbMeta, to: &DbMeta, options: &DiffOptions) -> Result<DeltaNode, DiffError> {
    if to.is_empty() {
        return Err(DiffError::EmptyDesiredState);
    }
    diff_trees(&from.to_tree(), &to.to_tree(), options)
}

/// Same as [`diff`], on trees that were already converted.
pub fn diff_trees(
    from: &MetaNode,
    to: &MetaNode,
    options: &DiffOptions,
) -> Result<DeltaNode, DiffError> {
    let from = without_schemas(from, &options.ignored_schemas);
    let to = without_schemas(to, &options.ignored_schemas);
    if tree_is_empty(&to) {
        return Err(DiffError::EmptyDesiredState);
    }

    let mut delta = diff_objects(&from, &to);

    let table_renames = rename::tables(&from, &to, &mut delta, options.lenient_renames)?;
    rename::relations(&from, &to, &mut delta, &table_renames);
    rename::columns(
        &from,
        &to,
        &mut delta,
        &table_renames,
        options.lenient_renames,
    )?;
    escalate_enums(&to, &mut delta);
    prune(&mut delta);

    tracing::debug!(actions = delta.actions().len(), "schema diff computed");
    Ok(delta)
}

fn without_schemas(tree: &MetaNode, ignored: &[String]) -> Object {
    let mut root = tree.as_object().cloned().unwrap_or_default();
    if let Some(schemas) = root.get_mut(SCHEMAS).and_then(MetaNode::as_object_mut) {
        schemas.retain(|name, _| !ignored.contains(name));
    }
    root
}

fn tree_is_empty(root: &Object) -> bool {
    let no_tables = root
        .get(SCHEMAS)
        .and_then(MetaNode::as_object)
        .is_none_or(|schemas| {
            schemas.values().all(|schema| {
                schema
                    .get(TABLES)
                    .and_then(MetaNode::as_object)
                    .is_none_or(IndexMap::is_empty)
            })
        });
    let no_enums = root
        .get(ENUMS)
        .and_then(MetaNode::as_object)
        .is_none_or(IndexMap::is_empty);
    no_tables && no_enums
}

fn is_bookkeeping(key: &str) -> bool {
    RENAME_BOOKKEEPING.contains(&key)
}

/// Shallow comparison of the scalar properties of two objects.
///
/// A missing key and an explicit null are the same thing. Child objects only
/// count when one side has a scalar where the other has an object.
pub(crate) fn scalars_differ(from: &Object, to: &Object, ignore: &[&str]) -> bool {
    let null = Scalar::Null;
    from.keys()
        .chain(to.keys())
        .filter(|key| !is_bookkeeping(key) && !ignore.contains(&key.as_str()))
        .any(|key| match (from.get(key), to.get(key)) {
            (Some(MetaNode::Object(_)), Some(MetaNode::Object(_))) => false,
            (Some(MetaNode::Object(_)), other) | (other, Some(MetaNode::Object(_))) => {
                other.is_some()
            }
            (a, b) => {
                a.and_then(MetaNode::as_scalar).unwrap_or(&null)
                    != b.and_then(MetaNode::as_scalar).unwrap_or(&null)
            }
        })
}

/// Every descendant of `to`, marked `add`.
pub(crate) fn added(to: &Object) -> DeltaNode {
    materialized(to, MigrationAction {
        add: true,
        ..Default::default()
    })
}

/// Every descendant of `from`, marked `remove`.
pub(crate) fn removed(from: &Object) -> DeltaNode {
    materialized(from, MigrationAction {
        remove: true,
        ..Default::default()
    })
}

fn materialized(object: &Object, action: MigrationAction) -> DeltaNode {
    let mut node = DeltaNode {
        action,
        ..Default::default()
    };
    for (key, child) in object {
        if is_bookkeeping(key) {
            continue;
        }
        match child {
            MetaNode::Scalar(value) if !value.is_null() => node.insert_value(key, value.clone()),
            MetaNode::Scalar(_) => {}
            MetaNode::Object(child) => node.insert_node(key, materialized(child, action)),
        }
    }
    node
}

/// Union-of-keys diff of two objects that exist on both sides.
pub(crate) fn diff_objects(from: &Object, to: &Object) -> DeltaNode {
    let mut node = DeltaNode::default();
    node.action.change = scalars_differ(from, to, &[]);

    let keys: IndexSet<&String> = from.keys().chain(to.keys()).collect();
    for key in keys {
        if is_bookkeeping(key) {
            continue;
        }
        match (from.get(key), to.get(key)) {
            (Some(MetaNode::Scalar(a)), Some(MetaNode::Scalar(b))) => {
                if a != b || key == NAME {
                    node.insert_value(key, b.clone());
                }
            }
            (Some(MetaNode::Object(a)), Some(MetaNode::Object(b))) => {
                let child = diff_objects(a, b);
                if !child.is_empty() {
                    node.insert_node(key, child);
                }
            }
            (Some(MetaNode::Scalar(_)), Some(MetaNode::Object(b))) => {
                node.insert_node(key, added(b));
            }
            (Some(MetaNode::Object(_)), Some(MetaNode::Scalar(b))) => {
                node.insert_value(key, b.clone());
            }
            (Some(MetaNode::Scalar(a)), None) => {
                if !a.is_null() {
                    node.entries
                        .insert(key.to_string(), DeltaEntry::Cleared(a.clone()));
                }
            }
            (Some(MetaNode::Object(a)), None) => node.insert_node(key, removed(a)),
            (None, Some(MetaNode::Scalar(b))) => {
                if !b.is_null() {
                    node.insert_value(key, b.clone());
                }
            }
            (None, Some(MetaNode::Object(b))) => node.insert_node(key, added(b)),
            (None, None) => {}
        }
    }
    node
}

/// Recreate enums whose values changed, and flag the columns that use them.
///
/// Postgres can't drop or reorder enum values in place, so any change to the
/// value list becomes drop + create, and typed columns need a cast.
fn escalate_enums(to: &Object, delta: &mut DeltaNode) {
    let Some(enums) = delta.child_mut(ENUMS) else {
        return;
    };

    let mut flagged_columns = Vec::new();
    for (key, entry) in enums.entries.iter_mut() {
        let DeltaEntry::Node(node) = entry else {
            continue;
        };
        // Column pointers are derived from the tables; the columns diff covers them.
        node.entries.shift_remove(COLUMNS);

        if node.action.add || node.action.remove {
            continue;
        }
        let values_changed = node.child(VALUES).is_some_and(|values| !values.is_empty());
        if !node.action.change && !values_changed {
            continue;
        }
        let Some(desired) = to
            .get(ENUMS)
            .and_then(|enums| enums.get(key))
            .and_then(MetaNode::as_object)
        else {
            continue;
        };

        let mut replacement = added(desired);
        replacement.entries.shift_remove(COLUMNS);
        replacement.action.remove = true;
        *node = replacement;
        tracing::debug!(name = %key, "enum values changed, recreating");

        if let Some(pointers) = desired.get(COLUMNS).and_then(MetaNode::as_object) {
            flagged_columns.extend(pointers.values().filter_map(|pointer| {
                Some((
                    pointer.str_field(SCHEMA_NAME)?.to_string(),
                    pointer.str_field(TABLE_NAME)?.to_string(),
                    pointer.str_field(COLUMN_NAME)?.to_string(),
                ))
            }));
        }
    }

    for (schema, table, column) in flagged_columns {
        let path = [
            SCHEMAS,
            schema.as_str(),
            TABLES,
            table.as_str(),
            COLUMNS,
            column.as_str(),
        ];
        let Some(desired) = to
            .get(SCHEMAS)
            .and_then(|schemas| schemas.get_path(&path[1..]))
            .and_then(MetaNode::as_object)
        else {
            continue;
        };
        let node = delta.path_or_insert(&path);
        if node.action.add {
            continue;
        }
        node.action.change = true;
        node.insert_value(NAME, Scalar::from(column.as_str()));
        for key in [TYPE, CUSTOM_TYPE] {
            if let Some(MetaNode::Scalar(value)) = desired.get(key) {
                node.insert_value(key, value.clone());
            }
        }
    }
}

/// Drop child nodes with nothing to do, bottom-up.
fn prune(node: &mut DeltaNode) {
    node.entries.retain(|_, entry| match entry {
        DeltaEntry::Node(child) => {
            prune(child);
            !child.is_empty()
        }
        DeltaEntry::Value(_) | DeltaEntry::Cleared(_) => true,
    });
}
