//! Field compilers.
//!
//! Each allowed field becomes at most one projection of the base table,
//! tagged with who may see it.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use vigil_schema::{Column, PgType};
use vigil_sql::{ColumnName, Expr, SelectColumn};

use crate::ast::TypeRef;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::expression::{ExpressionContext, LOCAL_TABLE_ALIAS};
use crate::ir::{EntityModel, FieldKind, Model, PRIMARY_KEY_FIELD, scalar_type};
use crate::permission::{Operation, Permission};

use super::Visibility;

/// A field as seen through one view.
#[derive(Debug, Clone)]
pub(crate) struct FieldProjection {
    pub name: String,
    pub ty: TypeRef,
    /// `None` for relation fields whose side owns no column
    pub column: Option<SelectColumn>,
    /// Type of the projected column, when known
    pub sql_type: Option<String>,
    pub visibility: Visibility,
}

/// The allow-list, checked against the entity.
pub(crate) struct AllowList {
    pub plain: IndexSet<String>,
    /// Dotted paths into `@json` fields, keyed by top-level field
    pub json_paths: IndexMap<String, Vec<Vec<String>>>,
}

impl AllowList {
    pub fn contains(&self, field: &str) -> bool {
        self.plain.contains(field) || self.json_paths.contains_key(field)
    }
}

pub(crate) fn check_allow_list(
    entity: &EntityModel,
    permission: &Permission,
) -> Result<AllowList, CompileError> {
    let mut allow = AllowList {
        plain: IndexSet::new(),
        json_paths: IndexMap::new(),
    };

    for entry in &permission.fields {
        let Some((root, rest)) = entry.split_once('.') else {
            if !entity.fields.contains_key(entry) {
                return Err(CompileError::UnknownField {
                    entity: entity.name.clone(),
                    permission: permission.name.clone(),
                    field: entry.clone(),
                });
            }
            allow.plain.insert(entry.clone());
            continue;
        };

        let invalid = || CompileError::InvalidJsonPath {
            entity: entity.name.clone(),
            permission: permission.name.clone(),
            path: entry.clone(),
        };
        let field = entity.fields.get(root).ok_or_else(|| CompileError::UnknownField {
            entity: entity.name.clone(),
            permission: permission.name.clone(),
            field: root.to_string(),
        })?;
        if permission.operation != Operation::Read
            || !matches!(field.kind, FieldKind::Json { .. })
            || rest.split('.').any(str::is_empty)
        {
            return Err(invalid());
        }
        allow
            .json_paths
            .entry(root.to_string())
            .or_default()
            .push(rest.split('.').map(str::to_string).collect());
    }

    Ok(allow)
}

/// Compile the allowed fields of a READ permission, in entity order.
pub(crate) fn compile_read_fields(
    entity: &EntityModel,
    model: &Model,
    allow: &AllowList,
    ctx: &ExpressionContext<'_>,
    config: &CompilerConfig,
) -> Result<Vec<FieldProjection>, CompileError> {
    let mut projections = Vec::new();

    for field in entity.fields.values() {
        if !allow.contains(&field.name) {
            continue;
        }
        let alias = ColumnName::from(field.name.as_str());
        let mut visibility = Visibility::Both;

        let table_column = |column: &str| {
            model
                .db_meta
                .table(&entity.schema_name, &entity.table_name)
                .and_then(|table| table.columns.get(column))
                .map(Column::sql_type)
        };

        let (column, sql_type) = match &field.kind {
            FieldKind::Column { column } => (
                Some(SelectColumn::aliased(local(column), alias)),
                table_column(column),
            ),
            FieldKind::Json { column } => {
                let expr = match allow.json_paths.get(&field.name) {
                    Some(paths) if !allow.plain.contains(&field.name) => {
                        json_projection(local(column), paths)
                    }
                    _ => local(column),
                };
                (Some(SelectColumn::aliased(expr, alias)), Some(PgType::Jsonb.to_string()))
            }
            FieldKind::Computed { expression, params } => {
                let def = config.expressions.get(expression).ok_or_else(|| {
                    CompileError::UnknownExpression {
                        name: expression.clone(),
                        context: format!("{}.{}", entity.name, field.name),
                    }
                })?;
                let ctx = ExpressionContext {
                    field: Some(&field.name),
                    ..*ctx
                };
                let fragment = def.generate(&ctx, params)?;
                if fragment.requires_auth {
                    visibility = Visibility::Auth;
                }
                (
                    Some(SelectColumn::aliased(
                        Expr::raw(format!("({})", fragment.sql)),
                        alias,
                    )),
                    scalar_type(&def.return_type).map(|ty| ty.to_string()),
                )
            }
            FieldKind::Custom { resolver, .. } => {
                if !config.resolvers.contains(resolver) {
                    return Err(CompileError::UnknownResolver {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                        resolver: resolver.clone(),
                    });
                }
                (
                    Some(SelectColumn::aliased(Expr::Null.cast("text"), alias)),
                    Some(PgType::Text.to_string()),
                )
            }
            FieldKind::Relation { relation } => {
                match own_relation_column(entity, model, &field.name, relation) {
                    Some(column) => (
                        Some(SelectColumn::aliased(local(&column), alias)),
                        table_column(&column),
                    ),
                    None => (None, None),
                }
            }
        };

        projections.push(FieldProjection {
            name: field.name.clone(),
            ty: field.ty.clone(),
            column,
            sql_type,
            visibility,
        });
    }

    Ok(projections)
}

/// A writable field of a mutation view: its column and input type.
#[derive(Debug, Clone)]
pub(crate) struct MutableField {
    pub column: String,
    pub ty: TypeRef,
    pub listed: bool,
}

/// Compile the allowed, writable fields of a mutation permission, in entity order.
///
/// CREATE views always carry the primary key, listed or not.
pub(crate) fn compile_mutation_fields(
    entity: &EntityModel,
    model: &Model,
    allow: &AllowList,
    operation: Operation,
) -> Vec<MutableField> {
    let mut fields = Vec::new();

    for field in entity.fields.values() {
        let listed = allow.contains(&field.name);
        let auto_id = operation == Operation::Create && field.name == PRIMARY_KEY_FIELD;
        if !listed && !auto_id {
            continue;
        }

        let (column, ty) = match &field.kind {
            FieldKind::Column { column } | FieldKind::Json { column } => {
                (column.clone(), field.ty.clone())
            }
            FieldKind::Relation { relation } => {
                let Some(column) = own_relation_column(entity, model, &field.name, relation)
                else {
                    tracing::debug!(entity = %entity.name, field = %field.name, "relation owns no column, not writable");
                    continue;
                };
                let id = TypeRef::named("ID");
                let ty = if field.ty.is_list() {
                    TypeRef::list(id.non_null())
                } else {
                    id
                };
                let ty = if field.ty.is_non_null() { ty.non_null() } else { ty };
                (column, ty)
            }
            FieldKind::Computed { .. } | FieldKind::Custom { .. } => {
                tracing::debug!(entity = %entity.name, field = %field.name, "derived field, not writable");
                continue;
            }
        };
        fields.push(MutableField { column, ty, listed });
    }

    fields
}

fn local(column: &str) -> Expr {
    Expr::qualified_column(LOCAL_TABLE_ALIAS.into(), column.into())
}

fn own_relation_column(
    entity: &EntityModel,
    model: &Model,
    field: &str,
    relation: &str,
) -> Option<String> {
    let relation = model.db_meta.relations.get(relation)?;
    let (own, _) = relation.split(&entity.schema_name, &entity.table_name, field)?;
    own.column_name.clone()
}

/// Which parts of a JSON value a view exposes.
#[derive(Debug, Clone, PartialEq)]
enum JsonSelection {
    Whole,
    Keys(BTreeMap<String, JsonSelection>),
}

impl JsonSelection {
    fn insert(&mut self, path: &[String]) {
        let JsonSelection::Keys(keys) = self else {
            return;
        };
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        if rest.is_empty() {
            keys.insert(head.clone(), JsonSelection::Whole);
            return;
        }
        keys.entry(head.clone())
            .or_insert_with(|| JsonSelection::Keys(BTreeMap::new()))
            .insert(rest);
    }

    fn to_expr(&self, base: Expr) -> Expr {
        match self {
            JsonSelection::Whole => base,
            JsonSelection::Keys(keys) => {
                let mut args = Vec::with_capacity(keys.len() * 2);
                for (key, child) in keys {
                    args.push(Expr::string(key.as_str()));
                    args.push(child.to_expr(base.clone().json_get(key.as_str())));
                }
                Expr::call("jsonb_build_object", args)
            }
        }
    }
}

/// Merge dotted paths into one nested `jsonb_build_object`.
///
/// Deeper paths are inserted first, so a shallower path selecting a whole
/// sub-object replaces anything below it. The result does not depend on the
/// order the paths were listed in.
fn json_projection(column: Expr, paths: &[Vec<String>]) -> Expr {
    let mut sorted: Vec<&Vec<String>> = paths.iter().collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut selection = JsonSelection::Keys(BTreeMap::new());
    for path in sorted {
        selection.insert(path);
    }
    selection.to_expr(column)
}
