//! Schema compiler entry point and the catalogs it produces.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info};
use vigil_schema::{Cardinality, DbMeta};

use crate::ast::{Document, Params, TypeRef};
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::ir::{EntityModel, FieldKind, Model, PRIMARY_KEY_FIELD, build_model};
use crate::permission::{ExpressionRef, Operation, Permission};
use crate::view::{
    CompiledView, InputField, VIEWNAMES_FIELD, ViewField, build_mutation_view, build_read_views,
};

/// Everything produced by one compile pass.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    /// Desired database structure, input to the diff engine
    pub db_meta: DbMeta,
    /// Aggregate read types, keyed by entity name
    pub entities: IndexMap<String, EntityType>,
    /// Views in emission order
    pub views: Vec<CompiledView>,
    pub queries: IndexMap<String, QueryDef>,
    pub mutations: IndexMap<String, MutationDef>,
    pub custom_fields: Vec<CustomFieldBinding>,
}

impl CompiledSchema {
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// Every view statement, in order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.views
            .iter()
            .flat_map(|v| v.statements.iter().map(String::as_str))
    }
}

/// A view as referenced from a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRef {
    pub schema_name: String,
    pub name: String,
    pub fields: Vec<ViewField>,
}

impl ViewRef {
    fn of(view: &CompiledView) -> Self {
        Self {
            schema_name: view.schema_name.clone(),
            name: view.name.clone(),
            fields: view.fields.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&ViewField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// The PUBLIC and AUTH variants of one READ permission.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadViewRef {
    pub permission_view: String,
    pub public: Option<ViewRef>,
    pub auth: Option<ViewRef>,
}

impl ReadViewRef {
    /// The variant an (un)authenticated caller reads through.
    pub fn variant(&self, authenticated: bool) -> Option<&ViewRef> {
        if authenticated {
            self.auth.as_ref()
        } else {
            self.public.as_ref()
        }
    }
}

/// How a relation field reaches the related entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub relation: String,
    /// Related entity name
    pub target: String,
    pub cardinality: Cardinality,
    /// Id column held by this side, exposed under the relation field's name
    pub own_column: Option<String>,
    /// The relation field on the related entity
    pub foreign_field: String,
    pub foreign_column: Option<String>,
}

/// The aggregate read type of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    /// Union of every READ view's fields. All nullable: a caller may lack the
    /// permission behind any given view.
    pub fields: IndexMap<String, TypeRef>,
    /// Name of the enum listing this entity's READ permission views
    pub views_enum: String,
    pub view_names: Vec<String>,
    pub read_views: Vec<ReadViewRef>,
    pub relations: IndexMap<String, RelationInfo>,
}

/// A list query over one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDef {
    pub name: String,
    pub entity: String,
}

/// What a mutation answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationReturn {
    Id,
    Entity,
}

/// A mutation bound to one view.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationDef {
    pub name: String,
    pub entity: String,
    pub operation: Operation,
    pub view: ViewRef,
    pub input: Vec<InputField>,
    pub returns: MutationReturn,
}

/// A `@custom` field and the resolver that fills it in.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFieldBinding {
    pub type_name: String,
    pub field_name: String,
    pub resolver: String,
    pub params: Params,
}

/// Compile a document and its permissions.
///
/// Pure: the same inputs always produce the same output. Any error aborts the
/// whole pass.
pub fn compile(
    doc: &Document,
    permissions: &[Permission],
    config: &CompilerConfig,
) -> Result<CompiledSchema, CompileError> {
    let model = build_model(doc)?;
    let custom_fields = check_derived_fields(&model, config)?;

    let mut entities: IndexMap<String, EntityType> = IndexMap::new();
    for entity in model.entities.values() {
        entities.insert(
            entity.name.clone(),
            EntityType {
                name: entity.name.clone(),
                fields: IndexMap::new(),
                views_enum: format!("{}_VIEWS", entity.name.to_uppercase()),
                view_names: Vec::new(),
                read_views: Vec::new(),
                relations: relation_infos(&model, entity),
            },
        );
    }

    let mut views = Vec::new();
    let mut queries = IndexMap::new();
    let mut mutations = IndexMap::new();

    for permission in merge_delete_permissions(permissions) {
        let entity = model.entities.get(&permission.entity).ok_or_else(|| {
            CompileError::UnknownEntity {
                entity: permission.entity.clone(),
                permission: permission.name.clone(),
            }
        })?;

        if permission.operation == Operation::Read {
            let read = build_read_views(&model, entity, &permission, config)?;
            if read.public.is_none() && read.auth.is_none() {
                continue;
            }
            let Some(entity_type) = entities.get_mut(&entity.name) else {
                continue;
            };
            for view in read.public.iter().chain(read.auth.iter()) {
                for field in &view.fields {
                    let ty = if field.name == VIEWNAMES_FIELD {
                        TypeRef::list(TypeRef::named(&entity_type.views_enum))
                    } else {
                        field.ty.nullable()
                    };
                    entity_type.fields.entry(field.name.clone()).or_insert(ty);
                }
            }
            entity_type.view_names.push(read.permission_view.clone());
            entity_type.read_views.push(ReadViewRef {
                permission_view: read.permission_view,
                public: read.public.as_ref().map(ViewRef::of),
                auth: read.auth.as_ref().map(ViewRef::of),
            });
            views.extend(read.public);
            views.extend(read.auth);

            let query = format!("{}s", entity.name.to_lowercase());
            queries.entry(query.clone()).or_insert(QueryDef {
                name: query,
                entity: entity.name.clone(),
            });
        } else if let Some(view) = build_mutation_view(&model, entity, &permission, config)? {
            let name = view.name.to_lowercase();
            mutations.insert(
                name.clone(),
                MutationDef {
                    name,
                    entity: entity.name.clone(),
                    operation: permission.operation,
                    view: ViewRef::of(&view),
                    input: view.input.clone(),
                    returns: if permission.return_only_id
                        || permission.operation == Operation::Delete
                    {
                        MutationReturn::Id
                    } else {
                        MutationReturn::Entity
                    },
                },
            );
            views.push(view);
        }
    }

    let mut seen = HashSet::new();
    for view in &views {
        if !seen.insert((view.schema_name.as_str(), view.name.as_str())) {
            return Err(CompileError::DuplicateView {
                name: view.name.clone(),
            });
        }
    }

    info!(
        entities = entities.len(),
        views = views.len(),
        queries = queries.len(),
        mutations = mutations.len(),
        "schema compiled"
    );

    let Model { db_meta, .. } = model;
    Ok(CompiledSchema {
        db_meta,
        entities,
        views,
        queries,
        mutations,
        custom_fields,
    })
}

/// DELETE permissions of one entity share a single view: their expressions
/// are unioned and the only field is the primary key.
fn merge_delete_permissions(permissions: &[Permission]) -> Vec<Permission> {
    let mut merged: Vec<Permission> = Vec::new();
    let mut deletes: IndexMap<&str, usize> = IndexMap::new();

    for permission in permissions {
        if permission.operation != Operation::Delete {
            merged.push(permission.clone());
            continue;
        }
        match deletes.get(permission.entity.as_str()) {
            Some(&index) => {
                let target = &mut merged[index];
                for expr in &permission.expressions {
                    if !target.expressions.contains(expr) {
                        target.expressions.push(expr.clone());
                    }
                }
                target.return_only_id |= permission.return_only_id;
            }
            None => {
                deletes.insert(&permission.entity, merged.len());
                let mut first = permission.clone();
                first.fields = vec![PRIMARY_KEY_FIELD.to_string()];
                let mut unique: Vec<ExpressionRef> = Vec::new();
                for expr in first.expressions.drain(..) {
                    if !unique.contains(&expr) {
                        unique.push(expr);
                    }
                }
                first.expressions = unique;
                merged.push(first);
            }
        }
    }

    merged
}

/// Every computed field must name a known expression and every custom field a
/// known resolver, whether or not a permission exposes it.
fn check_derived_fields(
    model: &Model,
    config: &CompilerConfig,
) -> Result<Vec<CustomFieldBinding>, CompileError> {
    let mut bindings = Vec::new();
    for entity in model.entities.values() {
        for field in entity.fields.values() {
            match &field.kind {
                FieldKind::Computed { expression, .. } => {
                    if config.expressions.get(expression).is_none() {
                        return Err(CompileError::UnknownExpression {
                            name: expression.clone(),
                            context: format!("{}.{}", entity.name, field.name),
                        });
                    }
                }
                FieldKind::Custom { resolver, params } => {
                    if !config.resolvers.contains(resolver) {
                        return Err(CompileError::UnknownResolver {
                            entity: entity.name.clone(),
                            field: field.name.clone(),
                            resolver: resolver.clone(),
                        });
                    }
                    bindings.push(CustomFieldBinding {
                        type_name: entity.name.clone(),
                        field_name: field.name.clone(),
                        resolver: resolver.clone(),
                        params: params.clone(),
                    });
                }
                _ => {}
            }
        }
    }
    Ok(bindings)
}

fn relation_infos(model: &Model, entity: &EntityModel) -> IndexMap<String, RelationInfo> {
    let mut infos = IndexMap::new();
    for field in entity.fields.values() {
        let FieldKind::Relation { relation } = &field.kind else {
            continue;
        };
        let Some((own, foreign)) = model
            .db_meta
            .relations
            .get(relation)
            .and_then(|r| r.split(&entity.schema_name, &entity.table_name, &field.name))
        else {
            continue;
        };
        let Some(target) = model.entities.values().find(|e| {
            e.schema_name == foreign.schema_name && e.table_name == foreign.table_name
        }) else {
            continue;
        };
        debug!(entity = %entity.name, field = %field.name, target = %target.name, "relation resolved");
        infos.insert(
            field.name.clone(),
            RelationInfo {
                relation: relation.clone(),
                target: target.name.clone(),
                cardinality: own.cardinality,
                own_column: own.column_name.clone(),
                foreign_field: foreign.field_name.clone(),
                foreign_column: foreign.column_name.clone(),
            },
        );
    }
    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_config, sample_document};

    fn permissions() -> Vec<Permission> {
        vec![
            Permission::new("Task", "mine", Operation::Read, &["id", "title", "owner"])
                .expression(ExpressionRef::new("isOwner")),
            Permission::new("Task", "all", Operation::Read, &["id", "status", "score"])
                .expression(ExpressionRef::new("everyone")),
            Permission::new("User", "me", Operation::Read, &["id", "name", "tasks"])
                .expression(ExpressionRef::new("isSelf")),
            Permission::new("Task", "mine", Operation::Create, &["title", "owner"])
                .expression(ExpressionRef::new("isOwner")),
            Permission::new("Task", "mine", Operation::Update, &["id", "title"])
                .expression(ExpressionRef::new("isOwner")),
            Permission::new("Task", "mine", Operation::Delete, &["id"])
                .expression(ExpressionRef::new("isOwner")),
            Permission::new("Task", "open", Operation::Delete, &["id", "title"])
                .expression(ExpressionRef::new("everyone"))
                .expression(ExpressionRef::new("isOwner")),
        ]
    }

    #[test]
    fn test_compile_catalogs() {
        let schema = compile(&sample_document(), &permissions(), &sample_config()).unwrap();

        let names: Vec<&str> = schema.views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "TASK_MINE_AUTH",
                "TASK_ALL_PUBLIC",
                "TASK_ALL_AUTH",
                "USER_ME_AUTH",
                "CREATE_TASK_MINE",
                "UPDATE_TASK_MINE",
                "DELETE_TASK",
            ]
        );

        let queries: Vec<&str> = schema.queries.keys().map(String::as_str).collect();
        assert_eq!(queries, ["tasks", "users"]);

        let mutations: Vec<&str> = schema.mutations.keys().map(String::as_str).collect();
        assert_eq!(
            mutations,
            ["create_task_mine", "update_task_mine", "delete_task"]
        );
        assert_eq!(
            schema.mutations["delete_task"].returns,
            MutationReturn::Id
        );
        assert_eq!(
            schema.mutations["create_task_mine"].returns,
            MutationReturn::Entity
        );
    }

    #[test]
    fn test_aggregate_type_is_union_of_nullable_fields() {
        let schema = compile(&sample_document(), &permissions(), &sample_config()).unwrap();
        let task = schema.entity("Task").unwrap();

        let fields: Vec<String> = task
            .fields
            .iter()
            .map(|(name, ty)| format!("{name}: {ty}"))
            .collect();
        assert_eq!(
            fields,
            [
                "id: ID",
                "title: String",
                "owner: User",
                "_viewnames: [TASK_VIEWS]",
                "status: TaskStatus",
                "score: Int",
            ]
        );
        assert_eq!(task.view_names, ["TASK_MINE", "TASK_ALL"]);
        assert!(task.read_views[0].variant(false).is_none());
        assert!(task.read_views[0].variant(true).is_some());
    }

    #[test]
    fn test_relation_infos() {
        let schema = compile(&sample_document(), &permissions(), &sample_config()).unwrap();
        let user = schema.entity("User").unwrap();
        let tasks = &user.relations["tasks"];
        assert_eq!(tasks.target, "Task");
        assert_eq!(tasks.cardinality, Cardinality::Many);
        assert_eq!(tasks.own_column, None);
        assert_eq!(tasks.foreign_field, "owner");
        assert_eq!(tasks.foreign_column.as_deref(), Some("ownerId"));
    }

    #[test]
    fn test_delete_permissions_merge() {
        let schema = compile(&sample_document(), &permissions(), &sample_config()).unwrap();
        let delete = schema
            .views
            .iter()
            .find(|v| v.name == "DELETE_TASK")
            .unwrap();
        assert_eq!(delete.fields.len(), 1);
        assert!(delete.statements[1].ends_with(
            r#"WHERE (FALSE OR ("_local_table_"."ownerId" = _meta.current_user_id()) OR (TRUE));"#
        ));
    }

    #[test]
    fn test_custom_field_bindings() {
        let schema = compile(&sample_document(), &[], &sample_config()).unwrap();
        assert_eq!(
            schema.custom_fields,
            [CustomFieldBinding {
                type_name: "User".into(),
                field_name: "avatar".into(),
                resolver: "avatarUrl".into(),
                params: Params::new(),
            }]
        );
        assert!(schema.views.is_empty());
    }

    #[test]
    fn test_unknown_entity_fails() {
        let perms = [Permission::new("Ghost", "all", Operation::Read, &["id"])];
        let err = compile(&sample_document(), &perms, &sample_config()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "permission 'all' references unknown entity 'Ghost'"
        );
    }

    #[test]
    fn test_duplicate_views_fail() {
        let perms = [
            Permission::new("Task", "all", Operation::Read, &["id"])
                .expression(ExpressionRef::new("everyone")),
            Permission::new("Task", "ALL", Operation::Read, &["title"])
                .expression(ExpressionRef::new("everyone")),
        ];
        let err = compile(&sample_document(), &perms, &sample_config()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateView {
                name: "TASK_ALL_PUBLIC".into()
            }
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile(&sample_document(), &permissions(), &sample_config()).unwrap();
        let b = compile(&sample_document(), &permissions(), &sample_config()).unwrap();
        assert_eq!(
            a.statements().collect::<Vec<_>>(),
            b.statements().collect::<Vec<_>>()
        );
    }
}
