//! Entity definitions to schema IR.
//!
//! Builds the table/column/constraint/relation/enum tree from the parsed
//! document, plus a per-entity field model the view builder works from.

use indexmap::IndexMap;
use tracing::{debug, warn};
use vigil_schema::{
    Cardinality, Column, ColumnPointer, Constraint, DbMeta, Enum, PgType, Relation, RelationSide,
    Table,
};

use crate::ast::{Definition, Directive, Document, EntityDef, FieldDef, Params, TypeRef};
use crate::error::CompileError;

/// The primary key field every table entity is expected to have.
pub const PRIMARY_KEY_FIELD: &str = "id";

const DEFAULT_SCHEMA: &str = "public";

/// How a field is backed.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A plain column
    Column { column: String },
    /// A jsonb column, addressable by dotted paths
    Json { column: String },
    /// A value produced by a registered expression
    Computed { expression: String, params: Params },
    /// A value produced by an application resolver
    Custom { resolver: String, params: Params },
    /// One side of a named relation
    Relation { relation: String },
}

/// A field of a table entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    pub name: String,
    pub ty: TypeRef,
    pub kind: FieldKind,
}

/// A table entity and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityModel {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub fields: IndexMap<String, FieldModel>,
}

/// The IR plus the entity field models.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub entities: IndexMap<String, EntityModel>,
    pub db_meta: DbMeta,
}

struct TableEntity<'a> {
    def: &'a EntityDef,
    schema: String,
    table: String,
}

/// Build the schema IR and entity models from a parsed document.
pub fn build_model(doc: &Document) -> Result<Model, CompileError> {
    let mut db_meta = DbMeta::new();
    let mut table_entities: IndexMap<String, TableEntity<'_>> = IndexMap::new();

    for definition in &doc.definitions {
        match definition {
            Definition::Enum(def) => {
                if db_meta.enums.contains_key(&def.name) {
                    return Err(CompileError::DuplicateDefinition {
                        name: def.name.clone(),
                    });
                }
                db_meta
                    .enums
                    .insert(def.name.clone(), Enum::new(&def.name, def.values.clone()));
            }
            Definition::Entity(def) => {
                let Some((schema, table)) = table_location(def) else {
                    debug!(entity = %def.name, "entity has no @table directive, not persisted");
                    continue;
                };
                if table_entities.contains_key(&def.name) {
                    return Err(CompileError::DuplicateDefinition {
                        name: def.name.clone(),
                    });
                }
                table_entities.insert(def.name.clone(), TableEntity { def, schema, table });
            }
            Definition::Unknown { kind } => {
                warn!(kind = %kind, "skipping unknown definition kind");
            }
        }
    }

    for name in table_entities.keys() {
        if db_meta.enums.contains_key(name) {
            return Err(CompileError::DuplicateDefinition { name: name.clone() });
        }
    }

    let relations = collect_relations(&table_entities)?;

    let mut entities = IndexMap::new();
    for entity in table_entities.values() {
        let (table, model) = build_table(entity, &table_entities, &relations, &mut db_meta)?;
        db_meta.add_table(table);
        entities.insert(model.name.clone(), model);
    }
    db_meta.relations = relations;

    Ok(Model { entities, db_meta })
}

fn table_location(def: &EntityDef) -> Option<(String, String)> {
    def.directives.iter().find_map(|d| match d {
        Directive::Table { schema, name } => Some((
            schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            name.clone().unwrap_or_else(|| def.name.clone()),
        )),
        _ => None,
    })
}

fn relation_name(field: &FieldDef) -> Option<&str> {
    field.directives.iter().find_map(|d| match d {
        Directive::Relation { name } => Some(name.as_str()),
        _ => None,
    })
}

fn cardinality(ty: &TypeRef) -> Cardinality {
    if ty.is_list() {
        Cardinality::Many
    } else {
        Cardinality::One
    }
}

/// Gather both sides of every named relation and decide which sides own a column.
fn collect_relations(
    entities: &IndexMap<String, TableEntity<'_>>,
) -> Result<IndexMap<String, Relation>, CompileError> {
    let mut pending: IndexMap<String, Vec<(&TableEntity<'_>, &FieldDef)>> = IndexMap::new();

    for entity in entities.values() {
        for field in &entity.def.fields {
            let Some(relation) = relation_name(field) else {
                continue;
            };
            let target = field.ty.base_name();
            if !entities.contains_key(target) {
                return Err(CompileError::UnresolvableRelationTarget {
                    entity: entity.def.name.clone(),
                    field: field.name.clone(),
                    relation: relation.to_string(),
                    target: target.to_string(),
                });
            }
            pending
                .entry(relation.to_string())
                .or_default()
                .push((entity, field));
        }
    }

    let mut relations = IndexMap::new();
    for (name, sides) in pending {
        let [(a_entity, a_field), (b_entity, b_field)] = sides[..] else {
            return Err(CompileError::MalformedRelation {
                relation: name,
                reason: format!("expected exactly two sides, found {}", sides.len()),
            });
        };
        if a_field.ty.base_name() != b_entity.def.name || b_field.ty.base_name() != a_entity.def.name
        {
            return Err(CompileError::MalformedRelation {
                relation: name,
                reason: format!(
                    "{}.{} and {}.{} do not point at each other",
                    a_entity.def.name, a_field.name, b_entity.def.name, b_field.name
                ),
            });
        }

        let a_card = cardinality(&a_field.ty);
        let b_card = cardinality(&b_field.ty);
        let mut relation = Relation::new(&name);
        relation.add_side(relation_side(a_entity, a_field, a_card, b_entity, b_card));
        relation.add_side(relation_side(b_entity, b_field, b_card, a_entity, a_card));
        relations.insert(name, relation);
    }

    Ok(relations)
}

fn relation_side(
    own: &TableEntity<'_>,
    field: &FieldDef,
    own_card: Cardinality,
    foreign: &TableEntity<'_>,
    foreign_card: Cardinality,
) -> RelationSide {
    let column_name = match (own_card, foreign_card) {
        (Cardinality::One, _) => Some(format!("{}Id", field.name)),
        (Cardinality::Many, Cardinality::Many) => Some(format!("{}Ids", field.name)),
        (Cardinality::Many, Cardinality::One) => None,
    };
    RelationSide {
        schema_name: own.schema.clone(),
        table_name: own.table.clone(),
        field_name: field.name.clone(),
        cardinality: own_card,
        column_name,
        foreign_schema_name: foreign.schema.clone(),
        foreign_table_name: foreign.table.clone(),
    }
}

fn classify(field: &FieldDef) -> FieldKind {
    for directive in &field.directives {
        match directive {
            Directive::Computed { expression, params } => {
                return FieldKind::Computed {
                    expression: expression.clone(),
                    params: params.clone(),
                };
            }
            Directive::Custom { resolver, params } => {
                return FieldKind::Custom {
                    resolver: resolver.clone(),
                    params: params.clone(),
                };
            }
            Directive::Relation { name } => {
                return FieldKind::Relation {
                    relation: name.clone(),
                };
            }
            Directive::Json => {
                return FieldKind::Json {
                    column: field.name.clone(),
                };
            }
            _ => {}
        }
    }
    if field.ty.base_name() == "JSON" {
        return FieldKind::Json {
            column: field.name.clone(),
        };
    }
    FieldKind::Column {
        column: field.name.clone(),
    }
}

/// Column type of a scalar named in the schema language.
pub(crate) fn scalar_type(name: &str) -> Option<PgType> {
    Some(match name {
        "ID" => PgType::Uuid,
        "String" => PgType::Varchar,
        "Int" => PgType::Integer,
        "BigInt" => PgType::BigInt,
        "Float" => PgType::DoublePrecision,
        "Boolean" => PgType::Boolean,
        "DateTime" => PgType::Timestamptz,
        "Date" => PgType::Date,
        "JSON" => PgType::Jsonb,
        _ => return None,
    })
}

fn build_table(
    entity: &TableEntity<'_>,
    entities: &IndexMap<String, TableEntity<'_>>,
    relations: &IndexMap<String, Relation>,
    db_meta: &mut DbMeta,
) -> Result<(Table, EntityModel), CompileError> {
    let def = entity.def;
    let mut table = Table::new(&entity.schema, &entity.table);
    table.description = def.description.clone();

    for directive in &def.directives {
        match directive {
            Directive::Table { .. } => {}
            Directive::Migrate { from, from_schema } => {
                table.old_name = from.clone();
                table.old_schema_name = from_schema.clone();
            }
            other => {
                warn!(entity = %def.name, directive = other.name(), "ignoring directive on entity");
            }
        }
    }

    let mut fields = IndexMap::new();
    for field in &def.fields {
        for directive in &field.directives {
            if let Directive::Unknown { name } = directive {
                warn!(entity = %def.name, field = %field.name, directive = %name, "ignoring unknown directive");
            }
        }

        let kind = classify(field);
        match &kind {
            FieldKind::Computed { .. } | FieldKind::Custom { .. } => {}
            FieldKind::Relation { relation } => {
                add_relation_column(&mut table, field, relation, relations)?;
            }
            FieldKind::Json { column } => {
                let mut col = Column::new(column, PgType::Jsonb);
                col.nullable = !field.ty.is_non_null();
                finish_column(&mut table, field, col);
            }
            FieldKind::Column { column } => {
                let base = field.ty.base_name();
                let mut col = if field.ty.is_list() {
                    Column::new(column, PgType::Jsonb)
                } else if let Some(pg_type) = scalar_type(base) {
                    Column::new(column, pg_type)
                } else if let Some(enumeration) = db_meta.enums.get_mut(base) {
                    enumeration.columns.push(ColumnPointer::new(
                        &entity.schema,
                        &entity.table,
                        column,
                    ));
                    Column::enumeration(column, base)
                } else if entities.contains_key(base) {
                    return Err(CompileError::MalformedRelation {
                        relation: format!("{}.{}", def.name, field.name),
                        reason: format!("field references entity '{base}' without @relation"),
                    });
                } else {
                    return Err(CompileError::UnknownType {
                        entity: def.name.clone(),
                        field: field.name.clone(),
                        ty: base.to_string(),
                    });
                };

                if field.name == PRIMARY_KEY_FIELD && base == "ID" && !field.ty.is_list() {
                    col = col.not_null().with_default("gen_random_uuid()");
                    table.add_constraint(Constraint::primary_key(
                        &entity.table,
                        vec![column.clone()],
                    ));
                } else {
                    col.nullable = !field.ty.is_non_null();
                }
                finish_column(&mut table, field, col);
            }
        }

        fields.insert(
            field.name.clone(),
            FieldModel {
                name: field.name.clone(),
                ty: field.ty.clone(),
                kind,
            },
        );
    }

    let model = EntityModel {
        name: def.name.clone(),
        schema_name: entity.schema.clone(),
        table_name: entity.table.clone(),
        fields,
    };
    Ok((table, model))
}

fn finish_column(table: &mut Table, field: &FieldDef, mut col: Column) {
    col.description = field.description.clone();
    for directive in &field.directives {
        match directive {
            Directive::IsUnique => {
                table.add_constraint(Constraint::unique(&table.name, &col.name));
            }
            Directive::Migrate { from, .. } => {
                col.old_name = from.clone();
            }
            _ => {}
        }
    }
    table.add_column(col);
}

fn add_relation_column(
    table: &mut Table,
    field: &FieldDef,
    relation: &str,
    relations: &IndexMap<String, Relation>,
) -> Result<(), CompileError> {
    let side = relations
        .get(relation)
        .and_then(|r| r.split(&table.schema_name, &table.name, &field.name))
        .map(|(own, _)| own)
        .ok_or_else(|| CompileError::MalformedRelation {
            relation: relation.to_string(),
            reason: format!("no side declared by {}.{}", table.name, field.name),
        })?;

    let Some(column_name) = &side.column_name else {
        return Ok(());
    };

    let pg_type = match side.cardinality {
        Cardinality::One => PgType::Uuid,
        Cardinality::Many => PgType::UuidArray,
    };
    let mut col = Column::new(column_name, pg_type);
    col.nullable = !field.ty.is_non_null();
    if side.cardinality == Cardinality::One {
        let references = ColumnPointer::new(
            &side.foreign_schema_name,
            &side.foreign_table_name,
            PRIMARY_KEY_FIELD,
        );
        let constraint = Constraint::foreign_key(&table.name, column_name, references);
        table.add_constraint(constraint);
    }
    finish_column(table, field, col);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_document;
    use vigil_schema::ConstraintKind;

    #[test]
    fn test_tables_columns_and_constraints() {
        let model = build_model(&sample_document()).unwrap();
        let task = model.db_meta.table("public", "Task").unwrap();

        let columns: Vec<&str> = task.columns.keys().map(String::as_str).collect();
        assert_eq!(
            columns,
            ["id", "title", "status", "addr", "ownerId", "tagsIds"]
        );
        assert_eq!(task.primary_key(), Some(&["id".to_string()][..]));

        let id = &task.columns["id"];
        assert!(!id.nullable);
        assert_eq!(id.pg_type, PgType::Uuid);

        let owner = &task.columns["ownerId"];
        assert_eq!(owner.pg_type, PgType::Uuid);
        assert!(owner.nullable);
        let fk = &task.constraints["Task_ownerId_fkey"];
        assert_eq!(fk.kind, ConstraintKind::ForeignKey);
        assert_eq!(
            fk.references,
            Some(ColumnPointer::new("public", "User", "id"))
        );

        assert_eq!(task.columns["tagsIds"].pg_type, PgType::UuidArray);
        assert_eq!(task.columns["status"].custom_type.as_deref(), Some("TaskStatus"));

        let user = model.db_meta.table("public", "User").unwrap();
        assert!(user.constraints.contains_key("User_email_key"));
        // the MANY side of a one-to-many relation owns no column
        assert!(!user.columns.contains_key("tasksId"));
        assert!(!user.columns.contains_key("avatar"));
    }

    #[test]
    fn test_enum_tracks_referencing_columns() {
        let model = build_model(&sample_document()).unwrap();
        let status = &model.db_meta.enums["TaskStatus"];
        assert_eq!(status.values, ["OPEN", "DONE"]);
        assert_eq!(
            status.columns,
            [ColumnPointer::new("public", "Task", "status")]
        );
    }

    #[test]
    fn test_relation_sides() {
        let model = build_model(&sample_document()).unwrap();
        let owner = &model.db_meta.relations["TaskOwner"];
        let (own, foreign) = owner.split("public", "Task", "owner").unwrap();
        assert_eq!(own.cardinality, Cardinality::One);
        assert_eq!(own.column_name.as_deref(), Some("ownerId"));
        assert_eq!(foreign.field_name, "tasks");
        assert_eq!(foreign.column_name, None);
    }

    #[test]
    fn test_field_kinds() {
        let model = build_model(&sample_document()).unwrap();
        let task = &model.entities["Task"];
        assert!(matches!(task.fields["addr"].kind, FieldKind::Json { .. }));
        assert!(matches!(
            task.fields["score"].kind,
            FieldKind::Computed { .. }
        ));
        assert!(matches!(
            task.fields["owner"].kind,
            FieldKind::Relation { .. }
        ));
    }

    #[test]
    fn test_relation_to_unknown_entity_fails() {
        let mut doc = sample_document();
        doc.definitions.push(Definition::Entity(
            EntityDef::new("Note")
                .directive(Directive::table())
                .field(FieldDef::new("id", TypeRef::named("ID").non_null()))
                .field(
                    FieldDef::new("author", TypeRef::named("Ghost"))
                        .directive(Directive::relation("NoteAuthor")),
                ),
        ));
        let err = build_model(&doc).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnresolvableRelationTarget { ref target, .. } if target == "Ghost"
        ));
    }

    #[test]
    fn test_one_sided_relation_is_malformed() {
        let doc = Document {
            definitions: vec![
                Definition::Entity(
                    EntityDef::new("A")
                        .directive(Directive::table())
                        .field(FieldDef::new("id", TypeRef::named("ID").non_null()))
                        .field(
                            FieldDef::new("b", TypeRef::named("B"))
                                .directive(Directive::relation("AB")),
                        ),
                ),
                Definition::Entity(
                    EntityDef::new("B")
                        .directive(Directive::table())
                        .field(FieldDef::new("id", TypeRef::named("ID").non_null())),
                ),
            ],
        };
        let err = build_model(&doc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "relation 'AB' is malformed: expected exactly two sides, found 1"
        );
    }

    #[test]
    fn test_unknown_definitions_are_skipped() {
        let mut doc = sample_document();
        doc.definitions.push(Definition::Unknown {
            kind: "ScalarTypeDefinition".into(),
        });
        let model = build_model(&doc).unwrap();
        assert_eq!(model.entities.len(), 3);
    }

    #[test]
    fn test_rename_hints() {
        let doc = Document {
            definitions: vec![Definition::Entity(
                EntityDef::new("Todo")
                    .directive(Directive::table())
                    .directive(Directive::Migrate {
                        from: Some("Task".into()),
                        from_schema: None,
                    })
                    .field(FieldDef::new("id", TypeRef::named("ID").non_null()))
                    .field(
                        FieldDef::new("label", TypeRef::named("String")).directive(
                            Directive::Migrate {
                                from: Some("title".into()),
                                from_schema: None,
                            },
                        ),
                    ),
            )],
        };
        let model = build_model(&doc).unwrap();
        let todo = model.db_meta.table("public", "Todo").unwrap();
        assert_eq!(todo.old_name.as_deref(), Some("Task"));
        assert_eq!(todo.columns["label"].old_name.as_deref(), Some("title"));
    }
}
