use super::*;
use crate::ast::{ParamValue, Params};
use crate::ir::build_model;
use crate::permission::ExpressionRef;
use crate::testing::{sample_config, sample_document};

fn model() -> Model {
    build_model(&sample_document()).unwrap()
}

fn read(perm: &Permission) -> Result<ReadViews, CompileError> {
    let model = model();
    let entity = &model.entities[&perm.entity];
    build_read_views(&model, entity, perm, &sample_config())
}

fn mutation(perm: &Permission) -> Result<Option<CompiledView>, CompileError> {
    let model = model();
    let entity = &model.entities[&perm.entity];
    build_mutation_view(&model, entity, perm, &sample_config())
}

fn field_names(view: &CompiledView) -> Vec<&str> {
    view.fields.iter().map(|f| f.name.as_str()).collect()
}

fn status(value: &str) -> ExpressionRef {
    let mut params = Params::new();
    params.insert("status".into(), ParamValue::from(value));
    ExpressionRef::with_params("hasStatus", params)
}

#[test]
fn test_auth_only_expression_compiles_auth_view_only() {
    let perm = Permission::new("Task", "mine", Operation::Read, &["id", "title"])
        .expression(ExpressionRef::new("isOwner"));
    let views = read(&perm).unwrap();

    assert_eq!(views.permission_view, "TASK_MINE");
    assert!(views.public.is_none());
    let auth = views.auth.unwrap();
    assert_eq!(auth.name, "TASK_MINE_AUTH");
    assert_eq!(field_names(&auth), ["id", "title", "_viewnames"]);
    insta::assert_snapshot!(auth.statements.join("\n"), @r#"
    DROP VIEW IF EXISTS "api"."TASK_MINE_AUTH";
    CREATE OR REPLACE VIEW "api"."TASK_MINE_AUTH" WITH (security_barrier) AS SELECT "_local_table_"."id" AS "id", "_local_table_"."title" AS "title", ARRAY['TASK_MINE']::text[] AS "_viewnames"
    FROM "public"."Task" AS "_local_table_", LATERAL (SELECT "_local_table_"."ownerId" = _meta.current_user_id() AS "isOwner") AS "isOwner"
    WHERE (FALSE OR "isOwner"."isOwner");
    GRANT SELECT ON "api"."TASK_MINE_AUTH" TO "vigil_user";
    "#);
}

#[test]
fn test_permission_without_expressions_compiles_nothing() {
    let perm = Permission::new("Task", "open", Operation::Read, &["id", "title"]);
    let views = read(&perm).unwrap();
    assert!(views.public.is_none());
    assert!(views.auth.is_none());
}

#[test]
fn test_public_view_keeps_only_public_expressions() {
    let perm = Permission::new("Task", "visible", Operation::Read, &["id", "score"])
        .expression(ExpressionRef::new("everyone"))
        .expression(ExpressionRef::new("isOwner"));
    let views = read(&perm).unwrap();

    let public = views.public.unwrap();
    assert_eq!(field_names(&public), ["id", "score", "_viewnames"]);
    let create = &public.statements[1];
    assert!(create.contains(r#"(length("_local_table_"."title")) AS "score""#));
    assert!(create.ends_with(r#"WHERE (FALSE OR "everyone"."everyone");"#));

    let auth = views.auth.unwrap();
    assert!(
        auth.statements[1].ends_with(r#"WHERE (FALSE OR "everyone"."everyone" OR "isOwner"."isOwner");"#)
    );
}

#[test]
fn test_parameterized_expressions_get_distinct_aliases() {
    let perm = Permission::new("Task", "someStatus", Operation::Read, &["id"])
        .expression(status("OPEN"))
        .expression(status("DONE"))
        .expression(status("OPEN"));
    let public = read(&perm).unwrap().public.unwrap();
    let create = &public.statements[1];

    let open = hashed_alias("hasStatus", r#"{status: "OPEN"}"#);
    let done = hashed_alias("hasStatus", r#"{status: "DONE"}"#);
    assert_ne!(open, done);
    assert_eq!(create.matches(&format!("AS \"{open}\"")).count(), 2);
    assert!(create.contains(&format!(
        r#"WHERE (FALSE OR "{open}"."{open}" OR "{done}"."{done}")"#
    )));
}

#[test]
fn test_json_paths_merge_into_one_field() {
    let forward = Permission::new("Task", "addr", Operation::Read, &["id", "addr.city", "addr.zip"])
        .expression(ExpressionRef::new("everyone"));
    let backward =
        Permission::new("Task", "addr", Operation::Read, &["id", "addr.zip", "addr.city"])
            .expression(ExpressionRef::new("everyone"));

    let a = read(&forward).unwrap().public.unwrap();
    let b = read(&backward).unwrap().public.unwrap();
    assert_eq!(a.statements, b.statements);
    assert_eq!(field_names(&a), ["id", "addr", "_viewnames"]);
    assert!(a.statements[1].contains(
        r#"jsonb_build_object('city', "_local_table_"."addr"->'city', 'zip', "_local_table_"."addr"->'zip') AS "addr""#
    ));
}

#[test]
fn test_json_path_into_plain_field_is_rejected() {
    let perm = Permission::new("Task", "bad", Operation::Read, &["title.length"])
        .expression(ExpressionRef::new("everyone"));
    assert_eq!(
        read(&perm).unwrap_err(),
        CompileError::InvalidJsonPath {
            entity: "Task".into(),
            permission: "bad".into(),
            path: "title.length".into(),
        }
    );
}

#[test]
fn test_unknown_field_is_rejected() {
    let perm = Permission::new("Task", "bad", Operation::Read, &["id", "nope"])
        .expression(ExpressionRef::new("everyone"));
    assert!(matches!(
        read(&perm).unwrap_err(),
        CompileError::UnknownField { ref field, .. } if field == "nope"
    ));
}

#[test]
fn test_unknown_expression_is_rejected() {
    let perm = Permission::new("Task", "bad", Operation::Read, &["id"])
        .expression(ExpressionRef::new("isAdmin"));
    assert_eq!(
        read(&perm).unwrap_err().to_string(),
        "unknown expression 'isAdmin' (used by Task.bad)"
    );
}

#[test]
fn test_relation_fields_project_own_column() {
    let perm = Permission::new("Task", "rel", Operation::Read, &["id", "owner", "tags"])
        .expression(ExpressionRef::new("everyone"));
    let public = read(&perm).unwrap().public.unwrap();
    let create = &public.statements[1];
    assert!(create.contains(r#""_local_table_"."ownerId" AS "owner""#));
    assert!(create.contains(r#""_local_table_"."tagsIds" AS "tags""#));

    let perm = Permission::new("User", "rel", Operation::Read, &["id", "tasks"])
        .expression(ExpressionRef::new("everyone"));
    let public = read(&perm).unwrap().public.unwrap();
    let tasks = public.field("tasks").unwrap();
    assert_eq!(tasks.column, None);
    assert!(!public.statements[1].contains(r#"AS "tasks""#));
}

#[test]
fn test_view_fields_carry_column_types() {
    let perm = Permission::new(
        "Task",
        "typed",
        Operation::Read,
        &["id", "status", "addr", "tags", "score"],
    )
    .expression(ExpressionRef::new("everyone"));
    let public = read(&perm).unwrap().public.unwrap();
    let sql_type = |name: &str| public.field(name).unwrap().sql_type.clone();

    assert_eq!(sql_type("id").as_deref(), Some("UUID"));
    assert_eq!(sql_type("status").as_deref(), Some(r#""TaskStatus""#));
    assert_eq!(sql_type("addr").as_deref(), Some("JSONB"));
    assert_eq!(sql_type("tags").as_deref(), Some("UUID[]"));
    assert_eq!(sql_type("score").as_deref(), Some("INTEGER"));
    assert_eq!(sql_type("_viewnames").as_deref(), Some("TEXT[]"));
}

#[test]
fn test_custom_fields_are_placeholders() {
    let perm = Permission::new("User", "profile", Operation::Read, &["id", "avatar"])
        .expression(ExpressionRef::new("isSelf"));
    let auth = read(&perm).unwrap().auth.unwrap();
    assert!(auth.statements[1].contains(r#"NULL::text AS "avatar""#));

    let model = model();
    let config = CompilerConfig::new(Default::default(), crate::testing::sample_expressions());
    let err = build_read_views(&model, &model.entities["User"], &perm, &config).unwrap_err();
    assert!(matches!(err, CompileError::UnknownResolver { ref resolver, .. } if resolver == "avatarUrl"));
}

#[test]
fn test_update_without_primary_key_fails() {
    let perm = Permission::new("Task", "rename", Operation::Update, &["title"])
        .expression(ExpressionRef::new("isOwner"));
    let err = mutation(&perm).unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"UPDATE permission 'rename' on Task must include field "id""#
    );
}

#[test]
fn test_create_view_adds_primary_key() {
    let perm = Permission::new("Task", "mine", Operation::Create, &["title", "owner"])
        .expression(ExpressionRef::new("isOwner"));
    let view = mutation(&perm).unwrap().unwrap();

    assert_eq!(view.name, "CREATE_TASK_MINE");
    assert_eq!(field_names(&view), ["id", "title", "ownerId"]);
    let inputs: Vec<(&str, String)> = view
        .input
        .iter()
        .map(|i| (i.name.as_str(), i.ty.to_string()))
        .collect();
    assert_eq!(inputs, [("title", "String!".to_string()), ("ownerId", "ID".to_string())]);

    insta::assert_snapshot!(view.statements.join("\n"), @r#"
    DROP VIEW IF EXISTS "api"."CREATE_TASK_MINE";
    CREATE OR REPLACE VIEW "api"."CREATE_TASK_MINE" WITH (security_barrier) AS SELECT "_local_table_"."id" AS "id", "_local_table_"."title" AS "title", "_local_table_"."ownerId" AS "ownerId"
    FROM "public"."Task" AS "_local_table_"
    WHERE (FALSE OR ("_local_table_"."ownerId" = _meta.current_user_id()))
    WITH CHECK OPTION;
    GRANT INSERT ON "api"."CREATE_TASK_MINE" TO "vigil_user";
    "#);
}

#[test]
fn test_update_view_inputs_are_partial() {
    let perm = Permission::new("Task", "mine", Operation::Update, &["id", "title", "tags", "score"])
        .expression(ExpressionRef::new("isOwner"));
    let view = mutation(&perm).unwrap().unwrap();

    assert_eq!(view.name, "UPDATE_TASK_MINE");
    // computed fields are not writable
    assert_eq!(field_names(&view), ["id", "title", "tagsIds"]);
    let inputs: Vec<String> = view
        .input
        .iter()
        .map(|i| format!("{}: {}", i.name, i.ty))
        .collect();
    assert_eq!(inputs, ["id: ID!", "title: String", "tagsIds: [ID!]"]);
    assert!(view.statements[1].ends_with(
        "WHERE (FALSE OR (\"_local_table_\".\"ownerId\" = _meta.current_user_id()))\nWITH CHECK OPTION;"
    ));
    assert_eq!(
        view.statements[2],
        r#"GRANT SELECT, UPDATE ON "api"."UPDATE_TASK_MINE" TO "vigil_user";"#
    );
}

#[test]
fn test_delete_view_has_no_check_option() {
    let perm = Permission::new("Task", "mine", Operation::Delete, &["id"])
        .expression(ExpressionRef::new("isOwner"));
    let view = mutation(&perm).unwrap().unwrap();
    assert!(!view.statements[1].contains("CHECK OPTION"));
}

#[test]
fn test_mutation_without_expressions_compiles_nothing() {
    let perm = Permission::new("Task", "mine", Operation::Delete, &["id"]);
    assert_eq!(mutation(&perm).unwrap(), None);
}

#[test]
fn test_json_paths_are_read_only() {
    let perm = Permission::new("Task", "mine", Operation::Update, &["id", "addr.city"])
        .expression(ExpressionRef::new("isOwner"));
    assert!(matches!(
        mutation(&perm).unwrap_err(),
        CompileError::InvalidJsonPath { .. }
    ));
}
