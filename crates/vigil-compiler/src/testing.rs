//! Shared fixtures for the compiler tests.

use vigil_config::ViewConfig;

use crate::ast::{Definition, Directive, Document, EntityDef, EnumDef, FieldDef, Params, TypeRef};
use crate::config::CompilerConfig;
use crate::expression::{ExpressionDef, ExpressionRegistry, Fragment};

fn id_field() -> FieldDef {
    FieldDef::new("id", TypeRef::named("ID").non_null())
}

/// `User`, `Task` and `Tag`, related through `TaskOwner` (one-to-many) and
/// `TaskTags` (many-to-many), plus the `TaskStatus` enum.
pub(crate) fn sample_document() -> Document {
    let user = EntityDef::new("User")
        .directive(Directive::table())
        .field(id_field())
        .field(FieldDef::new("name", TypeRef::named("String").non_null()))
        .field(FieldDef::new("email", TypeRef::named("String")).directive(Directive::IsUnique))
        .field(
            FieldDef::new("avatar", TypeRef::named("String")).directive(Directive::Custom {
                resolver: "avatarUrl".into(),
                params: Params::new(),
            }),
        )
        .field(
            FieldDef::new("tasks", TypeRef::list(TypeRef::named("Task").non_null()))
                .directive(Directive::relation("TaskOwner")),
        );

    let task = EntityDef::new("Task")
        .directive(Directive::table())
        .field(id_field())
        .field(FieldDef::new("title", TypeRef::named("String").non_null()))
        .field(FieldDef::new(
            "status",
            TypeRef::named("TaskStatus").non_null(),
        ))
        .field(FieldDef::new("addr", TypeRef::named("Address")).directive(Directive::Json))
        .field(
            FieldDef::new("owner", TypeRef::named("User"))
                .directive(Directive::relation("TaskOwner")),
        )
        .field(
            FieldDef::new("score", TypeRef::named("Int")).directive(Directive::Computed {
                expression: "titleLength".into(),
                params: Params::new(),
            }),
        )
        .field(
            FieldDef::new("tags", TypeRef::list(TypeRef::named("Tag")))
                .directive(Directive::relation("TaskTags")),
        );

    let tag = EntityDef::new("Tag")
        .directive(Directive::table())
        .field(id_field())
        .field(FieldDef::new("label", TypeRef::named("String").non_null()))
        .field(
            FieldDef::new("tasks", TypeRef::list(TypeRef::named("Task")))
                .directive(Directive::relation("TaskTags")),
        );

    Document {
        definitions: vec![
            Definition::Enum(EnumDef {
                name: "TaskStatus".into(),
                values: vec!["OPEN".into(), "DONE".into()],
            }),
            Definition::Entity(user),
            Definition::Entity(task),
            Definition::Entity(tag),
        ],
    }
}

/// Expressions used by the sample permissions.
pub(crate) fn sample_expressions() -> ExpressionRegistry {
    ExpressionRegistry::new()
        .with(ExpressionDef::new("isOwner", |ctx, _| {
            Ok(Fragment::auth(format!(
                "{} = {}",
                ctx.column("ownerId"),
                ctx.current_user_id()
            )))
        }))
        .with(ExpressionDef::new("isSelf", |ctx, _| {
            Ok(Fragment::auth(format!(
                "{} = {}",
                ctx.column("id"),
                ctx.current_user_id()
            )))
        }))
        .with(ExpressionDef::new("everyone", |_, _| {
            Ok(Fragment::public("TRUE"))
        }))
        .with(ExpressionDef::new("hasStatus", |ctx, params| {
            let status = params
                .get("status")
                .and_then(|v| v.as_str())
                .ok_or("missing param 'status'")?;
            Ok(Fragment::public(format!(
                "{} = {}",
                ctx.column("status"),
                vigil_sql::Lit(status)
            )))
        }))
        .with(
            ExpressionDef::new("titleLength", |ctx, _| {
                Ok(Fragment::public(format!("length({})", ctx.column("title"))))
            })
            .returns("Int"),
        )
}

pub(crate) fn sample_config() -> CompilerConfig {
    CompilerConfig::new(ViewConfig::default(), sample_expressions()).with_resolver("avatarUrl")
}
