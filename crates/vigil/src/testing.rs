//! Shared fixtures for the runtime tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use vigil_compiler::ast::{Definition, Directive, Document, EntityDef, EnumDef, FieldDef, TypeRef};
use vigil_compiler::{
    CompiledSchema, CompilerConfig, ExpressionDef, ExpressionRef, ExpressionRegistry, Fragment,
    Operation, Permission,
};
use vigil_config::ViewConfig;

use crate::pool::ConnectionProvider;
use crate::query::{Row, Value};
use crate::traced::{BoxFuture, Connection};

/// Route runtime logs to the test harness. Filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn id_field() -> FieldDef {
    FieldDef::new("id", TypeRef::named("ID").non_null())
}

/// `User`, `Task` and `Tag`, related through `TaskOwner` (one-to-many) and
/// `TaskTags` (many-to-many).
pub(crate) fn sample_document() -> Document {
    let user = EntityDef::new("User")
        .directive(Directive::table())
        .field(id_field())
        .field(FieldDef::new("name", TypeRef::named("String").non_null()))
        .field(FieldDef::new("email", TypeRef::named("String")))
        .field(
            FieldDef::new("tasks", TypeRef::list(TypeRef::named("Task").non_null()))
                .directive(Directive::relation("TaskOwner")),
        );

    let task = EntityDef::new("Task")
        .directive(Directive::table())
        .field(id_field())
        .field(FieldDef::new("title", TypeRef::named("String").non_null()))
        .field(FieldDef::new("status", TypeRef::named("TaskStatus").non_null()))
        .field(
            FieldDef::new("owner", TypeRef::named("User"))
                .directive(Directive::relation("TaskOwner")),
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

fn sample_expressions() -> ExpressionRegistry {
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
        .with(ExpressionDef::new("everyone", |_, _| Ok(Fragment::public("TRUE"))))
}

/// Views:
///
/// - `TASK_MINE_AUTH` (id, title, owner, tags)
/// - `TASK_ALL_PUBLIC` / `TASK_ALL_AUTH` (id, title, status)
/// - `USER_ME_AUTH` (id, email, tasks)
/// - `USER_PROFILE_PUBLIC` / `USER_PROFILE_AUTH` (id, name)
/// - `TAG_ALL_PUBLIC` / `TAG_ALL_AUTH` (id, label, tasks)
///
/// plus `create_task_mine`, `update_task_mine` and `delete_task`.
pub(crate) fn sample_permissions() -> Vec<Permission> {
    let owner = || ExpressionRef::new("isOwner");
    let everyone = || ExpressionRef::new("everyone");
    vec![
        Permission::new("Task", "mine", Operation::Read, &["id", "title", "owner", "tags"])
            .expression(owner()),
        Permission::new("Task", "all", Operation::Read, &["id", "title", "status"])
            .expression(everyone()),
        Permission::new("User", "me", Operation::Read, &["id", "email", "tasks"])
            .expression(ExpressionRef::new("isSelf")),
        Permission::new("User", "profile", Operation::Read, &["id", "name"]).expression(everyone()),
        Permission::new("Tag", "all", Operation::Read, &["id", "label", "tasks"]).expression(everyone()),
        Permission::new("Task", "mine", Operation::Create, &["title", "owner"]).expression(owner()),
        Permission::new("Task", "mine", Operation::Update, &["id", "title", "status"])
            .expression(owner()),
        Permission::new("Task", "mine", Operation::Delete, &["id"]).expression(owner()),
    ]
}

pub(crate) fn sample_schema() -> CompiledSchema {
    let config = CompilerConfig::new(ViewConfig::default(), sample_expressions());
    vigil_compiler::compile(&sample_document(), &sample_permissions(), &config)
        .expect("sample schema compiles")
}

/// A single JSON cell named `column`, as returned by read statements.
pub(crate) fn json_row(column: &str, json: &str) -> Vec<Row> {
    vec![vec![(column.to_string(), Value::Json(json.to_string()))]]
}

#[derive(Default)]
struct MockState {
    statements: Vec<String>,
    rows: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
    fail_on: Option<String>,
    acquired: usize,
}

/// A scripted database: records every statement, answers queries from a
/// queue of row sets and executes from a queue of affected counts.
#[derive(Clone, Default)]
pub(crate) struct MockDb {
    state: Arc<Mutex<MockState>>,
}

impl MockDb {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_rows(&self, rows: Vec<Row>) -> &Self {
        self.state.lock().unwrap().rows.push_back(rows);
        self
    }

    pub(crate) fn push_affected(&self, affected: u64) -> &Self {
        self.state.lock().unwrap().affected.push_back(affected);
        self
    }

    /// Fail the first statement containing `needle`.
    pub(crate) fn fail_on(&self, needle: &str) -> &Self {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
        self
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// The statements' first words: `["BEGIN", "SELECT", "COMMIT"]`.
    pub(crate) fn verbs(&self) -> Vec<String> {
        self.statements()
            .iter()
            .map(|s| s.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub(crate) fn acquired(&self) -> usize {
        self.state.lock().unwrap().acquired
    }

    fn record(&self, sql: &str) -> crate::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            state.fail_on = None;
            return Err(crate::Error::Pool(format!("scripted failure on: {sql}")));
        }
        Ok(())
    }
}

impl Connection for MockDb {
    fn execute<'a>(&'a self, sql: &'a str, _params: &'a [Value]) -> BoxFuture<'a, crate::Result<u64>> {
        Box::pin(async move {
            self.record(sql)?;
            Ok(self.state.lock().unwrap().affected.pop_front().unwrap_or(1))
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        _params: &'a [Value],
    ) -> BoxFuture<'a, crate::Result<Vec<Row>>> {
        Box::pin(async move {
            self.record(sql)?;
            Ok(self.state.lock().unwrap().rows.pop_front().unwrap_or_default())
        })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move { self.record(sql) })
    }
}

impl ConnectionProvider for MockDb {
    fn acquire(&self) -> BoxFuture<'_, crate::Result<Box<dyn Connection>>> {
        Box::pin(async move {
            self.state.lock().unwrap().acquired += 1;
            Ok(Box::new(self.clone()) as Box<dyn Connection>)
        })
    }
}
