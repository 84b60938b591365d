use std::sync::Mutex;

use super::*;
use crate::hooks::{Hook, HookRegistry};
use crate::query::{Filter, OperatorRegistry};
use crate::testing::{MockDb, init_tracing, json_row, sample_schema};
use crate::traced::BoxFuture;
use vigil_config::CostConfig;

fn executor(db: &MockDb, runtime: RuntimeConfig) -> Executor {
    init_tracing();
    Executor::new(Arc::new(sample_schema()), runtime, Arc::new(db.clone()))
}

fn input(pairs: &[(&str, &str)]) -> IndexMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

fn titles() -> FieldSelection {
    FieldSelection::new().field("id").field("title")
}

/// Records every hook call; optionally fails one stage.
#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    fail_at: Option<&'static str>,
}

impl Recorder {
    fn failing_at(stage: &'static str) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, stage: &str, entry: String) -> crate::Result<()> {
        self.log.lock().unwrap().push(entry);
        if self.fail_at == Some(stage) {
            return Err(Error::hook("recorder", format!("refusing {stage}")));
        }
        Ok(())
    }
}

impl Hook for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn pre_query<'a>(
        &'a self,
        conn: &'a dyn Connection,
        context: &'a RequestContext,
        requires_auth: bool,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            if let Some(token) = &context.access_token {
                conn.execute("SET LOCAL vigil.token = $1", &[Value::from(token.as_str())])
                    .await?;
            }
            self.record("pre_query", format!("pre_query auth={requires_auth}"))
        })
    }

    fn pre_commit<'a>(
        &'a self,
        _conn: &'a dyn Connection,
        info: &'a HookInfo,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            let id = info.entity_id.as_deref().unwrap_or("-");
            self.record("pre_commit", format!("pre_commit {} {id}", info.mutation))
        })
    }

    fn post_commit<'a>(
        &'a self,
        info: &'a HookInfo,
        _context: &'a RequestContext,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            let refetched = info.return_data.is_some();
            self.record("post_commit", format!("post_commit refetched={refetched}"))
        })
    }
}

fn with_recorder(recorder: &Recorder) -> RuntimeConfig {
    RuntimeConfig::default().with_hooks(HookRegistry::new().with(recorder.clone()))
}

#[tokio::test]
async fn test_query_runs_in_transaction() {
    let db = MockDb::new();
    db.push_rows(json_row("tasks", r#"[{"id":"t1","title":"Buy milk"}]"#));

    let response = executor(&db, RuntimeConfig::default())
        .query(RequestContext::anonymous(), "tasks", titles())
        .await
        .unwrap();

    assert_eq!(response.data, r#"[{"id":"t1","title":"Buy milk"}]"#);
    assert!(!response.auth_required);
    assert_eq!(db.verbs(), ["BEGIN", "SELECT", "COMMIT"]);
    assert_eq!(db.acquired(), 1);
}

#[tokio::test]
async fn test_invalid_query_never_takes_a_connection() {
    let db = MockDb::new();
    let err = executor(&db, RuntimeConfig::default())
        .query(RequestContext::anonymous(), "projects", titles())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RuntimeQuery(RuntimeQueryError::UnknownQuery(_))
    ));
    assert_eq!(db.acquired(), 0);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_failed_query_rolls_back() {
    let db = MockDb::new();
    db.fail_on("json_agg");

    let err = executor(&db, RuntimeConfig::default())
        .query(RequestContext::anonymous(), "tasks", titles())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Pool(_)));
    assert_eq!(db.verbs(), ["BEGIN", "SELECT", "ROLLBACK"]);
}

#[tokio::test]
async fn test_unexpected_response_shape_is_refused() {
    let db = MockDb::new();
    let mut rows = json_row("tasks", "[]");
    rows.extend(json_row("tasks", "[]"));
    db.push_rows(rows);
    db.push_rows(json_row("password", r#""hunter2""#));
    db.push_rows(vec![vec![("tasks".to_string(), Value::from("plain text"))]]);
    let executor = executor(&db, RuntimeConfig::default());

    for expected in ["expected 1 row, got 2", "expected column 'tasks', got 'password'", "expected JSON"] {
        let err = executor
            .query(RequestContext::anonymous(), "tasks", titles())
            .await
            .unwrap_err();
        let Error::InjectionSuspicion(reason) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(reason.starts_with(expected), "{reason}");
    }
    assert_eq!(db.verbs().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn test_echoed_placeholder_is_refused() {
    let db = MockDb::new();
    db.push_rows(json_row("tasks", r#"[{"id":"t1","title":"$1"}]"#));

    let selection = titles().filter(Filter::field("title", "iLike", "%milk%"));
    let err = executor(&db, RuntimeConfig::default())
        .query(RequestContext::anonymous(), "tasks", selection)
        .await
        .unwrap_err();

    let Error::InjectionSuspicion(reason) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(reason, r#"payload contains placeholder "$1""#);
    assert_eq!(db.verbs(), ["BEGIN", "SELECT", "ROLLBACK"]);
}

#[tokio::test]
async fn test_placeholder_lookalikes_beyond_params_pass() {
    let db = MockDb::new();
    db.push_rows(json_row("tasks", r#"[{"id":"t1","title":"$1"}]"#));

    let response = executor(&db, RuntimeConfig::default())
        .query(RequestContext::anonymous(), "tasks", titles())
        .await
        .unwrap();
    assert_eq!(response.data, r#"[{"id":"t1","title":"$1"}]"#);
}

#[tokio::test]
async fn test_expensive_query_is_explained_but_still_runs() {
    let db = MockDb::new();
    db.push_rows(vec![vec![(
        "QUERY PLAN".to_string(),
        Value::from("Aggregate  (cost=10.00..5000.00 rows=1 width=32)"),
    )]]);
    db.push_rows(json_row("tasks", "[]"));
    let mut runtime = RuntimeConfig::default();
    runtime.cost = CostConfig {
        ceiling: 100.0,
        depth_threshold: 1,
    };

    let selection = FieldSelection::new()
        .field("title")
        .relation("owner", FieldSelection::new().field("name"));
    let response = executor(&db, runtime)
        .query(RequestContext::authenticated("token"), "tasks", selection)
        .await
        .unwrap();

    assert_eq!(response.data, "[]");
    assert!(response.auth_required);
    assert_eq!(db.verbs(), ["BEGIN", "EXPLAIN", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_flat_query_is_not_explained() {
    let db = MockDb::new();
    db.push_rows(json_row("tasks", "[]"));
    let mut runtime = RuntimeConfig::default();
    runtime.cost.depth_threshold = 0;

    executor(&db, runtime)
        .query(RequestContext::anonymous(), "tasks", titles())
        .await
        .unwrap();
    assert_eq!(db.verbs(), ["BEGIN", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_update_refetches_entity() {
    let db = MockDb::new();
    db.push_affected(1);
    db.push_rows(json_row("Task", r#"{"id":"t1","title":"Buy oat milk"}"#));

    let response = executor(&db, RuntimeConfig::default())
        .mutate(
            RequestContext::authenticated("token"),
            "update_task_mine",
            input(&[("id", "t1"), ("title", "Buy oat milk")]),
            titles(),
        )
        .await
        .unwrap();

    assert_eq!(response.id.as_deref(), Some("t1"));
    assert_eq!(
        response.data.as_deref(),
        Some(r#"{"id":"t1","title":"Buy oat milk"}"#)
    );
    assert_eq!(db.verbs(), ["BEGIN", "UPDATE", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_nested_refetch_is_explained() {
    let db = MockDb::new();
    db.push_affected(1);
    db.push_rows(vec![vec![(
        "QUERY PLAN".to_string(),
        Value::from("Aggregate  (cost=10.00..5000.00 rows=1 width=32)"),
    )]]);
    db.push_rows(json_row("Task", r#"{"title":"x","owner":{"name":"Ada"}}"#));
    let mut runtime = RuntimeConfig::default();
    runtime.cost = CostConfig {
        ceiling: 100.0,
        depth_threshold: 1,
    };

    let selection = FieldSelection::new()
        .field("title")
        .relation("owner", FieldSelection::new().field("name"));
    let response = executor(&db, runtime)
        .mutate(
            RequestContext::authenticated("token"),
            "update_task_mine",
            input(&[("id", "t1"), ("title", "x")]),
            selection,
        )
        .await
        .unwrap();

    assert_eq!(
        response.data.as_deref(),
        Some(r#"{"title":"x","owner":{"name":"Ada"}}"#)
    );
    assert_eq!(db.verbs(), ["BEGIN", "UPDATE", "EXPLAIN", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_mutation_without_affected_rows_conflicts() {
    let db = MockDb::new();
    db.push_affected(0);

    let err = executor(&db, RuntimeConfig::default())
        .mutate(
            RequestContext::authenticated("token"),
            "update_task_mine",
            input(&[("id", "t1"), ("title", "Not mine")]),
            titles(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "No rows affected by this mutation. Either the entity does not exist or you are not permitted."
    );
    assert_eq!(db.verbs(), ["BEGIN", "UPDATE", "ROLLBACK"]);
}

#[tokio::test]
async fn test_create_reads_generated_id() {
    let db = MockDb::new();
    db.push_rows(vec![vec![("id".to_string(), Value::from("t9"))]]);
    db.push_rows(json_row("Task", r#"{"id":"t9","title":"Walk dog"}"#));

    let response = executor(&db, RuntimeConfig::default())
        .mutate(
            RequestContext::authenticated("token"),
            "create_task_mine",
            input(&[("title", "Walk dog"), ("ownerId", "u1")]),
            titles(),
        )
        .await
        .unwrap();

    assert_eq!(response.id.as_deref(), Some("t9"));
    assert!(response.data.is_some());
    let statements = db.statements();
    assert_eq!(
        statements[2],
        r#"SELECT _meta.get_last_generated_uuid() AS "id""#
    );
    assert_eq!(db.verbs(), ["BEGIN", "INSERT", "SELECT", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_unreadable_entity_returns_no_data() {
    let db = MockDb::new();
    db.push_rows(vec![vec![("id".to_string(), Value::from("t9"))]]);

    // anonymous callers cannot read owner
    let selection = FieldSelection::new()
        .field("title")
        .relation("owner", FieldSelection::new().field("name"));
    let response = executor(&db, RuntimeConfig::default())
        .mutate(
            RequestContext::anonymous(),
            "create_task_mine",
            input(&[("title", "Walk dog")]),
            selection,
        )
        .await
        .unwrap();

    assert_eq!(response.id.as_deref(), Some("t9"));
    assert_eq!(response.data, None);
    assert_eq!(db.verbs(), ["BEGIN", "INSERT", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_delete_returns_id_only() {
    let db = MockDb::new();

    let response = executor(&db, RuntimeConfig::default())
        .mutate(
            RequestContext::authenticated("token"),
            "delete_task",
            input(&[("id", "t1")]),
            titles(),
        )
        .await
        .unwrap();

    assert_eq!(
        response,
        MutationResponse {
            id: Some("t1".into()),
            data: None
        }
    );
    assert_eq!(db.verbs(), ["BEGIN", "DELETE", "COMMIT"]);
}

#[tokio::test]
async fn test_hooks_run_in_order() {
    let db = MockDb::new();
    db.push_rows(json_row("Task", r#"{"id":"t1","title":"x"}"#));
    let recorder = Recorder::default();

    executor(&db, with_recorder(&recorder))
        .mutate(
            RequestContext::authenticated("token"),
            "update_task_mine",
            input(&[("id", "t1"), ("title", "x")]),
            titles(),
        )
        .await
        .unwrap();

    assert_eq!(
        recorder.log(),
        [
            "pre_query auth=true",
            "pre_commit update_task_mine t1",
            "post_commit refetched=true",
        ]
    );
    assert_eq!(db.verbs(), ["BEGIN", "SET", "UPDATE", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_anonymous_query_hooks() {
    let db = MockDb::new();
    db.push_rows(json_row("tasks", "[]"));
    let recorder = Recorder::default();

    executor(&db, with_recorder(&recorder))
        .query(RequestContext::anonymous(), "tasks", titles())
        .await
        .unwrap();

    assert_eq!(recorder.log(), ["pre_query auth=false"]);
    assert_eq!(db.verbs(), ["BEGIN", "SELECT", "COMMIT"]);
}

#[tokio::test]
async fn test_pre_commit_failure_rolls_back() {
    let db = MockDb::new();
    let recorder = Recorder::failing_at("pre_commit");

    let err = executor(&db, with_recorder(&recorder))
        .mutate(
            RequestContext::authenticated("token"),
            "delete_task",
            input(&[("id", "t1")]),
            FieldSelection::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "hook 'recorder' failed: refusing pre_commit");
    assert_eq!(db.verbs(), ["BEGIN", "SET", "DELETE", "ROLLBACK"]);
    assert_eq!(recorder.log().len(), 2);
}

#[tokio::test]
async fn test_post_commit_failure_is_reported_after_commit() {
    let db = MockDb::new();
    let recorder = Recorder::failing_at("post_commit");

    let err = executor(&db, with_recorder(&recorder))
        .mutate(
            RequestContext::authenticated("token"),
            "delete_task",
            input(&[("id", "t1")]),
            FieldSelection::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Hook { .. }));
    assert_eq!(db.verbs(), ["BEGIN", "SET", "DELETE", "COMMIT"]);
}

#[test]
fn test_response_accepts_null_lookup() {
    let schema = sample_schema();
    let operators = OperatorRegistry::default();
    let lookup = QueryBuilder::new(&schema, &operators, false)
        .lookup("Task", Value::from("t1"), &titles())
        .unwrap();
    let rows = vec![vec![("Task".to_string(), Value::Null)]];
    assert_eq!(response(rows, &lookup).unwrap(), None);
}
