//! Read queries.
//!
//! A selection becomes a single statement returning the whole response tree
//! as JSON in one column. Every relation is a correlated sub-select,
//! aggregated with `json_agg` (to-many) or `row_to_json` (to-one):
//!
//! ```text
//! SELECT coalesce(json_agg(row_to_json("_r3")), '[]'::json) AS "tasks"
//! FROM (SELECT "_v0"."title" AS "title", (SELECT row_to_json("_r2") ...) AS "owner"
//!       FROM "api"."TASK_ALL_PUBLIC" AS "_v0"
//!       WHERE ("_v0"."title" ILIKE $1)) AS "_r3"
//! ```
//!
//! Rows are read through the caller's views only: PUBLIC variants for
//! anonymous callers, AUTH variants otherwise. When an entity has several
//! such views, their rows are unioned and merged by id, so a row visible
//! through any of them is returned. Fields a view does not expose come back
//! NULL for rows only that view admits.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;
use vigil_compiler::{CompiledSchema, EntityType, RelationInfo, VIEWNAMES_FIELD, ViewRef};
use vigil_schema::Cardinality;
use vigil_sql::{
    BinOp, Expr, FromClause, OrderBy, ParamName, SelectColumn, SelectStmt, TableName, TableRef,
    render,
};

use super::{FieldSelection, Filter, OperatorRegistry, Value};
use crate::cost::StaticCost;
use crate::error::RuntimeQueryError;

const ID: &str = "id";

/// What the response column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A JSON array, `[]` when nothing matched
    List,
    /// A JSON object, or NULL when the row is not visible
    Single,
}

/// A read statement, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    /// Values for `$1`, `$2`, ... in order
    pub params: Vec<Value>,
    /// The only column of the only row the statement returns
    pub response_column: String,
    pub shape: ResponseShape,
    /// Whether AUTH views were used
    pub auth_required: bool,
    pub cost: StaticCost,
}

/// Values bound while building, under generated names.
#[derive(Debug, Default)]
pub(crate) struct Params {
    values: IndexMap<ParamName, Value>,
}

impl Params {
    pub(crate) fn bind(&mut self, value: Value) -> Expr {
        let name = ParamName::from(format!("p{}", self.values.len()));
        self.values.insert(name.clone(), value);
        Expr::param(name)
    }

    /// Values in placeholder order.
    pub(crate) fn ordered(&self, names: &[ParamName]) -> Vec<Value> {
        names
            .iter()
            .map(|name| self.values.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[derive(Default)]
struct State {
    params: Params,
    aliases: usize,
    auth_required: bool,
    cost: StaticCost,
}

impl State {
    fn alias(&mut self, prefix: char) -> TableName {
        let n = self.aliases;
        self.aliases += 1;
        format!("_{prefix}{n}").into()
    }
}

/// How a nested level is tied to the parent row.
enum Join {
    /// The parent exposes the child's id (or an array of ids) under the relation field.
    ParentHolds { field: String, many: bool },
    /// The child exposes the parent's id under its side of the relation.
    ChildHolds { field: String },
}

impl Join {
    fn of(info: &RelationInfo, field: &str) -> Self {
        match info.own_column {
            Some(_) => Join::ParentHolds {
                field: field.to_string(),
                many: info.cardinality == Cardinality::Many,
            },
            None => Join::ChildHolds {
                field: info.foreign_field.clone(),
            },
        }
    }

    fn parent_field(&self) -> &str {
        match self {
            Join::ParentHolds { field, .. } => field,
            Join::ChildHolds { .. } => ID,
        }
    }

    fn child_field(&self) -> &str {
        match self {
            Join::ParentHolds { .. } => ID,
            Join::ChildHolds { field } => field,
        }
    }

    fn condition(&self, parent: &TableName, child: &TableName) -> Expr {
        match self {
            Join::ParentHolds { field, many: false } => col(child, ID).eq(col(parent, field)),
            Join::ParentHolds { field, many: true } => {
                col(child, ID).eq(Expr::call("ANY", vec![col(parent, field)]))
            }
            Join::ChildHolds { field } => col(child, field).eq(col(parent, ID)),
        }
    }
}

struct Correlation {
    parent: TableName,
    join: Join,
}

enum Planned<'s> {
    Scalar(&'s str),
    Relation {
        name: &'s str,
        cardinality: Cardinality,
        target: &'s EntityType,
        join: Join,
        selection: &'s FieldSelection,
    },
}

fn col(table: &TableName, column: &str) -> Expr {
    Expr::qualified_column(table.clone(), column.into())
}

fn table_ref(view: &ViewRef) -> TableRef {
    TableRef::qualified(view.schema_name.as_str().into(), view.name.as_str().into())
}

/// `row_to_json("alias")`
fn row_json(alias: &TableName) -> Expr {
    Expr::call("row_to_json", vec![Expr::column(alias.as_str().into())])
}

/// `coalesce(json_agg(row_to_json("alias")), '[]'::json)`
fn json_list(alias: &TableName) -> Expr {
    Expr::call(
        "coalesce",
        vec![
            Expr::call("json_agg", vec![row_json(alias)]),
            Expr::string("[]").cast("json"),
        ],
    )
}

fn filter_fields<'f>(filter: &'f Filter, out: &mut Vec<&'f str>) {
    match filter {
        Filter::And(items) | Filter::Or(items) => {
            for item in items {
                filter_fields(item, out);
            }
        }
        Filter::Field { field, .. } => out.push(field),
    }
}

/// Builds read statements for one caller.
pub struct QueryBuilder<'a> {
    schema: &'a CompiledSchema,
    operators: &'a OperatorRegistry,
    authenticated: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        schema: &'a CompiledSchema,
        operators: &'a OperatorRegistry,
        authenticated: bool,
    ) -> Self {
        Self {
            schema,
            operators,
            authenticated,
        }
    }

    /// A list query from the catalog.
    pub fn query(&self, name: &str, selection: &FieldSelection) -> Result<BuiltQuery, RuntimeQueryError> {
        let def = self
            .schema
            .queries
            .get(name)
            .ok_or_else(|| RuntimeQueryError::UnknownQuery(name.to_string()))?;
        let entity = self.entity(&def.entity)?;

        let mut state = State::default();
        let rows = self.rows(entity, selection, None, None, 0, &mut state)?;
        let alias = state.alias('r');
        let stmt = SelectStmt::new()
            .column(SelectColumn::aliased(json_list(&alias), name.into()))
            .from(FromClause::subquery(rows, alias));
        Ok(self.finish(&stmt, name, ResponseShape::List, state))
    }

    /// One entity by id, as a single JSON object.
    ///
    /// The statement always returns one row; the object is NULL when the
    /// caller cannot see the entity.
    pub fn lookup(
        &self,
        entity: &str,
        id: Value,
        selection: &FieldSelection,
    ) -> Result<BuiltQuery, RuntimeQueryError> {
        let entity_type = self.entity(entity)?;

        let mut state = State::default();
        let rows = self
            .rows(entity_type, selection, None, Some(id), 0, &mut state)?
            .limit(Expr::int(1));
        let alias = state.alias('r');
        let object = SelectStmt::new()
            .column(SelectColumn::expr(row_json(&alias)))
            .from(FromClause::subquery(rows, alias));
        let stmt = SelectStmt::new().column(SelectColumn::aliased(Expr::subquery(object), entity.into()));
        Ok(self.finish(&stmt, entity, ResponseShape::Single, state))
    }

    fn finish(&self, stmt: &SelectStmt, column: &str, shape: ResponseShape, state: State) -> BuiltQuery {
        let rendered = render(stmt);
        let params = state.params.ordered(&rendered.params);
        debug!(
            column,
            params = params.len(),
            depth = state.cost.depth,
            fan_out = state.cost.fan_out,
            auth = state.auth_required,
            "read query built"
        );
        BuiltQuery {
            sql: rendered.sql,
            params,
            response_column: column.to_string(),
            shape,
            auth_required: state.auth_required,
            cost: state.cost,
        }
    }

    fn entity(&self, name: &str) -> Result<&'a EntityType, RuntimeQueryError> {
        self.schema
            .entity(name)
            .ok_or_else(|| RuntimeQueryError::UnknownQuery(name.to_string()))
    }

    /// Reject fields the entity doesn't have, and fields an anonymous caller
    /// can't see through any PUBLIC view.
    fn check_visible(&self, entity: &EntityType, field: &str) -> Result<(), RuntimeQueryError> {
        if !entity.fields.contains_key(field) {
            return Err(RuntimeQueryError::UnknownField {
                entity: entity.name.clone(),
                field: field.to_string(),
            });
        }
        let public = entity
            .read_views
            .iter()
            .filter_map(|rv| rv.public.as_ref())
            .any(|view| view.has_field(field));
        if !self.authenticated && !public {
            return Err(RuntimeQueryError::Unauthorized {
                entity: entity.name.clone(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    fn check_comparable(&self, entity: &EntityType, field: &str) -> Result<(), RuntimeQueryError> {
        self.check_visible(entity, field)?;
        if entity.relations.contains_key(field) {
            return Err(RuntimeQueryError::RelationNotComparable {
                entity: entity.name.clone(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    /// The rows of one level: selected fields plus nested relations,
    /// filtered, ordered and paginated.
    fn rows(
        &self,
        entity: &EntityType,
        selection: &FieldSelection,
        correlation: Option<&Correlation>,
        id: Option<Value>,
        depth: usize,
        state: &mut State,
    ) -> Result<SelectStmt, RuntimeQueryError> {
        if selection.fields.is_empty() {
            return Err(RuntimeQueryError::EmptySelection {
                entity: entity.name.clone(),
            });
        }

        let mut required: IndexSet<String> = IndexSet::new();
        let mut plan = Vec::with_capacity(selection.fields.len());
        for field in &selection.fields {
            self.check_visible(entity, &field.name)?;
            required.insert(field.name.clone());
            match (entity.relations.get(&field.name), &field.selection) {
                (Some(info), Some(sub)) => {
                    let target = self.schema.entity(&info.target).ok_or_else(|| {
                        RuntimeQueryError::UnresolvableRelation {
                            entity: entity.name.clone(),
                            field: field.name.clone(),
                        }
                    })?;
                    let join = Join::of(info, &field.name);
                    required.insert(join.parent_field().to_string());
                    plan.push(Planned::Relation {
                        name: &field.name,
                        cardinality: info.cardinality,
                        target,
                        join,
                        selection: sub,
                    });
                }
                (Some(_), None) => {
                    return Err(RuntimeQueryError::MissingSubSelection {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    });
                }
                (None, Some(_)) => {
                    return Err(RuntimeQueryError::NotARelation {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    });
                }
                (None, None) => plan.push(Planned::Scalar(&field.name)),
            }
        }

        let mut compared = Vec::new();
        if let Some(filter) = &selection.args.filter {
            filter_fields(filter, &mut compared);
        }
        compared.extend(selection.args.order_by.iter().map(|o| o.field.as_str()));
        for field in compared {
            self.check_comparable(entity, field)?;
            required.insert(field.to_string());
        }
        if let Some(correlation) = correlation {
            required.insert(correlation.join.child_field().to_string());
        }
        if id.is_some() {
            required.insert(ID.to_string());
        }

        let alias = state.alias('v');
        let source = self.source(entity, &required, alias.clone(), state)?;
        let mut stmt = SelectStmt::new().from(source);

        for planned in plan {
            match planned {
                Planned::Scalar(name) => {
                    stmt = stmt.column(SelectColumn::aliased(col(&alias, name), name.into()));
                }
                Planned::Relation {
                    name,
                    cardinality,
                    target,
                    join,
                    selection,
                } => {
                    let correlation = Correlation {
                        parent: alias.clone(),
                        join,
                    };
                    state.cost.fan_out += 1;
                    let child = self.rows(target, selection, Some(&correlation), None, depth + 1, state)?;
                    let nested = nest(child, cardinality, state);
                    stmt = stmt.column(SelectColumn::aliased(nested, name.into()));
                }
            }
        }
        state.cost.depth = state.cost.depth.max(depth);

        if let Some(correlation) = correlation {
            stmt = stmt.and_where(correlation.join.condition(&correlation.parent, &alias));
        }
        if let Some(id) = id {
            let param = state.params.bind(id);
            stmt = stmt.and_where(col(&alias, ID).eq(param));
        }
        if let Some(filter) = &selection.args.filter
            && let Some(condition) = self.filter(filter, &alias, state)?
        {
            stmt = stmt.and_where(condition.nested());
        }

        for order in &selection.args.order_by {
            let column = col(&alias, &order.field);
            stmt = stmt.order_by(if order.desc {
                OrderBy::desc(column)
            } else {
                OrderBy::asc(column)
            });
        }
        if let Some(limit) = selection.args.limit {
            let param = state.params.bind(Value::I64(limit));
            stmt = stmt.limit(param);
        }
        if let Some(offset) = selection.args.offset {
            let param = state.params.bind(Value::I64(offset));
            stmt = stmt.offset(param);
        }
        Ok(stmt)
    }

    /// Where the rows of `entity` come from: the union of every caller view
    /// with an id, or the one view exposing every `required` field.
    fn source(
        &self,
        entity: &EntityType,
        required: &IndexSet<String>,
        alias: TableName,
        state: &mut State,
    ) -> Result<FromClause, RuntimeQueryError> {
        let views: Vec<&ViewRef> = entity
            .read_views
            .iter()
            .filter_map(|rv| rv.variant(self.authenticated))
            .collect();
        let mergeable: Vec<&ViewRef> = views
            .iter()
            .copied()
            .filter(|view| view.has_field(ID))
            .collect();

        let source = if mergeable.len() >= 2 {
            let covered = required
                .iter()
                .all(|field| mergeable.iter().any(|view| view.has_field(field)));
            covered.then(|| self.merged(entity, &mergeable, required, alias, state))
        } else {
            views
                .iter()
                .find(|view| required.iter().all(|field| view.has_field(field)))
                .map(|view| FromClause::aliased(table_ref(view), alias))
        };
        let Some(source) = source else {
            return Err(RuntimeQueryError::NoReadableView {
                entity: entity.name.clone(),
                fields: required.iter().cloned().collect(),
            });
        };
        if self.authenticated {
            state.auth_required = true;
        }
        Ok(source)
    }

    /// Union several views and merge their rows by id. A view lacking a
    /// field contributes a typed NULL for it, and the merged row takes the
    /// first non-NULL value. Each merged row lists every view it was
    /// visible through in `_viewnames`.
    fn merged(
        &self,
        entity: &EntityType,
        views: &[&ViewRef],
        required: &IndexSet<String>,
        alias: TableName,
        state: &mut State,
    ) -> FromClause {
        let projected = |view: &ViewRef, field: &str| {
            view.field(field).is_some_and(|f| f.column.is_some())
        };
        let mut columns = vec![ID];
        columns.extend(required.iter().map(String::as_str).filter(|field| {
            *field != ID && views.iter().any(|view| projected(view, *field))
        }));

        let union_alias = state.alias('u');
        let branches = views
            .iter()
            .map(|view| {
                SelectStmt::new()
                    .columns(columns.iter().map(|&column| {
                        if projected(view, column) {
                            return SelectColumn::expr(Expr::column(column.into()));
                        }
                        let sql_type = views
                            .iter()
                            .find_map(|v| v.field(column).and_then(|f| f.sql_type.clone()));
                        let null = match sql_type {
                            Some(ty) => Expr::Null.cast(ty),
                            None => Expr::Null,
                        };
                        SelectColumn::aliased(null, column.into())
                    }))
                    .from(FromClause::table(table_ref(view)))
            })
            .collect();

        let mut merged = SelectStmt::new()
            .from(FromClause::union_all(branches, union_alias.clone()))
            .group_by(col(&union_alias, ID));
        for column in columns {
            let value = col(&union_alias, column);
            let is_id_array = entity
                .relations
                .get(column)
                .is_some_and(|r| r.own_column.is_some() && r.cardinality == Cardinality::Many);
            let expr = if column == ID {
                value
            } else if column == VIEWNAMES_FIELD {
                Expr::call("array_agg", vec![value.index(1)])
            } else if is_id_array {
                // max ignores NULLs; array_agg would stack the arrays
                Expr::call("max", vec![value])
            } else {
                Expr::call(
                    "array_remove",
                    vec![Expr::call("array_agg", vec![value]), Expr::Null],
                )
                .index(1)
            };
            merged = merged.column(SelectColumn::aliased(expr, column.into()));
        }
        FromClause::subquery(merged, alias)
    }

    fn filter(
        &self,
        filter: &Filter,
        alias: &TableName,
        state: &mut State,
    ) -> Result<Option<Expr>, RuntimeQueryError> {
        let (items, op) = match filter {
            Filter::And(items) => (items, BinOp::And),
            Filter::Or(items) => (items, BinOp::Or),
            Filter::Field { field, operators } => {
                let column = col(alias, field);
                let mut bind = |value: Value| state.params.bind(value);
                let mut conditions = operators
                    .iter()
                    .map(|(name, value)| self.operators.apply(name, column.clone(), value, &mut bind))
                    .collect::<Result<Vec<_>, _>>()?;
                if conditions.len() == 1 {
                    return Ok(conditions.pop());
                }
                return Ok(Expr::join(BinOp::And, conditions.into_iter().map(Expr::nested)));
            }
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            if let Some(part) = self.filter(item, alias, state)? {
                parts.push(part.nested());
            }
        }
        Ok(Expr::join(op, parts))
    }
}

/// Aggregate a nested level into one JSON value.
fn nest(child: SelectStmt, cardinality: Cardinality, state: &mut State) -> Expr {
    let alias = state.alias('r');
    let stmt = match cardinality {
        Cardinality::Many => SelectStmt::new()
            .column(SelectColumn::expr(json_list(&alias)))
            .from(FromClause::subquery(child, alias)),
        Cardinality::One => SelectStmt::new()
            .column(SelectColumn::expr(row_json(&alias)))
            .from(FromClause::subquery(child.limit(Expr::int(1)), alias)),
    };
    Expr::subquery(stmt)
}
