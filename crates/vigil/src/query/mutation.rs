//! Write statements against mutation views.
//!
//! Mutations go through the `CREATE_`/`UPDATE_`/`DELETE_` views, never the
//! tables: the view's row filter decides what the caller may touch, so a row
//! outside it simply isn't affected.

use indexmap::IndexMap;
use tracing::debug;
use vigil_compiler::{CompiledSchema, MutationDef, MutationReturn, Operation};
use vigil_sql::{DeleteStmt, Expr, InsertStmt, SelectColumn, SelectStmt, TableRef, UpdateStmt, render};

use super::Value;
use super::select::Params;
use crate::error::RuntimeQueryError;

const ID: &str = "id";

/// A write statement, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltMutation {
    pub sql: String,
    pub params: Vec<Value>,
    pub mutation: String,
    pub entity: String,
    pub operation: Operation,
    /// The target id, when the caller provided one
    pub id: Option<Value>,
    pub returns: MutationReturn,
}

/// Build the statement for mutation `name` with the given inputs, keyed by
/// input field name.
pub fn build_mutation(
    schema: &CompiledSchema,
    name: &str,
    input: &IndexMap<String, Value>,
) -> Result<BuiltMutation, RuntimeQueryError> {
    let def = schema
        .mutations
        .get(name)
        .ok_or_else(|| RuntimeQueryError::UnknownMutation(name.to_string()))?;

    let mut columns = Vec::with_capacity(input.len());
    for (field, value) in input {
        let Some(input_field) = def.input.iter().find(|i| &i.name == field) else {
            return Err(RuntimeQueryError::UnknownInputField {
                mutation: name.to_string(),
                field: field.clone(),
            });
        };
        columns.push((input_field.column.as_str(), value));
    }
    let id = columns
        .iter()
        .find(|(column, _)| *column == ID)
        .map(|(_, value)| (*value).clone());

    let table = TableRef::qualified(
        def.view.schema_name.as_str().into(),
        def.view.name.as_str().into(),
    );
    let mut params = Params::default();
    let rendered = match def.operation {
        Operation::Create => {
            if columns.is_empty() {
                return Err(empty(def));
            }
            let mut stmt = InsertStmt::new(table);
            for (column, value) in &columns {
                stmt = stmt.column((*column).into(), params.bind((*value).clone()));
            }
            render(&stmt)
        }
        Operation::Update => {
            let target = require_id(def, &id)?;
            let mut stmt = UpdateStmt::new(table);
            for (column, value) in columns.iter().filter(|(column, _)| *column != ID) {
                stmt = stmt.set((*column).into(), params.bind((*value).clone()));
            }
            if stmt.assignments.is_empty() {
                return Err(empty(def));
            }
            let param = params.bind(target);
            render(&stmt.where_(Expr::column(ID.into()).eq(param)))
        }
        Operation::Delete => {
            let target = require_id(def, &id)?;
            let param = params.bind(target);
            render(&DeleteStmt::new(table).where_(Expr::column(ID.into()).eq(param)))
        }
        Operation::Read => return Err(RuntimeQueryError::UnknownMutation(name.to_string())),
    };

    debug!(mutation = name, operation = def.operation.as_str(), "mutation built");
    Ok(BuiltMutation {
        params: params.ordered(&rendered.params),
        sql: rendered.sql,
        mutation: name.to_string(),
        entity: def.entity.clone(),
        operation: def.operation,
        id,
        returns: def.returns,
    })
}

/// `SELECT <expr> AS "id"`: the id generated by the last insert of this
/// transaction, as configured.
pub(crate) fn last_generated_id(expr: &str) -> String {
    let stmt = SelectStmt::new().column(SelectColumn::aliased(Expr::raw(expr), ID.into()));
    render(&stmt).sql
}

fn require_id(def: &MutationDef, id: &Option<Value>) -> Result<Value, RuntimeQueryError> {
    match id {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(RuntimeQueryError::MissingId {
            mutation: def.name.clone(),
        }),
    }
}

fn empty(def: &MutationDef) -> RuntimeQueryError {
    RuntimeQueryError::EmptyInput {
        mutation: def.name.clone(),
    }
}
