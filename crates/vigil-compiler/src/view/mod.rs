//! Permission view builder.
//!
//! A READ permission compiles to up to two views: `<ENTITY>_<NAME>_PUBLIC`,
//! evaluable without a caller identity, and `<ENTITY>_<NAME>_AUTH`. Mutation
//! permissions compile to one auto-updatable view each, with the visibility
//! predicate inlined. CREATE and UPDATE views carry `WITH CHECK OPTION`, so a
//! write cannot produce a row the predicate would hide.

use indexmap::IndexMap;
use tracing::debug;
use vigil_sql::{
    BinOp, CreateViewStmt, DropViewStmt, Expr, FromClause, GrantStmt, Privilege, SelectColumn,
    SelectStmt, TableRef, hashed_alias, render,
};

use crate::ast::{TypeRef, params_text};
use crate::config::CompilerConfig;
use crate::error::{CompileError, ViewSkip};
use crate::expression::{ExpressionContext, Fragment, LOCAL_TABLE_ALIAS};
use crate::ir::{EntityModel, Model, PRIMARY_KEY_FIELD};
use crate::permission::{Operation, Permission};

mod fields;
use fields::{FieldProjection, check_allow_list, compile_mutation_fields, compile_read_fields};

/// Synthetic field listing the views a row was matched through.
pub const VIEWNAMES_FIELD: &str = "_viewnames";

/// Who may see a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// PUBLIC and AUTH variants
    Both,
    /// AUTH variant only
    Auth,
}

/// Which flavor of view was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewVariant {
    Public,
    Auth,
    Mutation,
}

/// A field exposed by a compiled view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewField {
    pub name: String,
    pub ty: TypeRef,
    /// Output column of the view, `None` when the field is only reachable
    /// through a relation join
    pub column: Option<String>,
    /// Type of the output column, e.g. `UUID` or `"TaskStatus"`. `None` when
    /// there is no column or its type is not known statically.
    pub sql_type: Option<String>,
}

/// A mutation input argument.
#[derive(Debug, Clone, PartialEq)]
pub struct InputField {
    pub name: String,
    pub column: String,
    pub ty: TypeRef,
}

/// One compiled view and the statements that install it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledView {
    pub entity: String,
    /// Permission-level name, e.g. `TASK_MINE`
    pub permission_view: String,
    pub operation: Operation,
    pub variant: ViewVariant,
    pub schema_name: String,
    pub name: String,
    pub fields: Vec<ViewField>,
    /// Mutation inputs; empty for READ views
    pub input: Vec<InputField>,
    /// `DROP VIEW`, `CREATE OR REPLACE VIEW` and `GRANT`, each ending in `;`
    pub statements: Vec<String>,
}

impl CompiledView {
    pub fn table_ref(&self) -> TableRef {
        TableRef::qualified(self.schema_name.as_str().into(), self.name.as_str().into())
    }

    pub fn field(&self, name: &str) -> Option<&ViewField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// The outcome of compiling one READ permission.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadViews {
    pub permission_view: String,
    pub public: Option<CompiledView>,
    pub auth: Option<CompiledView>,
}

/// `TASK_MINE` for permission `mine` on `Task`.
pub fn permission_view_name(entity: &str, permission: &str) -> String {
    format!("{}_{}", entity.to_uppercase(), permission.to_uppercase())
}

/// Name of the view a mutation permission compiles to.
pub fn mutation_view_name(entity: &str, operation: Operation, permission: &str) -> String {
    match operation {
        Operation::Delete => format!("DELETE_{}", entity.to_uppercase()),
        _ => format!(
            "{}_{}",
            operation.as_str(),
            permission_view_name(entity, permission)
        ),
    }
}

struct RowExpression {
    alias: String,
    fragment: Fragment,
}

fn context<'a>(
    entity: &'a EntityModel,
    view_name: &'a str,
    config: &'a CompilerConfig,
) -> ExpressionContext<'a> {
    ExpressionContext {
        schema_name: &entity.schema_name,
        table_name: &entity.table_name,
        view_schema: &config.views.schema,
        view_name,
        field: None,
        current_user_id: &config.views.current_user_id,
    }
}

fn compile_row_expressions(
    entity: &EntityModel,
    permission: &Permission,
    ctx: &ExpressionContext<'_>,
    config: &CompilerConfig,
) -> Result<Vec<RowExpression>, CompileError> {
    let mut compiled: IndexMap<String, RowExpression> = IndexMap::new();
    for expr in &permission.expressions {
        let def = config.expressions.get(&expr.name).ok_or_else(|| {
            CompileError::UnknownExpression {
                name: expr.name.clone(),
                context: format!("{}.{}", entity.name, permission.name),
            }
        })?;
        let alias = hashed_alias(&expr.name, &params_text(&expr.params));
        if compiled.contains_key(&alias) {
            continue;
        }
        let fragment = def.generate(ctx, &expr.params)?;
        compiled.insert(alias.clone(), RowExpression { alias, fragment });
    }
    Ok(compiled.into_values().collect())
}

fn base_table(entity: &EntityModel) -> FromClause {
    FromClause::aliased(
        TableRef::qualified(
            entity.schema_name.as_str().into(),
            entity.table_name.as_str().into(),
        ),
        LOCAL_TABLE_ALIAS.into(),
    )
}

fn install_statements(
    name: TableRef,
    query: SelectStmt,
    operation: Operation,
    privileges: Vec<Privilege>,
    config: &CompilerConfig,
) -> Vec<String> {
    let drop = DropViewStmt {
        name: name.clone(),
        if_exists: true,
    };
    let mut create = CreateViewStmt::new(name.clone(), query);
    create.security_barrier = config.security_barrier;
    create.check_option = matches!(operation, Operation::Create | Operation::Update);
    let grant = GrantStmt::new(privileges, name, config.views.role.as_str());

    vec![
        format!("{};", render(&drop).sql),
        format!("{};", render(&create).sql),
        format!("{};", render(&grant).sql),
    ]
}

/// Compile a READ permission into its PUBLIC and AUTH views.
///
/// A variant without usable fields or without a surviving row expression is
/// skipped rather than created: nothing is visible by default.
pub fn build_read_views(
    model: &Model,
    entity: &EntityModel,
    permission: &Permission,
    config: &CompilerConfig,
) -> Result<ReadViews, CompileError> {
    let permission_view = permission_view_name(&entity.name, &permission.name);
    let ctx = context(entity, &permission_view, config);

    let allow = check_allow_list(entity, permission)?;
    let mut projections = compile_read_fields(entity, model, &allow, &ctx, config)?;
    projections.push(FieldProjection {
        name: VIEWNAMES_FIELD.to_string(),
        ty: TypeRef::list(TypeRef::named("String")),
        column: Some(SelectColumn::aliased(
            Expr::Array(vec![Expr::string(permission_view.as_str())]).cast("text[]"),
            VIEWNAMES_FIELD.into(),
        )),
        sql_type: Some("TEXT[]".to_string()),
        visibility: Visibility::Both,
    });
    let expressions = compile_row_expressions(entity, permission, &ctx, config)?;

    let assemble = |variant: ViewVariant| -> Option<CompiledView> {
        let suffix = match variant {
            ViewVariant::Public => "PUBLIC",
            _ => "AUTH",
        };
        let name = format!("{permission_view}_{suffix}");
        let visible = |requires_auth: bool| variant == ViewVariant::Auth || !requires_auth;
        let fields: Vec<&FieldProjection> = projections
            .iter()
            .filter(|p| visible(p.visibility == Visibility::Auth))
            .collect();
        let exprs: Vec<&RowExpression> = expressions
            .iter()
            .filter(|e| visible(e.fragment.requires_auth))
            .collect();

        match assemble_read_view(entity, &name, &fields, &exprs, config) {
            Ok((query, view_fields)) => Some(CompiledView {
                entity: entity.name.clone(),
                permission_view: permission_view.clone(),
                operation: Operation::Read,
                variant,
                schema_name: config.views.schema.clone(),
                statements: install_statements(
                    TableRef::qualified(config.views.schema.as_str().into(), name.as_str().into()),
                    query,
                    Operation::Read,
                    vec![Privilege::Select],
                    config,
                ),
                name,
                fields: view_fields,
                input: Vec::new(),
            }),
            Err(skip) => {
                debug!(view = %name, reason = ?skip, "view not created");
                None
            }
        }
    };

    Ok(ReadViews {
        public: assemble(ViewVariant::Public),
        auth: assemble(ViewVariant::Auth),
        permission_view,
    })
}

fn assemble_read_view(
    entity: &EntityModel,
    name: &str,
    fields: &[&FieldProjection],
    expressions: &[&RowExpression],
    config: &CompilerConfig,
) -> Result<(SelectStmt, Vec<ViewField>), ViewSkip> {
    if fields.iter().all(|f| f.name == VIEWNAMES_FIELD) {
        return Err(ViewSkip::NoFields);
    }
    if expressions.is_empty() {
        return Err(ViewSkip::NoExpressions);
    }

    let mut query = SelectStmt::new()
        .columns(fields.iter().filter_map(|f| f.column.clone()))
        .from(base_table(entity));

    for expr in expressions {
        let alias = expr.alias.as_str();
        let inner = SelectStmt::new().column(SelectColumn::aliased(
            Expr::raw(expr.fragment.sql.as_str()),
            alias.into(),
        ));
        query = query.from(FromClause::lateral(inner, alias.into()));
    }
    let predicate = Expr::fold(
        Expr::Bool(false),
        BinOp::Or,
        expressions
            .iter()
            .map(|e| Expr::qualified_column(e.alias.as_str().into(), e.alias.as_str().into())),
    );
    query = query.where_(predicate.nested());

    let view_fields = fields
        .iter()
        .map(|f| ViewField {
            name: f.name.clone(),
            ty: f.ty.clone(),
            column: f.column.as_ref().map(|_| f.name.clone()),
            sql_type: f.sql_type.clone(),
        })
        .collect();

    debug!(view = %name, schema = %config.views.schema, "compiled read view");
    Ok((query, view_fields))
}

/// Compile a CREATE, UPDATE or DELETE permission into its view.
///
/// Returns `Ok(None)` when no row expression is attached.
pub fn build_mutation_view(
    model: &Model,
    entity: &EntityModel,
    permission: &Permission,
    config: &CompilerConfig,
) -> Result<Option<CompiledView>, CompileError> {
    let operation = permission.operation;
    let listed_id = permission.fields.iter().any(|f| f == PRIMARY_KEY_FIELD);
    if matches!(operation, Operation::Update | Operation::Delete) && !listed_id {
        return Err(CompileError::UpdateWithoutPrimaryKey {
            entity: entity.name.clone(),
            permission: permission.name.clone(),
            operation,
        });
    }

    let name = mutation_view_name(&entity.name, operation, &permission.name);
    let ctx = context(entity, &name, config);
    let allow = check_allow_list(entity, permission)?;
    let fields = compile_mutation_fields(entity, model, &allow, operation);
    let expressions = compile_row_expressions(entity, permission, &ctx, config)?;

    if expressions.is_empty() {
        debug!(view = %name, reason = ?ViewSkip::NoExpressions, "view not created");
        return Ok(None);
    }

    let mut query = SelectStmt::new().from(base_table(entity));
    let mut view_fields = Vec::new();
    let mut input = Vec::new();
    for field in &fields {
        query = query.column(SelectColumn::aliased(
            Expr::qualified_column(LOCAL_TABLE_ALIAS.into(), field.column.as_str().into()),
            field.column.as_str().into(),
        ));
        view_fields.push(ViewField {
            name: field.column.clone(),
            ty: field.ty.clone(),
            column: Some(field.column.clone()),
            sql_type: model
                .db_meta
                .table(&entity.schema_name, &entity.table_name)
                .and_then(|table| table.columns.get(&field.column))
                .map(|column| column.sql_type()),
        });

        let is_id = field.column == PRIMARY_KEY_FIELD;
        let ty = match operation {
            Operation::Create if is_id => field.ty.nullable(),
            Operation::Create => field.ty.clone(),
            _ if is_id => field.ty.clone().non_null(),
            _ => field.ty.nullable(),
        };
        if field.listed && (operation != Operation::Delete || is_id) {
            input.push(InputField {
                name: field.column.clone(),
                column: field.column.clone(),
                ty,
            });
        }
    }

    let predicate = Expr::fold(
        Expr::Bool(false),
        BinOp::Or,
        expressions
            .iter()
            .map(|e| Expr::raw(format!("({})", e.fragment.sql))),
    );
    query = query.where_(predicate.nested());

    let privileges = match operation {
        Operation::Create => vec![Privilege::Insert],
        Operation::Update => vec![Privilege::Select, Privilege::Update],
        Operation::Delete => vec![Privilege::Select, Privilege::Delete],
        Operation::Read => vec![Privilege::Select],
    };
    let table = TableRef::qualified(config.views.schema.as_str().into(), name.as_str().into());

    debug!(view = %name, operation = %operation, "compiled mutation view");
    Ok(Some(CompiledView {
        entity: entity.name.clone(),
        permission_view: name.clone(),
        operation,
        variant: ViewVariant::Mutation,
        schema_name: config.views.schema.clone(),
        statements: install_statements(table, query, operation, privileges, config),
        name,
        fields: view_fields,
        input,
    }))
}

#[cfg(test)]
mod tests;
