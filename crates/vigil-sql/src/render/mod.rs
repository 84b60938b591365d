//! Render SQL AST to string.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;

use crate::expr::{ColumnRef, Expr};
use crate::stmt::*;
use crate::{ColumnName, Ident, ParamName, RenderedSql, escape_string};

/// Mutable parameter tracking state.
struct ParamState {
    /// Named parameters mapped to their assigned positional index.
    params: IndexMap<ParamName, usize>,
    /// Next parameter index to assign (starts at 1 for `$1`).
    next_param_idx: usize,
}

impl ParamState {
    fn new() -> Self {
        Self {
            params: IndexMap::new(),
            next_param_idx: 1,
        }
    }

    /// Get or create a parameter index.
    fn get_or_insert(&mut self, name: &ParamName) -> usize {
        *self.params.entry(name.clone()).or_insert_with(|| {
            let idx = self.next_param_idx;
            self.next_param_idx += 1;
            idx
        })
    }
}

/// Rendering context that tracks parameter assignment.
///
/// Uses interior mutability (`RefCell`) so that `Render::render` can take `&self`,
/// enabling the `Fmt` wrapper to implement `Display`.
pub struct RenderContext {
    params: RefCell<ParamState>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            params: RefCell::new(ParamState::new()),
        }
    }

    /// Get or create a parameter placeholder index.
    fn param_idx(&self, name: &ParamName) -> usize {
        self.params.borrow_mut().get_or_insert(name)
    }

    /// Finish rendering and return the collected params.
    fn into_params(self) -> Vec<ParamName> {
        self.params.into_inner().params.into_keys().collect()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper for rendering a `Render` type via `Display`.
///
/// Allows using `write!(f, "{}", Fmt(ctx, &expr))` in format strings.
pub struct Fmt<'a, T: Render>(&'a RenderContext, &'a T);

impl<T: Render> fmt::Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

// ============================================================================
// Render implementations
// ============================================================================

/// Trait for types that can be rendered to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

fn comma_separated<T: Render>(
    ctx: &RenderContext,
    f: &mut fmt::Formatter<'_>,
    items: &[T],
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Fmt(ctx, item))?;
    }
    Ok(())
}

fn idents(f: &mut fmt::Formatter<'_>, names: &[ColumnName]) -> fmt::Result {
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Ident(name.as_str()))?;
    }
    Ok(())
}

impl Render for Expr {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(name) => {
                let idx = ctx.param_idx(name);
                write!(f, "${idx}")
            }
            Expr::Column(col) => col.render(ctx, f),
            Expr::String(s) => {
                let escaped = escape_string(s);
                write!(f, "{escaped}")
            }
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Expr::Null => write!(f, "NULL"),
            Expr::BinOp { left, op, right } => {
                let left = Fmt(ctx, left.as_ref());
                let right = Fmt(ctx, right.as_ref());
                let op = op.as_str();
                write!(f, "{left} {op} {right}")
            }
            Expr::Is { expr, test } => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "{expr} {}", test.as_str())
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let expr = Fmt(ctx, expr.as_ref());
                let kw = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{expr} {kw} (")?;
                comma_separated(ctx, f, list)?;
                write!(f, ")")
            }
            Expr::FnCall { name, args } => {
                write!(f, "{name}(")?;
                comma_separated(ctx, f, args)?;
                write!(f, ")")
            }
            Expr::JsonGet { expr, key } => {
                let expr = Fmt(ctx, expr.as_ref());
                let key = escape_string(key);
                write!(f, "{expr}->{key}")
            }
            Expr::Array(items) => {
                write!(f, "ARRAY[")?;
                comma_separated(ctx, f, items)?;
                write!(f, "]")
            }
            Expr::Cast { expr, ty } => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "{expr}::{ty}")
            }
            Expr::Index { expr, index } => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "({expr})[{index}]")
            }
            Expr::Nested(expr) => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "({expr})")
            }
            Expr::Subquery(stmt) => {
                let stmt = Fmt(ctx, stmt.as_ref());
                write!(f, "({stmt})")
            }
            Expr::Raw(s) => write!(f, "{s}"),
        }
    }
}

impl Render for ColumnRef {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            let table = Ident(table.as_str());
            write!(f, "{table}.")?;
        }
        let column = Ident(self.column.as_str());
        write!(f, "{column}")
    }
}

impl Render for SelectStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT")?;

        // Columns
        if self.columns.is_empty() {
            write!(f, " *")?;
        } else {
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {}", Fmt(ctx, col))?;
            }
        }

        // FROM
        if !self.from.is_empty() {
            write!(f, "\nFROM ")?;
            comma_separated(ctx, f, &self.from)?;
        }

        // WHERE
        if let Some(where_) = &self.where_ {
            let where_ = Fmt(ctx, where_);
            write!(f, "\nWHERE {where_}")?;
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            write!(f, "\nGROUP BY ")?;
            comma_separated(ctx, f, &self.group_by)?;
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY ")?;
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let expr = Fmt(ctx, &order.expr);
                let dir = if order.desc { " DESC" } else { " ASC" };
                write!(f, "{expr}{dir}")?;
            }
        }

        // LIMIT
        if let Some(limit) = &self.limit {
            let limit = Fmt(ctx, limit);
            write!(f, "\nLIMIT {limit}")?;
        }

        // OFFSET
        if let Some(offset) = &self.offset {
            let offset = Fmt(ctx, offset);
            write!(f, "\nOFFSET {offset}")?;
        }

        Ok(())
    }
}

impl Render for SelectColumn {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expr = Fmt(ctx, &self.expr);
        write!(f, "{expr}")?;
        if let Some(alias) = &self.alias {
            let alias = Ident(alias.as_str());
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

impl Render for FromClause {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            FromSource::Table(table) => write!(f, "{table}")?,
            FromSource::Subquery(stmt) => write!(f, "({})", Fmt(ctx, stmt.as_ref()))?,
            FromSource::Lateral(stmt) => write!(f, "LATERAL ({})", Fmt(ctx, stmt.as_ref()))?,
            FromSource::UnionAll(stmts) => {
                write!(f, "(")?;
                for (i, stmt) in stmts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "\nUNION ALL\n")?;
                    }
                    write!(f, "{}", Fmt(ctx, stmt))?;
                }
                write!(f, ")")?;
            }
        }
        if let Some(alias) = &self.alias {
            let alias = Ident(alias.as_str());
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

impl Render for InsertStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {} (", self.table)?;
        idents(f, &self.columns)?;
        write!(f, ")")?;

        // VALUES
        write!(f, "\nVALUES (")?;
        comma_separated(ctx, f, &self.values)?;
        write!(f, ")")?;

        Ok(())
    }
}

impl Render for UpdateStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {}", self.table)?;

        // SET
        write!(f, "\nSET ")?;
        for (i, assign) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let col = Ident(assign.column.as_str());
            let val = Fmt(ctx, &assign.value);
            write!(f, "{col} = {val}")?;
        }

        // WHERE
        if let Some(where_) = &self.where_ {
            let where_ = Fmt(ctx, where_);
            write!(f, "\nWHERE {where_}")?;
        }

        Ok(())
    }
}

impl Render for DeleteStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;

        // WHERE
        if let Some(where_) = &self.where_ {
            let where_ = Fmt(ctx, where_);
            write!(f, "\nWHERE {where_}")?;
        }

        Ok(())
    }
}

impl Render for CreateViewStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE OR REPLACE VIEW {}", self.name)?;
        if self.security_barrier {
            write!(f, " WITH (security_barrier)")?;
        }
        write!(f, " AS {}", Fmt(ctx, &self.query))?;
        if self.check_option {
            write!(f, "\nWITH CHECK OPTION")?;
        }
        Ok(())
    }
}

impl Render for DropViewStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP VIEW ")?;
        if self.if_exists {
            write!(f, "IF EXISTS ")?;
        }
        write!(f, "{}", self.name)
    }
}

impl Render for GrantStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GRANT ")?;
        for (i, privilege) in self.privileges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", privilege.as_str())?;
        }
        write!(f, " ON {} TO {}", self.on, Ident(&self.to))
    }
}

// ============================================================================
// Convenience methods
// ============================================================================

/// Render a statement to SQL.
pub fn render(stmt: &impl Render) -> RenderedSql {
    let ctx = RenderContext::new();
    let sql = format!("{}", Fmt(&ctx, stmt));
    RenderedSql {
        sql,
        params: ctx.into_params(),
    }
}
