//! SQL statements.

use crate::TableRef;
use crate::expr::Expr;
use crate::{ColumnName, TableName};

/// A SELECT statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStmt {
    pub columns: Vec<SelectColumn>,
    /// Comma-separated FROM items.
    pub from: Vec<FromClause>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

/// A column in a SELECT clause, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: Expr,
    pub alias: Option<ColumnName>,
}

impl SelectColumn {
    pub fn expr(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: ColumnName) -> Self {
        Self {
            expr,
            alias: Some(alias),
        }
    }
}

/// What a FROM item reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    Table(TableRef),
    Subquery(Box<SelectStmt>),
    /// `LATERAL (subquery)`, which may reference earlier FROM items
    Lateral(Box<SelectStmt>),
    /// `(a UNION ALL b UNION ALL c)`
    UnionAll(Vec<SelectStmt>),
}

/// A FROM item.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub source: FromSource,
    pub alias: Option<TableName>,
}

impl FromClause {
    pub fn table(table: TableRef) -> Self {
        Self {
            source: FromSource::Table(table),
            alias: None,
        }
    }

    pub fn aliased(table: TableRef, alias: TableName) -> Self {
        Self {
            source: FromSource::Table(table),
            alias: Some(alias),
        }
    }

    pub fn subquery(stmt: SelectStmt, alias: TableName) -> Self {
        Self {
            source: FromSource::Subquery(Box::new(stmt)),
            alias: Some(alias),
        }
    }

    pub fn lateral(stmt: SelectStmt, alias: TableName) -> Self {
        Self {
            source: FromSource::Lateral(Box::new(stmt)),
            alias: Some(alias),
        }
    }

    pub fn union_all(stmts: Vec<SelectStmt>, alias: TableName) -> Self {
        Self {
            source: FromSource::UnionAll(stmts),
            alias: Some(alias),
        }
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

// ============================================================================
// INSERT statement
// ============================================================================

/// An INSERT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: TableRef,
    pub columns: Vec<ColumnName>,
    pub values: Vec<Expr>,
}

/// An assignment in UPDATE SET.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAssignment {
    pub column: ColumnName,
    pub value: Expr,
}

impl UpdateAssignment {
    pub fn new(column: ColumnName, value: Expr) -> Self {
        Self { column, value }
    }
}

// ============================================================================
// UPDATE statement
// ============================================================================

/// An UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: TableRef,
    pub assignments: Vec<UpdateAssignment>,
    pub where_: Option<Expr>,
}

// ============================================================================
// DELETE statement
// ============================================================================

/// A DELETE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: TableRef,
    pub where_: Option<Expr>,
}

// ============================================================================
// View DDL
// ============================================================================

/// `CREATE OR REPLACE VIEW name [WITH (security_barrier)] AS query [WITH CHECK OPTION]`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateViewStmt {
    pub name: TableRef,
    pub security_barrier: bool,
    pub query: SelectStmt,
    /// Reject inserted or updated rows the view's WHERE would not return
    pub check_option: bool,
}

/// `DROP VIEW [IF EXISTS] name`
#[derive(Debug, Clone, PartialEq)]
pub struct DropViewStmt {
    pub name: TableRef,
    pub if_exists: bool,
}

/// A privilege granted on a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
}

impl Privilege {
    pub fn as_str(self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
        }
    }
}

/// `GRANT privileges ON name TO role`
#[derive(Debug, Clone, PartialEq)]
pub struct GrantStmt {
    pub privileges: Vec<Privilege>,
    pub on: TableRef,
    pub to: String,
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl SelectStmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = SelectColumn>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn from(mut self, from: FromClause) -> Self {
        self.from.push(from);
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, expr: Expr) -> Self {
        self.limit = Some(expr);
        self
    }

    pub fn offset(mut self, expr: Expr) -> Self {
        self.offset = Some(expr);
        self
    }
}

impl InsertStmt {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn column(mut self, name: ColumnName, value: Expr) -> Self {
        self.columns.push(name);
        self.values.push(value);
        self
    }
}

impl UpdateStmt {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            where_: None,
        }
    }

    pub fn set(mut self, column: ColumnName, value: Expr) -> Self {
        self.assignments.push(UpdateAssignment::new(column, value));
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }
}

impl DeleteStmt {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            where_: None,
        }
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }
}

impl CreateViewStmt {
    pub fn new(name: TableRef, query: SelectStmt) -> Self {
        Self {
            name,
            security_barrier: true,
            query,
            check_option: false,
        }
    }
}

impl GrantStmt {
    pub fn new(privileges: Vec<Privilege>, on: TableRef, to: impl Into<String>) -> Self {
        Self {
            privileges,
            on,
            to: to.into(),
        }
    }
}
