//! SQL expressions.

use crate::stmt::SelectStmt;
use crate::{ColumnName, ParamName, TableName};

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A parameter placeholder (e.g., $handle -> $1)
    Param(ParamName),
    /// A column reference
    Column(ColumnRef),
    /// A string literal
    String(String),
    /// An integer literal
    Int(i64),
    /// A boolean literal
    Bool(bool),
    /// NULL
    Null,
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL / IS TRUE / IS FALSE
    Is { expr: Box<Expr>, test: IsTest },
    /// `expr IN (a, b, c)` / `expr NOT IN (...)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// Function call
    FnCall { name: String, args: Vec<Expr> },
    /// JSON member access: `expr -> 'key'`
    JsonGet { expr: Box<Expr>, key: String },
    /// `ARRAY[a, b]`
    Array(Vec<Expr>),
    /// `expr::type`
    Cast { expr: Box<Expr>, ty: String },
    /// `(expr)[n]`
    Index { expr: Box<Expr>, index: i64 },
    /// A parenthesized expression
    Nested(Box<Expr>),
    /// A scalar subquery: `(SELECT ...)`
    Subquery(Box<SelectStmt>),
    /// Raw SQL (escape hatch)
    Raw(String),
}

/// A column reference, optionally qualified with table/alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<TableName>,
    pub column: ColumnName,
}

impl ColumnRef {
    pub fn new(column: ColumnName) -> Self {
        Self {
            table: None,
            column,
        }
    }

    pub fn qualified(table: TableName, column: ColumnName) -> Self {
        Self {
            table: Some(table),
            column,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Like => "LIKE",
            BinOp::NotLike => "NOT LIKE",
            BinOp::ILike => "ILIKE",
            BinOp::NotILike => "NOT ILIKE",
        }
    }
}

/// The right-hand side of an `IS` test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsTest {
    Null,
    NotNull,
    True,
    False,
}

impl IsTest {
    pub fn as_str(self) -> &'static str {
        match self {
            IsTest::Null => "IS NULL",
            IsTest::NotNull => "IS NOT NULL",
            IsTest::True => "IS TRUE",
            IsTest::False => "IS FALSE",
        }
    }
}

// Convenience constructors
impl Expr {
    pub fn param(name: ParamName) -> Self {
        Expr::Param(name)
    }

    pub fn column(name: ColumnName) -> Self {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn qualified_column(table: TableName, column: ColumnName) -> Self {
        Expr::Column(ColumnRef::qualified(table, column))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn bool(b: bool) -> Self {
        Expr::Bool(b)
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn binop(self, op: BinOp, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Create an equality expression: self = other
    pub fn eq(self, other: Expr) -> Self {
        self.binop(BinOp::Eq, other)
    }

    /// Create an AND expression: self AND other
    pub fn and(self, other: Expr) -> Self {
        self.binop(BinOp::And, other)
    }

    pub fn is(self, test: IsTest) -> Self {
        Expr::Is {
            expr: Box::new(self),
            test,
        }
    }

    pub fn in_list(self, list: Vec<Expr>, negated: bool) -> Self {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    pub fn json_get(self, key: impl Into<String>) -> Self {
        Expr::JsonGet {
            expr: Box::new(self),
            key: key.into(),
        }
    }

    pub fn cast(self, ty: impl Into<String>) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            ty: ty.into(),
        }
    }

    pub fn index(self, index: i64) -> Self {
        Expr::Index {
            expr: Box::new(self),
            index,
        }
    }

    pub fn nested(self) -> Self {
        Expr::Nested(Box::new(self))
    }

    pub fn subquery(stmt: SelectStmt) -> Self {
        Expr::Subquery(Box::new(stmt))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FnCall {
            name: name.into(),
            args,
        }
    }

    /// Fold a list of expressions with `op`, starting from `seed`.
    ///
    /// `Expr::fold(Expr::Bool(false), BinOp::Or, exprs)` yields `FALSE OR a OR b`.
    pub fn fold(seed: Expr, op: BinOp, exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .fold(seed, |acc, next| acc.binop(op, next))
    }

    /// Join expressions with `op`, or `None` when there are none.
    pub fn join(op: BinOp, exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        Some(Self::fold(first, op, iter))
    }
}
