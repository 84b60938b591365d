//! SQL AST and rendering.
//!
//! Build SQL as a typed AST, then render to a string with automatic
//! parameter numbering and formatting. Every identifier goes through
//! [`Ident`] and every literal through [`Lit`], so nothing coming from a
//! schema definition or a client request is ever spliced into SQL raw.

use strid::braid;

mod expr;
pub use expr::*;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

/// Result of rendering SQL.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    /// The SQL string with $1, $2, etc. placeholders.
    pub sql: String,

    /// Parameter names in order (maps to $1, $2, etc.).
    pub params: Vec<ParamName>,
}

/// The name of a schema.
#[braid]
pub struct SchemaName;

/// The name of a table, view, or alias.
#[braid]
pub struct TableName;

/// The name of a column (or column alias).
#[braid]
pub struct ColumnName;

/// The name of a query parameter.
#[braid]
pub struct ParamName;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use vigil_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use vigil_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// A possibly schema-qualified table or view reference.
///
/// ```
/// use vigil_sql::TableRef;
/// assert_eq!(TableRef::qualified("public".into(), "task".into()).to_string(), r#""public"."task""#);
/// assert_eq!(TableRef::bare("t".into()).to_string(), r#""t""#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<SchemaName>,
    pub name: TableName,
}

impl TableRef {
    pub fn bare(name: TableName) -> Self {
        Self { schema: None, name }
    }

    pub fn qualified(schema: SchemaName, name: TableName) -> Self {
        Self {
            schema: Some(schema),
            name,
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", Ident(schema.as_str()))?;
        }
        write!(f, "{}", Ident(self.name.as_str()))
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes identifiers to avoid issues with reserved keywords like
/// `user`, `order`, `table`, `group`, etc. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Primary key constraint name, following the Postgres default `{table}_pkey`.
pub fn primary_key_name(table: &str) -> String {
    format!("{table}_pkey")
}

/// Unique constraint name, following the Postgres default `{table}_{column}_key`.
pub fn unique_key_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_key")
}

/// Foreign key constraint name, following the Postgres default `{table}_{column}_fkey`.
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_fkey")
}

/// Derive a stable alias for a parameterized fragment.
///
/// Fragments without parameters keep their plain name. Parameterized ones get a
/// short blake3 suffix of their normalized parameter text, so the same
/// generator used twice with different arguments gets two distinct aliases.
///
/// ```
/// use vigil_sql::hashed_alias;
/// assert_eq!(hashed_alias("isOwner", ""), "isOwner");
/// assert_ne!(hashed_alias("hasRole", "admin"), hashed_alias("hasRole", "editor"));
/// assert!(hashed_alias("hasRole", "admin").starts_with("hasRole_"));
/// ```
pub fn hashed_alias(name: &str, params: &str) -> String {
    let normalized = normalize_sql_expr_for_hash(params);
    if normalized.is_empty() {
        return name.to_string();
    }
    let hex = blake3::hash(normalized.as_bytes()).to_hex().to_string();
    format!("{}_{}", name, &hex[..8])
}

fn normalize_sql_expr_for_hash(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;
    let mut in_quote: Option<char> = None;

    for ch in expr.chars() {
        if let Some(quote) = in_quote {
            out.push(ch);
            if ch == quote {
                in_quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch);
                in_quote = Some(ch);
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_names() {
        assert_eq!(primary_key_name("task"), "task_pkey");
        assert_eq!(unique_key_name("user", "email"), "user_email_key");
        assert_eq!(foreign_key_name("task", "userId"), "task_userId_fkey");
    }

    #[test]
    fn test_hashed_alias_ignores_whitespace() {
        assert_eq!(
            hashed_alias("hasRole", "role = 'admin'"),
            hashed_alias("hasRole", "  role   =  'admin' ")
        );
        assert_ne!(
            hashed_alias("hasRole", "role = 'a  b'"),
            hashed_alias("hasRole", "role = 'a b'")
        );
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(escape_string("it's"), "'it''s'");
    }
}
