//! Expression registry.
//!
//! An expression is a named, parameterized generator of SQL fragments, used
//! both for computed fields and for row-visibility predicates. Generators
//! return the fragment together with the capability it needs: a fragment that
//! reads the caller's identity must say so with [`Fragment::auth`], and the
//! view builder routes it to the AUTH view only.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use vigil_sql::{Ident, TableRef};

use crate::ast::Params;
use crate::error::CompileError;

/// Alias of the base table inside every generated view.
pub const LOCAL_TABLE_ALIAS: &str = "_local_table_";

/// A generated SQL fragment and whether it needs an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sql: String,
    pub requires_auth: bool,
}

impl Fragment {
    /// A fragment anyone may evaluate.
    pub fn public(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            requires_auth: false,
        }
    }

    /// A fragment that reads the current user's identity.
    pub fn auth(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            requires_auth: true,
        }
    }
}

/// What a generator can see while producing its fragment.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionContext<'a> {
    pub(crate) schema_name: &'a str,
    pub(crate) table_name: &'a str,
    pub(crate) view_schema: &'a str,
    pub(crate) view_name: &'a str,
    pub(crate) field: Option<&'a str>,
    pub(crate) current_user_id: &'a str,
}

impl<'a> ExpressionContext<'a> {
    /// The base table, schema-qualified and quoted.
    pub fn table(&self) -> String {
        TableRef::qualified(self.schema_name.into(), self.table_name.into()).to_string()
    }

    pub fn table_name(&self) -> &'a str {
        self.table_name
    }

    pub fn schema_name(&self) -> &'a str {
        self.schema_name
    }

    /// The quoted alias of the base table inside the view.
    pub fn local_table(&self) -> String {
        Ident(LOCAL_TABLE_ALIAS).to_string()
    }

    /// A column of the base table, qualified with the local alias.
    pub fn column(&self, name: &str) -> String {
        format!("{}.{}", Ident(LOCAL_TABLE_ALIAS), Ident(name))
    }

    /// The view being generated, schema-qualified and quoted.
    pub fn view(&self) -> String {
        TableRef::qualified(self.view_schema.into(), self.view_name.into()).to_string()
    }

    pub fn view_name(&self) -> &'a str {
        self.view_name
    }

    pub fn view_schema_name(&self) -> &'a str {
        self.view_schema
    }

    /// The computed field being generated, or `None` for row predicates.
    pub fn field(&self) -> Option<&'a str> {
        self.field
    }

    /// SQL yielding the authenticated caller's id. Fragments using it must be
    /// built with [`Fragment::auth`].
    pub fn current_user_id(&self) -> &'a str {
        self.current_user_id
    }
}

type Generator = dyn Fn(&ExpressionContext<'_>, &Params) -> Result<Fragment, String> + Send + Sync;

/// A registered expression.
#[derive(Clone)]
pub struct ExpressionDef {
    pub name: String,
    /// Type of the value, when used as a computed field
    pub return_type: String,
    generator: Arc<Generator>,
}

impl fmt::Debug for ExpressionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionDef")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

impl ExpressionDef {
    pub fn new(
        name: impl Into<String>,
        generator: impl Fn(&ExpressionContext<'_>, &Params) -> Result<Fragment, String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            return_type: "Boolean".to_string(),
            generator: Arc::new(generator),
        }
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Run the generator.
    ///
    /// A fragment declared public that still mentions the current-user
    /// accessor is promoted to auth-only.
    pub fn generate(
        &self,
        ctx: &ExpressionContext<'_>,
        params: &Params,
    ) -> Result<Fragment, CompileError> {
        let mut fragment =
            (self.generator)(ctx, params).map_err(|message| CompileError::Expression {
                name: self.name.clone(),
                message,
            })?;
        if !fragment.requires_auth && fragment.sql.contains(ctx.current_user_id) {
            tracing::warn!(
                expression = %self.name,
                "fragment reads the current user but was declared public, treating it as auth-only"
            );
            fragment.requires_auth = true;
        }
        Ok(fragment)
    }
}

/// All expressions known to the compiler, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ExpressionRegistry {
    defs: IndexMap<String, ExpressionDef>,
}

impl ExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, def: ExpressionDef) -> Self {
        self.defs.insert(def.name.clone(), def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExpressionDef> {
        self.defs.get(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExpressionContext<'static> {
        ExpressionContext {
            schema_name: "public",
            table_name: "Task",
            view_schema: "api",
            view_name: "TASK_MINE",
            field: None,
            current_user_id: "_meta.current_user_id()",
        }
    }

    #[test]
    fn test_context_names_are_quoted() {
        let ctx = ctx();
        assert_eq!(ctx.table(), r#""public"."Task""#);
        assert_eq!(ctx.view(), r#""api"."TASK_MINE""#);
        assert_eq!(ctx.column("ownerId"), r#""_local_table_"."ownerId""#);
        assert_eq!(ctx.field(), None);
    }

    #[test]
    fn test_public_fragment_using_current_user_is_promoted() {
        let sneaky = ExpressionDef::new("sneaky", |ctx, _| {
            Ok(Fragment::public(format!(
                "{} = {}",
                ctx.column("ownerId"),
                ctx.current_user_id()
            )))
        });
        let fragment = sneaky.generate(&ctx(), &Params::new()).unwrap();
        assert!(fragment.requires_auth);
    }

    #[test]
    fn test_generator_errors_carry_the_name() {
        let broken = ExpressionDef::new("broken", |_, _| Err("missing param 'role'".into()));
        let err = broken.generate(&ctx(), &Params::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expression 'broken' failed: missing param 'role'"
        );
    }
}
