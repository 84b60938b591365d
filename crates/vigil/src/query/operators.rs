//! Filter operators.
//!
//! A filter leaf names a field and one or more operators, each with a value:
//! `{ title: { iLike: "%milk%" }, status: { in: ["OPEN", "DONE"] } }`. The
//! registry maps operator names to SQL builders. Values are always bound as
//! parameters.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use vigil_sql::{BinOp, Expr, IsTest};

use super::Value;
use crate::error::RuntimeQueryError;

type BooleanFn = dyn Fn(Expr, IsTest) -> Expr + Send + Sync;
type SingleFn = dyn Fn(Expr, Expr) -> Expr + Send + Sync;
type MultiFn = dyn Fn(Expr, Vec<Expr>) -> Expr + Send + Sync;

/// How an operator consumes its value.
#[derive(Clone)]
pub enum Operator {
    /// Takes one of `NULL`, `NOT_NULL`, `TRUE`, `FALSE` (or a bool / null).
    /// The value is a keyword, nothing gets bound.
    Boolean(Arc<BooleanFn>),
    /// Takes one scalar value.
    Single(Arc<SingleFn>),
    /// Takes a list of values.
    Multi(Arc<MultiFn>),
}

impl Operator {
    pub fn boolean(f: impl Fn(Expr, IsTest) -> Expr + Send + Sync + 'static) -> Self {
        Operator::Boolean(Arc::new(f))
    }

    pub fn single(f: impl Fn(Expr, Expr) -> Expr + Send + Sync + 'static) -> Self {
        Operator::Single(Arc::new(f))
    }

    pub fn multi(f: impl Fn(Expr, Vec<Expr>) -> Expr + Send + Sync + 'static) -> Self {
        Operator::Multi(Arc::new(f))
    }

    /// `field <op> $n`
    pub fn binary(op: BinOp) -> Self {
        Operator::single(move |field, value| field.binop(op, value))
    }

    fn kind(&self) -> &'static str {
        match self {
            Operator::Boolean(_) => "boolean",
            Operator::Single(_) => "single",
            Operator::Multi(_) => "multi",
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operator::{}", self.kind())
    }
}

/// Operators by name. Built once at startup, then shared.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: IndexMap<String, Operator>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::empty()
            .with("is", Operator::boolean(Expr::is))
            .with("equals", Operator::binary(BinOp::Eq))
            .with("notEquals", Operator::binary(BinOp::Ne))
            .with("greaterThan", Operator::binary(BinOp::Gt))
            .with("greaterThanOrEqual", Operator::binary(BinOp::Ge))
            .with("lessThan", Operator::binary(BinOp::Lt))
            .with("lessThanOrEqual", Operator::binary(BinOp::Le))
            .with("like", Operator::binary(BinOp::Like))
            .with("notLike", Operator::binary(BinOp::NotLike))
            .with("iLike", Operator::binary(BinOp::ILike))
            .with("notILike", Operator::binary(BinOp::NotILike))
            .with(
                "in",
                Operator::multi(|field, values| {
                    if values.is_empty() {
                        Expr::bool(false)
                    } else {
                        field.in_list(values, false)
                    }
                }),
            )
            .with(
                "notIn",
                Operator::multi(|field, values| {
                    if values.is_empty() {
                        Expr::bool(true)
                    } else {
                        field.in_list(values, true)
                    }
                }),
            )
    }
}

impl OperatorRegistry {
    /// A registry without any operator.
    pub fn empty() -> Self {
        Self {
            operators: IndexMap::new(),
        }
    }

    /// Register (or replace) an operator.
    pub fn with(mut self, name: impl Into<String>, operator: Operator) -> Self {
        self.operators.insert(name.into(), operator);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }

    /// Build the condition for `field <name> value`, binding values through `bind`.
    pub(crate) fn apply(
        &self,
        name: &str,
        field: Expr,
        value: &Value,
        bind: &mut dyn FnMut(Value) -> Expr,
    ) -> Result<Expr, RuntimeQueryError> {
        let operator = self
            .get(name)
            .ok_or_else(|| RuntimeQueryError::OperatorNotFound(name.to_string()))?;
        match operator {
            Operator::Boolean(f) => Ok(f(field, boolean_test(name, value)?)),
            Operator::Single(f) => {
                if let Value::List(_) = value {
                    return Err(RuntimeQueryError::SingleValueOperatorValue(name.to_string()));
                }
                Ok(f(field, bind(value.clone())))
            }
            Operator::Multi(f) => {
                let Value::List(items) = value else {
                    return Err(RuntimeQueryError::MultiValueOperatorValue(name.to_string()));
                };
                let params = items.iter().cloned().map(&mut *bind).collect();
                Ok(f(field, params))
            }
        }
    }
}

fn boolean_test(operator: &str, value: &Value) -> Result<IsTest, RuntimeQueryError> {
    let invalid = || RuntimeQueryError::InvalidOperatorValue {
        operator: operator.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Null => Ok(IsTest::Null),
        Value::Bool(true) => Ok(IsTest::True),
        Value::Bool(false) => Ok(IsTest::False),
        Value::String(keyword) => match keyword.as_str() {
            "NULL" => Ok(IsTest::Null),
            "NOT_NULL" => Ok(IsTest::NotNull),
            "TRUE" => Ok(IsTest::True),
            "FALSE" => Ok(IsTest::False),
            _ => Err(invalid()),
        },
        Value::List(_) => Err(RuntimeQueryError::BooleanOperatorValue(operator.to_string())),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_sql::{ParamName, SelectStmt, render};

    fn condition(name: &str, value: Value) -> Result<(String, Vec<Value>), RuntimeQueryError> {
        let registry = OperatorRegistry::default();
        let mut bound = Vec::new();
        let mut bind = |value: Value| {
            let param = Expr::param(ParamName::from(format!("p{}", bound.len())));
            bound.push(value);
            param
        };
        let expr = registry.apply(name, Expr::column("title".into()), &value, &mut bind)?;
        let sql = render(&SelectStmt::new().where_(expr)).sql;
        Ok((sql.trim_start_matches("SELECT *\nWHERE ").to_string(), bound))
    }

    #[test]
    fn test_single_value_operators_bind_their_value() {
        let (sql, params) = condition("iLike", Value::from("%milk%")).unwrap();
        assert_eq!(sql, r#""title" ILIKE $1"#);
        assert_eq!(params, [Value::from("%milk%")]);

        let (sql, _) = condition("greaterThanOrEqual", Value::I64(3)).unwrap();
        assert_eq!(sql, r#""title" >= $1"#);
    }

    #[test]
    fn test_multi_value_operators() {
        let (sql, params) = condition("in", Value::from(vec!["OPEN", "DONE"])).unwrap();
        assert_eq!(sql, r#""title" IN ($1, $2)"#);
        assert_eq!(params.len(), 2);

        let (sql, params) = condition("notIn", Value::List(vec![])).unwrap();
        assert_eq!(sql, "TRUE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_boolean_operator_binds_nothing() {
        let (sql, params) = condition("is", Value::from("NOT_NULL")).unwrap();
        assert_eq!(sql, r#""title" IS NOT NULL"#);
        assert!(params.is_empty());

        let (sql, _) = condition("is", Value::Null).unwrap();
        assert_eq!(sql, r#""title" IS NULL"#);
    }

    #[test]
    fn test_operator_errors() {
        assert_eq!(
            condition("between", Value::I64(1)).unwrap_err().to_string(),
            "Operator 'between' not found."
        );
        assert_eq!(
            condition("equals", Value::from(vec![1i64, 2])).unwrap_err().to_string(),
            "SingleValueOperator 'equals' requires a single value."
        );
        assert_eq!(
            condition("in", Value::from("OPEN")).unwrap_err().to_string(),
            "MultiValueOperator 'in' requires an array of values."
        );
        assert_eq!(
            condition("is", Value::from(vec!["NULL"])).unwrap_err().to_string(),
            "BooleanOperator 'is' requires a single value."
        );
        assert!(matches!(
            condition("is", Value::from("MAYBE")),
            Err(RuntimeQueryError::InvalidOperatorValue { .. })
        ));
    }

    #[test]
    fn test_custom_operator() {
        let registry = OperatorRegistry::empty().with(
            "startsWith",
            Operator::single(|field, value| {
                field.binop(BinOp::Like, Expr::call("concat", vec![value, Expr::string("%")]))
            }),
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), ["startsWith"]);
        let mut bind = |_: Value| Expr::param("p0".into());
        let expr = registry
            .apply("startsWith", Expr::column("title".into()), &Value::from("Bu"), &mut bind)
            .unwrap();
        let sql = render(&SelectStmt::new().where_(expr)).sql;
        assert!(sql.ends_with(r#""title" LIKE concat($1, '%')"#));
    }
}
