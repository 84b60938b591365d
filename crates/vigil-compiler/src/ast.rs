//! Entity definition AST.
//!
//! The schema definition language is parsed elsewhere; the compiler consumes
//! these nodes. The node kinds are a closed set, with an `Unknown` arm for
//! anything a newer parser might produce that this compiler does not handle.

use indexmap::IndexMap;
use std::fmt;

/// A parsed schema document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub definitions: Vec<Definition>,
}

/// A top-level definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Entity(EntityDef),
    Enum(EnumDef),
    /// A definition kind the compiler does not know. Logged and skipped.
    Unknown { kind: String },
}

/// `type Task @table { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub description: Option<String>,
    pub directives: Vec<Directive>,
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            directives: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

/// `enum TaskStatus { OPEN DONE }`
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

/// A field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub directives: Vec<Directive>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            directives: Vec::new(),
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }
}

/// A field type: named, list, or non-null wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn non_null(self) -> Self {
        match self {
            TypeRef::NonNull(_) => self,
            other => TypeRef::NonNull(Box::new(other)),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Whether the type is a list, looking through a non-null wrapper.
    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
            TypeRef::Named(_) => false,
        }
    }

    /// The innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }

    /// The same type with the outer non-null wrapper removed.
    pub fn nullable(&self) -> TypeRef {
        match self {
            TypeRef::NonNull(inner) => inner.as_ref().clone(),
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "{name}"),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Directive arguments.
pub type Params = IndexMap<String, ParamValue>;

/// A directive or expression argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Object(IndexMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(n) => write!(f, "{n}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::String(s) => write!(f, "{s:?}"),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ParamValue::Object(map) => write_params(f, map),
        }
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    write!(f, "}}")
}

/// Canonical text of a parameter map, used to tell parameterizations apart.
pub fn params_text(params: &Params) -> String {
    if params.is_empty() {
        return String::new();
    }
    ParamValue::Object(params.clone()).to_string()
}

/// A directive attached to an entity or a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `@table` or `@table(schema: "s", name: "t")`
    Table {
        schema: Option<String>,
        name: Option<String>,
    },
    /// `@migrate(from: "old")`, optionally with `fromSchema` on entities
    Migrate {
        from: Option<String>,
        from_schema: Option<String>,
    },
    /// `@relation(name: "TaskOwner")`
    Relation { name: String },
    /// `@computed(expression: "taskCount", params: {...})`
    Computed { expression: String, params: Params },
    /// `@custom(resolver: "avatarUrl", params: {...})`
    Custom { resolver: String, params: Params },
    /// `@json`
    Json,
    /// `@isUnique`
    IsUnique,
    /// A directive the compiler does not know. Logged and skipped.
    Unknown { name: String },
}

impl Directive {
    pub fn table() -> Self {
        Directive::Table {
            schema: None,
            name: None,
        }
    }

    pub fn relation(name: impl Into<String>) -> Self {
        Directive::Relation { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Directive::Table { .. } => "table",
            Directive::Migrate { .. } => "migrate",
            Directive::Relation { .. } => "relation",
            Directive::Computed { .. } => "computed",
            Directive::Custom { .. } => "custom",
            Directive::Json => "json",
            Directive::IsUnique => "isUnique",
            Directive::Unknown { name } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_helpers() {
        let ty = TypeRef::list(TypeRef::named("Task").non_null()).non_null();
        assert_eq!(ty.to_string(), "[Task!]!");
        assert!(ty.is_list());
        assert!(ty.is_non_null());
        assert_eq!(ty.base_name(), "Task");
        assert_eq!(ty.nullable().to_string(), "[Task!]");
        assert_eq!(TypeRef::named("ID").nullable(), TypeRef::named("ID"));
    }

    #[test]
    fn test_params_text_is_stable() {
        let mut params = Params::new();
        assert_eq!(params_text(&params), "");
        params.insert("role".into(), "admin".into());
        params.insert("levels".into(), ParamValue::List(vec![ParamValue::Int(1)]));
        assert_eq!(params_text(&params), r#"{role: "admin", levels: [1]}"#);
    }
}
