//! What a client asks for.

use super::Value;

/// A nested field selection, with the arguments that apply at this level.
///
/// ```
/// use vigil::query::{FieldSelection, Filter, Value};
///
/// // tasks(filter: { title: { iLike: "%milk%" } }, limit: 10) {
/// //   id title owner { name }
/// // }
/// let selection = FieldSelection::new()
///     .field("id")
///     .field("title")
///     .relation("owner", FieldSelection::new().field("name"))
///     .filter(Filter::field("title", "iLike", "%milk%"))
///     .limit(10);
/// assert_eq!(selection.fields.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    pub fields: Vec<SelectedField>,
    pub args: QueryArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedField {
    pub name: String,
    /// Present for relation fields
    pub selection: Option<FieldSelection>,
}

/// Filtering and pagination arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderField>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub field: String,
    pub desc: bool,
}

/// A boolean filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// One field, one or more `(operator, value)` pairs that must all hold
    Field {
        field: String,
        operators: Vec<(String, Value)>,
    },
}

impl Filter {
    pub fn field(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Field {
            field: field.into(),
            operators: vec![(operator.into(), value.into())],
        }
    }

    /// Add another operator to a field leaf. Other nodes are returned unchanged.
    pub fn with(self, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        match self {
            Filter::Field {
                field,
                mut operators,
            } => {
                operators.push((operator.into(), value.into()));
                Filter::Field { field, operators }
            }
            other => other,
        }
    }
}

impl FieldSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SelectedField {
            name: name.into(),
            selection: None,
        });
        self
    }

    pub fn relation(mut self, name: impl Into<String>, selection: FieldSelection) -> Self {
        self.fields.push(SelectedField {
            name: name.into(),
            selection: Some(selection),
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.args.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, desc: bool) -> Self {
        self.args.order_by.push(OrderField {
            field: field.into(),
            desc,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.args.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.args.offset = Some(offset);
        self
    }
}
