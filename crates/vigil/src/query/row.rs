//! Row mapping between Postgres and [`Value`].

use bytes::BytesMut;
use postgres_types::{FromSql, IsNull, Kind, ToSql, Type as PgTypeInfo};
use std::error::Error as StdError;

use super::Value;

type BoxError = Box<dyn StdError + Sync + Send>;

/// A row of data as column name → value pairs.
pub type Row = Vec<(String, Value)>;

/// Raw JSON text, with the JSONB version byte stripped.
struct JsonRaw(String);

impl<'a> FromSql<'a> for JsonRaw {
    fn from_sql(ty: &PgTypeInfo, raw: &'a [u8]) -> Result<Self, BoxError> {
        if !Self::accepts(ty) {
            return Err(format!("expected JSON or JSONB, got {ty:?}").into());
        }
        // JSONB wire format has a 1-byte version prefix
        let bytes = if *ty == PgTypeInfo::JSONB && raw.first() == Some(&1) {
            &raw[1..]
        } else {
            raw
        };
        Ok(JsonRaw(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        *ty == PgTypeInfo::JSON || *ty == PgTypeInfo::JSONB
    }
}

/// Enum labels travel as plain text.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &PgTypeInfo, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(EnumLabel(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// Convert a tokio_postgres Row to our Row type, reading each column by its
/// Postgres type.
pub fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row, crate::Error> {
    pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = pg_value_to_value(pg_row, idx, column.name(), column.type_())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    column: &str,
    ty: &PgTypeInfo,
) -> Result<Value, crate::Error> {
    let read_error = |e: tokio_postgres::Error| crate::Error::ColumnRead {
        column: column.to_string(),
        message: e.to_string(),
    };

    if let Kind::Enum(_) = ty.kind() {
        let v: Option<EnumLabel> = row.try_get(idx).map_err(read_error)?;
        return Ok(v.map(|l| Value::String(l.0)).unwrap_or(Value::Null));
    }
    if let Kind::Array(member) = ty.kind() {
        return array_value(row, idx, column, member);
    }

    let value = match *ty {
        PgTypeInfo::BOOL => Value::from(row.try_get::<_, Option<bool>>(idx).map_err(read_error)?),
        PgTypeInfo::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(read_error)?
            .map(|v| Value::I32(v.into()))
            .unwrap_or(Value::Null),
        PgTypeInfo::INT4 => Value::from(row.try_get::<_, Option<i32>>(idx).map_err(read_error)?),
        PgTypeInfo::INT8 => Value::from(row.try_get::<_, Option<i64>>(idx).map_err(read_error)?),
        PgTypeInfo::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(read_error)?
            .map(|v| Value::F64(v.into()))
            .unwrap_or(Value::Null),
        PgTypeInfo::FLOAT8 => Value::from(row.try_get::<_, Option<f64>>(idx).map_err(read_error)?),
        PgTypeInfo::TEXT | PgTypeInfo::VARCHAR | PgTypeInfo::BPCHAR | PgTypeInfo::NAME => {
            Value::from(row.try_get::<_, Option<String>>(idx).map_err(read_error)?)
        }
        PgTypeInfo::UUID => {
            Value::from(row.try_get::<_, Option<uuid::Uuid>>(idx).map_err(read_error)?)
        }
        PgTypeInfo::JSON | PgTypeInfo::JSONB => row
            .try_get::<_, Option<JsonRaw>>(idx)
            .map_err(read_error)?
            .map(|j| Value::Json(j.0))
            .unwrap_or(Value::Null),
        _ => {
            return Err(crate::Error::UnsupportedColumn {
                column: column.to_string(),
                ty: ty.name().to_string(),
            });
        }
    };
    Ok(value)
}

fn array_value(
    row: &tokio_postgres::Row,
    idx: usize,
    column: &str,
    member: &PgTypeInfo,
) -> Result<Value, crate::Error> {
    fn list<T: Into<Value>>(items: Option<Vec<Option<T>>>) -> Value {
        match items {
            Some(items) => Value::List(items.into_iter().map(Value::from).collect()),
            None => Value::Null,
        }
    }
    let read_error = |e: tokio_postgres::Error| crate::Error::ColumnRead {
        column: column.to_string(),
        message: e.to_string(),
    };

    if let Kind::Enum(_) = member.kind() {
        let items: Option<Vec<Option<EnumLabel>>> = row.try_get(idx).map_err(read_error)?;
        return Ok(list(
            items.map(|items| items.into_iter().map(|l| l.map(|l| l.0)).collect()),
        ));
    }
    let value = match *member {
        PgTypeInfo::UUID => list::<uuid::Uuid>(row.try_get(idx).map_err(read_error)?),
        PgTypeInfo::TEXT | PgTypeInfo::VARCHAR => {
            list::<String>(row.try_get(idx).map_err(read_error)?)
        }
        PgTypeInfo::INT4 => list::<i32>(row.try_get(idx).map_err(read_error)?),
        PgTypeInfo::INT8 => list::<i64>(row.try_get(idx).map_err(read_error)?),
        PgTypeInfo::BOOL => list::<bool>(row.try_get(idx).map_err(read_error)?),
        _ => {
            return Err(crate::Error::UnsupportedColumn {
                column: column.to_string(),
                ty: format!("{}[]", member.name()),
            });
        }
    };
    Ok(value)
}

/// Wrapper to make our Value usable as a ToSql parameter.
///
/// The parameter type Postgres infers decides the encoding: a string bound to
/// a uuid column is parsed as a uuid, an integer bound to an `int4` is
/// narrowed, and so on.
#[derive(Debug)]
pub struct SqlParam<'a>(pub &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &PgTypeInfo, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match (self.0, ty) {
            (Value::Null, _) => Ok(IsNull::Yes),
            (Value::List(_), _) if !matches!(ty.kind(), Kind::Array(_)) => {
                Err(format!("cannot bind a list to a parameter of type {ty}").into())
            }
            (Value::List(items), _) => {
                let params: Vec<SqlParam<'_>> = items.iter().map(SqlParam).collect();
                params.to_sql(ty, out)
            }
            (Value::Json(v) | Value::String(v), &PgTypeInfo::JSON | &PgTypeInfo::JSONB) => {
                if *ty == PgTypeInfo::JSONB {
                    out.extend_from_slice(&[1]); // JSONB version 1
                }
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
            (Value::String(v), &PgTypeInfo::UUID) => uuid::Uuid::parse_str(v)?.to_sql(ty, out),
            (Value::Bool(v), _) => v.to_sql(ty, out),
            (Value::I32(v), &PgTypeInfo::INT2) => i16::try_from(*v)?.to_sql(ty, out),
            (Value::I64(v), &PgTypeInfo::INT2) => i16::try_from(*v)?.to_sql(ty, out),
            (Value::I64(v), &PgTypeInfo::INT4) => i32::try_from(*v)?.to_sql(ty, out),
            (Value::I32(v), &PgTypeInfo::INT8) => i64::from(*v).to_sql(ty, out),
            (Value::I32(v), &PgTypeInfo::FLOAT8) => f64::from(*v).to_sql(ty, out),
            (Value::I64(v), &PgTypeInfo::FLOAT8) => (*v as f64).to_sql(ty, out),
            (Value::F64(v), &PgTypeInfo::FLOAT4) => (*v as f32).to_sql(ty, out),
            (Value::I32(v), _) => v.to_sql(ty, out),
            (Value::I64(v), _) => v.to_sql(ty, out),
            (Value::F64(v), _) => v.to_sql(ty, out),
            // text, varchar and enum labels share the same wire format
            (Value::String(v), _) | (Value::Json(v), _) => {
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        match ty.kind() {
            Kind::Enum(_) => true,
            Kind::Array(member) => Self::accepts(member),
            _ => matches!(
                *ty,
                PgTypeInfo::BOOL
                    | PgTypeInfo::INT2
                    | PgTypeInfo::INT4
                    | PgTypeInfo::INT8
                    | PgTypeInfo::FLOAT4
                    | PgTypeInfo::FLOAT8
                    | PgTypeInfo::TEXT
                    | PgTypeInfo::VARCHAR
                    | PgTypeInfo::BPCHAR
                    | PgTypeInfo::NAME
                    | PgTypeInfo::UUID
                    | PgTypeInfo::JSON
                    | PgTypeInfo::JSONB
            ),
        }
    }

    postgres_types::to_sql_checked!();
}
