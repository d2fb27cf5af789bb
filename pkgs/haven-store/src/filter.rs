//! Translation of data-store queries into Sea-ORM conditions

use chrono::DateTime;
use haven_chat::{col, DataStoreError, Filter};
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{ColumnTrait, Condition, EntityName, EntityTrait};
use serde_json::Value;
use std::str::FromStr;

/// Columns stored as Unix millis but exchanged as RFC 3339 strings
const TIMESTAMP_COLUMNS: [&str; 2] = [col::CREATED_AT, col::LAST_MESSAGE_TIME];

/// Resolve a wire column name on entity `E`
pub(crate) fn column<E>(name: &str) -> Result<E::Column, DataStoreError>
where
    E: EntityTrait,
    E::Column: FromStr,
{
    E::Column::from_str(name).map_err(|_| {
        DataStoreError::InvalidRow(format!(
            "unknown column '{}' on {}",
            name,
            E::default().table_name()
        ))
    })
}

/// Build the `WHERE` condition for `filter`
pub(crate) fn condition<E>(filter: &Filter) -> Result<Condition, DataStoreError>
where
    E: EntityTrait,
    E::Column: FromStr,
{
    let condition = match filter {
        Filter::All => Condition::all(),
        Filter::Eq(name, value) => Condition::all().add(compare::<E>(name, value, true)?),
        Filter::Ne(name, value) => Condition::all().add(compare::<E>(name, value, false)?),
        Filter::In(name, values) => {
            let column = column::<E>(name)?;
            let values = values
                .iter()
                .map(|v| sql_value(name, v))
                .collect::<Result<Vec<_>, _>>()?;
            Condition::all().add(column.is_in(values))
        }
        Filter::And(filters) => {
            let mut all = Condition::all();
            for f in filters {
                all = all.add(condition::<E>(f)?);
            }
            all
        }
        Filter::Or(filters) => {
            let mut any = Condition::any();
            for f in filters {
                any = any.add(condition::<E>(f)?);
            }
            any
        }
    };
    Ok(condition)
}

fn compare<E>(name: &str, value: &Value, equal: bool) -> Result<SimpleExpr, DataStoreError>
where
    E: EntityTrait,
    E::Column: FromStr,
{
    let column = column::<E>(name)?;
    let expr = match (value, equal) {
        (Value::Null, true) => column.is_null(),
        (Value::Null, false) => column.is_not_null(),
        (value, true) => column.eq(sql_value(name, value)?),
        (value, false) => column.ne(sql_value(name, value)?),
    };
    Ok(expr)
}

/// Convert a JSON filter value into the stored representation of `column`
pub(crate) fn sql_value(column: &str, value: &Value) -> Result<sea_orm::Value, DataStoreError> {
    let invalid = || {
        DataStoreError::InvalidRow(format!("cannot compare '{}' with {}", column, value))
    };
    match value {
        Value::Bool(b) => Ok((*b).into()),
        Value::Number(n) => n
            .as_i64()
            .map(Into::into)
            .or_else(|| n.as_f64().map(Into::into))
            .ok_or_else(invalid),
        Value::String(s) if TIMESTAMP_COLUMNS.contains(&column) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis().into())
            .map_err(|_| invalid()),
        Value::String(s) => Ok(s.clone().into()),
        _ => Err(invalid()),
    }
}
