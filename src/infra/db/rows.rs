use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::infra::error::InfraError;

/// Rows returned by one query, each keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub rows: Vec<Map<String, Value>>,
}

impl QueryRows {
    pub(crate) fn from_rows(rows: &[SqliteRow]) -> Result<Self, InfraError> {
        let rows = rows.iter().map(row_to_map).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Map<String, Value>> {
        self.rows.first()
    }
}

/// Decode each column by the storage class of its value; blobs become hex.
fn row_to_map(row: &SqliteRow) -> Result<Map<String, Value>, InfraError> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let storage = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_owned())
            }
        };

        let value = match storage.as_deref() {
            None => Value::Null,
            Some("INTEGER") => Value::from(row.try_get::<i64, _>(index)?),
            Some("REAL") => Number::from_f64(row.try_get::<f64, _>(index)?)
                .map_or(Value::Null, Value::Number),
            Some("BLOB") => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
            Some(_) => Value::String(row.try_get::<String, _>(index)?),
        };
        map.insert(column.name().to_owned(), value);
    }
    Ok(map)
}
