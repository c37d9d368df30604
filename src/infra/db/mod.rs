//! SQLite-backed query executor.

mod rows;

pub use rows::QueryRows;

use std::str::FromStr;

use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::Sqlite;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::cache::{DateMode, Executor, KeyEncoder, KeyToken, Param};

use super::error::InfraError;

const NOTES_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS notes (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    title TEXT, \
    body TEXT, \
    created_at TEXT, \
    updated_at TEXT\
)";

/// Open a pool for `url`, creating the database file when missing.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, InfraError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), InfraError> {
    sqlx::query(NOTES_SCHEMA).execute(pool).await?;
    Ok(())
}

pub async fn health_check(pool: &SqlitePool) -> Result<(), InfraError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Bind {
    /// Scalars bind natively; structured values bind as their key text.
    fn from_param(param: &Param, encoder: &mut KeyEncoder) -> Result<Self, InfraError> {
        let bind = match param {
            Param::Null => Self::Null,
            Param::Bool(flag) => Self::Integer(i64::from(*flag)),
            Param::Int(value) => Self::Integer(*value),
            Param::UInt(value) => match i64::try_from(*value) {
                Ok(value) => Self::Integer(value),
                Err(_) => Self::Text(value.to_string()),
            },
            Param::Float(value) => Self::Real(*value),
            Param::Text(text) => Self::Text(text.clone()),
            Param::Bytes(bytes) => Self::Blob(bytes.to_vec()),
            Param::View(view) => Self::Blob(view.to_bytes().to_vec()),
            other => match encoder
                .encode(other)
                .map_err(|err| InfraError::database(err.to_string()))?
            {
                KeyToken::Null => Self::Null,
                KeyToken::Bytes(bytes) => Self::Blob(bytes.to_vec()),
                KeyToken::Text(text) => Self::Text(text),
            },
        };
        Ok(bind)
    }
}

/// Runs SQL text with positional parameters against a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
    date_mode: DateMode,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool, date_mode: DateMode) -> Self {
        Self { pool, date_mode }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Executor for SqliteExecutor {
    type Output = QueryRows;
    type Error = InfraError;

    fn execute(
        &self,
        operation: &str,
        params: &[Param],
    ) -> BoxFuture<'static, Result<QueryRows, InfraError>> {
        let pool = self.pool.clone();
        let sql = operation.to_owned();
        let mut encoder = KeyEncoder::new(self.date_mode);
        let binds: Result<Vec<Bind>, InfraError> = params
            .iter()
            .map(|param| Bind::from_param(param, &mut encoder))
            .collect();

        async move {
            let binds = binds?;
            debug!(sql = %sql, params = binds.len(), "executing query");

            let mut statement = sqlx::query::<Sqlite>(&sql);
            for bind in binds {
                statement = match bind {
                    Bind::Null => statement.bind(None::<String>),
                    Bind::Integer(value) => statement.bind(value),
                    Bind::Real(value) => statement.bind(value),
                    Bind::Text(text) => statement.bind(text),
                    Bind::Blob(bytes) => statement.bind(bytes),
                };
            }

            let rows = statement.fetch_all(&pool).await?;
            QueryRows::from_rows(&rows)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn bind(param: Param) -> Bind {
        Bind::from_param(&param, &mut KeyEncoder::new(DateMode::Utc)).expect("bindable")
    }

    #[test]
    fn scalars_bind_natively() {
        assert_eq!(bind(Param::Null), Bind::Null);
        assert_eq!(bind(Param::Bool(true)), Bind::Integer(1));
        assert_eq!(bind(Param::Int(5)), Bind::Integer(5));
        assert_eq!(
            bind(Param::UInt(u64::MAX)),
            Bind::Text("18446744073709551615".to_owned())
        );
        assert_eq!(bind(Param::Float(0.5)), Bind::Real(0.5));
        assert_eq!(bind("x".into()), Bind::Text("x".to_owned()));
        assert_eq!(
            bind(Param::Bytes(Bytes::from_static(b"ab"))),
            Bind::Blob(b"ab".to_vec())
        );
    }

    #[test]
    fn structured_values_bind_as_key_text() {
        assert_eq!(
            bind(Param::DateTime(datetime!(2024-05-01 08:30:00 UTC))),
            Bind::Text("2024-05-01T08:30:00.000+00:00".to_owned())
        );
        assert_eq!(
            bind(Param::from(json!([1, 2]))),
            Bind::Text(r#"{"1","2"}"#.to_owned())
        );
        assert_eq!(
            bind(Param::Object(json!({ "id": 1 }))),
            Bind::Text(r#"{"id":1}"#.to_owned())
        );
    }
}
