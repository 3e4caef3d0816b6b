//! `SQLite` executor for relmap.
//!
//! A lightweight backend for development and tests: one connection behind a
//! mutex, statements run on the calling task.

#![allow(clippy::significant_drop_tightening)]

use std::sync::Arc;

use anyhow::{Context, Result};
use fromenv::FromEnv;
use futures::FutureExt;
use relmap::{ExecResult, Executor, Field, FutureResult, Row, Value};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection as SqliteConnection, params_from_iter};
use tracing::instrument;

/// Options used to connect to the `SQLite` database.
///
/// This struct is used to load connection options from environment variables.
#[derive(Debug, Clone, FromEnv)]
pub struct ConnectOptions {
    /// Database path or URI.
    #[env(from = "SQL_DATABASE", default = "file::memory:?cache=shared")]
    pub database: String,
}

impl ConnectOptions {
    /// Load options from `SQL_DATABASE`.
    ///
    /// # Errors
    ///
    /// Returns an error when the environment cannot be read.
    pub fn load() -> Result<Self> {
        Self::from_env().finalize().context("issue loading connection options")
    }
}

/// [`Executor`] over a single `rusqlite` connection.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    // rusqlite::Connection isn't `Sync`
    conn: Arc<parking_lot::Mutex<SqliteConnection>>,
}

impl SqliteExecutor {
    /// Connect using options from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the options cannot be loaded or the database
    /// cannot be opened.
    pub async fn connect() -> Result<Self> {
        Self::connect_with(ConnectOptions::load()?).await
    }

    /// Connect to `options.database`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened.
    #[instrument]
    pub async fn connect_with(options: ConnectOptions) -> Result<Self> {
        tracing::debug!("initializing SQLite connection to: {}", options.database);
        let conn = SqliteConnection::open(&options.database).context("failed to open SQLite database")?;
        Ok(Self {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error when `SQLite` cannot allocate the database.
    pub fn in_memory() -> Result<Self> {
        let conn = SqliteConnection::open_in_memory().context("failed to open in-memory SQLite database")?;
        Ok(Self {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    /// Run a batch of `;`-separated statements without parameters (schema
    /// setup).
    ///
    /// # Errors
    ///
    /// Returns the first statement error.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql).context("failed to execute batch")
    }
}

impl Executor for SqliteExecutor {
    fn query(&self, sql: String, params: Vec<Value>) -> FutureResult<Vec<Row>> {
        tracing::debug!("executing query: {}", sql);
        let conn = Arc::clone(&self.conn);

        async move {
            let params = params.iter().map(to_sqlite).collect::<Result<Vec<_>>>()?;
            let conn = conn.lock();
            let mut stmt = conn.prepare(&sql).context("failed to prepare statement")?;
            let column_names: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

            let mut rows = stmt.query(params_from_iter(params.iter())).context("failed to execute query")?;
            let mut result_rows = Vec::new();
            while let Some(row) = rows.next().context("failed to fetch row")? {
                let mut fields = Vec::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    let value = row.get_ref(i).context("failed to get column value")?;
                    fields.push(Field {
                        name: name.clone(),
                        value: from_sqlite(value)?,
                    });
                }
                result_rows.push(Row { fields });
            }
            Ok(result_rows)
        }
        .boxed()
    }

    fn exec(&self, sql: String, params: Vec<Value>) -> FutureResult<ExecResult> {
        tracing::debug!("executing statement: {}", sql);
        let conn = Arc::clone(&self.conn);

        async move {
            let params = params.iter().map(to_sqlite).collect::<Result<Vec<_>>>()?;
            let conn = conn.lock();
            let mut stmt = conn.prepare(&sql).context("failed to prepare statement")?;
            let changes = stmt.execute(params_from_iter(params.iter())).context("failed to execute statement")?;

            let rows_affected = u64::try_from(changes).context("row count out of range")?;
            Ok(ExecResult {
                rows_affected,
                last_insert_id: (rows_affected > 0).then(|| conn.last_insert_rowid()),
            })
        }
        .boxed()
    }
}

fn to_sqlite(value: &Value) -> Result<SqliteValue> {
    Ok(match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqliteValue::Integer(i64::from(*i)),
        Value::Int64(i) => SqliteValue::Integer(*i),
        Value::Uint32(u) => SqliteValue::Integer(i64::from(*u)),
        Value::Uint64(u) => SqliteValue::Integer(i64::try_from(*u).context("integer exceeds SQLite range")?),
        Value::Float(f) => SqliteValue::Real(f64::from(*f)),
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Str(s) => SqliteValue::Text(s.clone()),
        Value::Binary(b) => SqliteValue::Blob(b.clone()),
        Value::Date(date) => SqliteValue::Text(date.to_string()),
        Value::Time(time) => SqliteValue::Text(time.to_string()),
        Value::Timestamp(ts) => SqliteValue::Text(ts.to_rfc3339()),
        Value::Json(_) | Value::Array(_) => SqliteValue::Text(value.to_json().to_string()),
    })
}

fn from_sqlite(value: ValueRef<'_>) -> Result<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Int64(i)),
        ValueRef::Real(f) => Ok(Value::Double(f)),
        ValueRef::Text(t) => {
            let s = std::str::from_utf8(t).context("invalid UTF-8 in text value")?;
            Ok(Value::Str(s.to_string()))
        }
        ValueRef::Blob(b) => Ok(Value::Binary(b.to_vec())),
    }
}
