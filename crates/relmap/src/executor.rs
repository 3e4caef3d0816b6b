use std::fmt::Debug;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::value::Value;

/// Boxed future returned by [`Executor`] methods.
pub type FutureResult<T> = BoxFuture<'static, anyhow::Result<T>>;

/// A result-set column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name as reported by the engine.
    pub name: String,
    /// Cell value.
    pub value: Value,
}

/// A result-set row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Cells in projection order.
    pub fields: Vec<Field>,
}

impl Row {
    /// Cell by column name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|field| field.name == name).map(|field| &field.value)
    }

    /// Remove and return a cell by column name.
    pub(crate) fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|field| field.name == name)?;
        Some(self.fields.swap_remove(index).value)
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows inserted, updated, or deleted.
    pub rows_affected: u64,
    /// Generated id of the last inserted row, where the engine reports one.
    pub last_insert_id: Option<i64>,
}

/// Query execution capability of a connection or transaction.
///
/// Futures are `'static`: implementations clone whatever handle they need
/// into the returned future. Dropping the future abandons the statement.
pub trait Executor: Debug + Send + Sync + 'static {
    /// Run a statement returning rows.
    fn query(&self, sql: String, params: Vec<Value>) -> FutureResult<Vec<Row>>;

    /// Run a statement returning no rows.
    fn exec(&self, sql: String, params: Vec<Value>) -> FutureResult<ExecResult>;

    /// Run a statement and keep only its first row.
    fn query_row(&self, sql: String, params: Vec<Value>) -> FutureResult<Option<Row>> {
        let rows = self.query(sql, params);
        async move { Ok(rows.await?.into_iter().next()) }.boxed()
    }
}
