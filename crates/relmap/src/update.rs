use std::sync::Arc;

use sea_query::{Alias, SimpleExpr};

use crate::dialect::{Dialect, Query};
use crate::error::{Error, Result};
use crate::executor::{Executor, Row};
use crate::filter::{Filter, RenderCtx};
use crate::table::{Record, Table};
use crate::value::Value;

/// Builder for constructing UPDATE queries.
pub struct UpdateBuilder<T> {
    table: Table<T>,
    set_clauses: Vec<(&'static str, Value)>,
    filters: Vec<Filter>,
    returning: Vec<&'static str>,
    executor: Option<Arc<dyn Executor>>,
    invalid: Option<String>,
}

impl<T: Record> UpdateBuilder<T> {
    /// Creates a new UPDATE query builder.
    #[must_use]
    pub fn new(table: &Table<T>) -> Self {
        Self {
            table: table.clone(),
            set_clauses: Vec::new(),
            filters: Vec::new(),
            returning: Vec::new(),
            executor: None,
            invalid: None,
        }
    }

    fn resolve(&mut self, column: &str) -> Option<&'static str> {
        let resolved = self.table.column_by_name(column).map(|c| c.spec().name()).ok();
        if resolved.is_none() && self.invalid.is_none() {
            self.invalid = Some(column.to_string());
        }
        resolved
    }

    /// Sets a column to a new value.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        if let Some(name) = self.resolve(column) {
            self.set_clauses.push((name, value.into()));
        }
        self
    }

    /// Adds a WHERE clause filter. Columns render unqualified.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        for name in filter.unqualified() {
            self.resolve(name);
        }
        self.filters.push(filter);
        self
    }

    /// Specifies columns to return from updated rows.
    #[must_use]
    pub fn returning(mut self, column: &str) -> Self {
        if let Some(name) = self.resolve(column) {
            self.returning.push(name);
        }
        self
    }

    /// Run on `executor` instead of the database's default executor.
    #[must_use]
    pub fn using(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn render(&self, dialect: &dyn Dialect) -> Result<Query> {
        self.table.ensure_writable()?;
        if let Some(field) = &self.invalid {
            return Err(Error::InvalidField {
                table: self.table.name().to_string(),
                field: field.clone(),
            });
        }

        let ctx = RenderCtx { dialect, root: None };
        let mut statement = sea_query::Query::update();
        statement.table(self.table.ident().write_ref());

        for (column, value) in &self.set_clauses {
            statement.value(Alias::new(*column), SimpleExpr::Value(value.clone().into_sea()));
        }

        for filter in &self.filters {
            statement.and_where(filter.render(&ctx));
        }

        for column in &self.returning {
            statement.returning_col(Alias::new(*column));
        }

        let query = dialect.finish(statement.build(dialect.query_builder()))?;
        tracing::debug!(
            table = self.table.name(),
            sql = %query.sql,
            param_count = query.params.len(),
            "UpdateBuilder generated SQL"
        );
        Ok(query)
    }

    /// Build the UPDATE query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] for unknown columns,
    /// [`Error::Unsupported`] for writes through a view, or an error if a
    /// value cannot be converted.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub fn build(&self) -> Result<Query> {
        let database = self.table.ident().database();
        self.render(database.dialect())
    }

    /// Execute, returning the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns build and driver errors.
    pub async fn execute(self) -> Result<u64> {
        let conn = self.table.ident().database().conn(self.executor.clone());
        let query = self.render(conn.dialect())?;
        Ok(conn.exec(query).await?.rows_affected)
    }

    /// Execute, returning the `RETURNING` rows.
    ///
    /// # Errors
    ///
    /// Returns build and driver errors.
    pub async fn fetch(self) -> Result<Vec<Row>> {
        let conn = self.table.ident().database().conn(self.executor.clone());
        let query = self.render(conn.dialect())?;
        conn.query(query).await
    }
}
