use std::fmt::Write as _;
use std::sync::Arc;

use sea_query::{Alias, OnConflict, SimpleExpr};

use crate::column::InsertValue;
use crate::dialect::{Dialect, Query};
use crate::error::{Error, Result};
use crate::executor::{ExecResult, Executor};
use crate::table::{Record, Table, TableIdent};
use crate::value::Value;

/// Builder for constructing INSERT queries with string-keyed values.
pub struct InsertBuilder<T> {
    table: Table<T>,
    values: Vec<(&'static str, Value)>,
    conflict: Option<ConflictStrategy>,
    executor: Option<Arc<dyn Executor>>,
    invalid: Option<String>,
}

enum ConflictStrategy {
    DoNothing { target: Vec<&'static str> },
    DoUpdate { target: Vec<&'static str>, columns: Vec<&'static str> },
}

impl ConflictStrategy {
    fn into_target(self) -> Vec<&'static str> {
        match self {
            Self::DoNothing { target } | Self::DoUpdate { target, .. } => target,
        }
    }
}

impl<T: Record> InsertBuilder<T> {
    /// Creates a new INSERT query builder.
    #[must_use]
    pub fn new(table: &Table<T>) -> Self {
        Self {
            table: table.clone(),
            values: Vec::new(),
            conflict: None,
            executor: None,
            invalid: None,
        }
    }

    /// Populate every column from a record. Zero values on generated or
    /// defaulted columns are left to the database.
    #[must_use]
    pub fn from_record(table: &Table<T>, record: &T) -> Self {
        let mut builder = Self::new(table);
        for column in table.columns() {
            if let InsertValue::Value(value) = column.insert_value(record) {
                builder.values.push((column.spec().name(), value));
            }
        }
        builder
    }

    fn resolve(&mut self, column: &str) -> Option<&'static str> {
        match self.table.column_by_name(column) {
            Ok(column) => Some(column.spec().name()),
            Err(_) => {
                if self.invalid.is_none() {
                    self.invalid = Some(column.to_string());
                }
                None
            }
        }
    }

    fn resolve_all(&mut self, columns: &[&str]) -> Vec<&'static str> {
        columns.iter().filter_map(|column| self.resolve(column)).collect()
    }

    /// Sets a column value for the insert.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        if let Some(name) = self.resolve(column) {
            self.values.retain(|(existing, _)| *existing != name);
            self.values.push((name, value.into()));
        }
        self
    }

    /// Handle conflicts on specified columns. Call ``do_update()`` or ``do_nothing()`` after.
    #[must_use]
    pub fn on_conflict_columns(mut self, columns: &[&str]) -> Self {
        let target = self.resolve_all(columns);
        self.conflict = Some(ConflictStrategy::DoNothing { target });
        self
    }

    /// Shorthand for single column conflict
    #[must_use]
    pub fn on_conflict(self, column: &str) -> Self {
        self.on_conflict_columns(&[column])
    }

    /// On conflict, do nothing (ignore the insert)
    #[must_use]
    pub fn do_nothing(mut self) -> Self {
        if let Some(conflict) = self.conflict.take() {
            self.conflict = Some(ConflictStrategy::DoNothing {
                target: conflict.into_target(),
            });
        }
        self
    }

    /// On conflict, update the specified columns with excluded (new) values
    #[must_use]
    pub fn do_update(mut self, columns: &[&str]) -> Self {
        let columns = self.resolve_all(columns);
        if let Some(conflict) = self.conflict.take() {
            self.conflict = Some(ConflictStrategy::DoUpdate {
                target: conflict.into_target(),
                columns,
            });
        }
        self
    }

    /// On conflict, update all columns except the conflict target
    #[must_use]
    pub fn do_update_all(mut self) -> Self {
        if let Some(conflict) = self.conflict.take() {
            let target = conflict.into_target();
            let columns = self
                .values
                .iter()
                .map(|(column, _)| *column)
                .filter(|column| !target.contains(column))
                .collect();
            self.conflict = Some(ConflictStrategy::DoUpdate { target, columns });
        }
        self
    }

    /// Run on `executor` instead of the database's default executor.
    #[must_use]
    pub fn using(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn render(self, dialect: &dyn Dialect) -> Result<Query> {
        self.table.ensure_writable()?;
        if let Some(field) = self.invalid {
            return Err(Error::InvalidField {
                table: self.table.name().to_string(),
                field,
            });
        }
        if self.conflict.is_some() && !dialect.supports_on_conflict() {
            return Err(Error::Unsupported("ON CONFLICT upserts on this dialect"));
        }

        let columns: Vec<_> = self.values.iter().map(|(column, _)| *column).collect();
        let row: Vec<SimpleExpr> = self.values.into_iter().map(|(_, value)| SimpleExpr::Value(value.into_sea())).collect();
        if columns.is_empty() {
            return insert_query(dialect, self.table.ident(), &columns, Vec::new(), None);
        }

        let mut statement = sea_query::Query::insert();
        statement
            .into_table(self.table.ident().write_ref())
            .columns(columns.iter().map(|column| Alias::new(*column)))
            .values_panic(row);

        // Handle ON CONFLICT clause
        if let Some(conflict) = self.conflict {
            let on_conflict = match conflict {
                ConflictStrategy::DoNothing { target } => {
                    OnConflict::columns(target.into_iter().map(Alias::new)).do_nothing().to_owned()
                }
                ConflictStrategy::DoUpdate { target, columns } => {
                    OnConflict::columns(target.into_iter().map(Alias::new))
                        .update_columns(columns.into_iter().map(Alias::new))
                        .to_owned()
                }
            };
            statement.on_conflict(on_conflict);
        }

        let query = dialect.finish(statement.build(dialect.query_builder()))?;
        tracing::debug!(
            table = self.table.name(),
            sql = %query.sql,
            param_count = query.params.len(),
            "InsertBuilder generated SQL"
        );
        Ok(query)
    }

    /// Build the INSERT query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] for unknown columns,
    /// [`Error::Unsupported`] for upserts the dialect cannot express or
    /// writes through a view, or an error if a value cannot be converted.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub fn build(self) -> Result<Query> {
        let database = self.table.ident().database();
        self.render(database.dialect())
    }

    /// Build and execute the INSERT.
    ///
    /// # Errors
    ///
    /// Returns build errors plus driver errors, with unique-constraint
    /// violations reported as [`Error::UniqueViolation`].
    pub async fn execute(self) -> Result<ExecResult> {
        let conn = self.table.ident().database().conn(self.executor.clone());
        let query = self.render(conn.dialect())?;
        conn.exec(query).await
    }
}

/// Multi-row INSERT over `columns`, or the dialect's default-values form
/// when no column is given.
pub(crate) fn insert_query(
    dialect: &dyn Dialect, ident: &TableIdent, columns: &[&'static str], rows: Vec<Vec<SimpleExpr>>,
    returning: Option<&'static str>,
) -> Result<Query> {
    if columns.is_empty() {
        let mut sql = format!(
            "INSERT INTO {} {}",
            ident.quoted_name(|s| dialect.quote_identifier(s)),
            dialect.default_values_clause()
        );
        if let Some(column) = returning {
            let _ = write!(sql, " RETURNING {}", dialect.quote_identifier(column));
        }
        tracing::debug!(table = ident.name(), sql = %sql, "default-values insert");
        return Ok(Query { sql, params: Vec::new() });
    }

    let mut statement = sea_query::Query::insert();
    statement.into_table(ident.write_ref()).columns(columns.iter().map(|column| Alias::new(*column)));
    for row in rows {
        statement.values_panic(row);
    }
    if let Some(column) = returning {
        statement.returning_col(Alias::new(column));
    }

    let query = dialect.finish(statement.build(dialect.query_builder()))?;
    tracing::debug!(
        table = ident.name(),
        sql = %query.sql,
        param_count = query.params.len(),
        "insert generated SQL"
    );
    Ok(query)
}
