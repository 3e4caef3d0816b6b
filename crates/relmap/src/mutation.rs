//! Record-level writes: insert, batch insert, and update or delete by
//! primary key, optionally cascading through registered relations.

use std::sync::Arc;

use sea_query::{Alias, Expr, SimpleExpr};

use crate::column::InsertValue;
use crate::database::Conn;
use crate::dialect::LastInsertId;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::filter::{ColumnName, Filter, Operand, RenderCtx};
use crate::insert::insert_query;
use crate::relation::conjunction;
use crate::table::{Record, Table};
use crate::value::Value;

/// Per-call write settings.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    cascading: bool,
    executor: Option<Arc<dyn Executor>>,
}

impl WriteOptions {
    /// Walk populated relation slots and apply the same write to them.
    #[must_use]
    pub const fn cascading(mut self, cascading: bool) -> Self {
        self.cascading = cascading;
        self
    }

    /// Run on `executor` instead of the database's default executor.
    #[must_use]
    pub fn using(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

impl<T: Record> Table<T> {
    fn write_conn(&self, options: &WriteOptions) -> Conn {
        self.ident().database().conn(options.executor.clone())
    }

    /// Insert `record`, populating a generated primary key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for views or when the dialect cannot
    /// report a needed generated key, plus driver errors.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub async fn insert(&self, record: &mut T, options: &WriteOptions) -> Result<()> {
        let conn = self.write_conn(options);
        self.insert_in(&conn, record, options.cascading).await
    }

    /// Insert `records` in chunks of `insert_chunk_size` rows, falling back
    /// to one statement per row when the dialect cannot express the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for cascading batches, views, or
    /// missing generated-key support, plus driver errors.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub async fn insert_all(&self, records: &mut [T], options: &WriteOptions) -> Result<()> {
        self.ensure_writable()?;
        if options.cascading {
            return Err(Error::Unsupported("cascading batch insert"));
        }
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.write_conn(options);
        let dialect = conn.dialect();
        let strategy = dialect.last_insert_id();
        let generated = self.auto_increment();
        let needs_ids = generated.is_some_and(|column| records.iter().any(|record| column.is_zero(record)));
        if needs_ids && strategy == LastInsertId::Unsupported {
            return Err(Error::Unsupported("reading generated keys on this dialect"));
        }

        let token = dialect.default_value_expression();
        let rows: Option<Vec<Vec<SimpleExpr>>> =
            records.iter().map(|record| self.batch_row(record, token)).collect();
        let rows = match rows {
            Some(rows) if !(needs_ids && strategy == LastInsertId::ByResult) => rows,
            _ => {
                tracing::debug!(table = self.name(), rows = records.len(), "inserting row by row");
                for record in records.iter_mut() {
                    self.insert_row(&conn, record).await?;
                }
                return Ok(());
            }
        };

        let names: Vec<_> = self.columns().iter().map(|column| column.spec().name()).collect();
        let returning = generated.filter(|_| needs_ids).map(|column| column.spec().name());
        let mut rows = rows.into_iter();
        for chunk in records.chunks_mut(conn.options().insert_chunk_size.max(1)) {
            let batch: Vec<_> = rows.by_ref().take(chunk.len()).collect();
            let query = insert_query(dialect, self.ident(), &names, batch, returning)?;
            tracing::debug!(table = self.name(), rows = chunk.len(), "inserting chunk");

            let (Some(column), Some(name)) = (generated, returning) else {
                conn.exec(query).await?;
                continue;
            };
            let returned = conn.query(query).await?;
            if returned.len() != chunk.len() {
                return Err(Error::Driver(anyhow::anyhow!(
                    "insert returned {} keys for {} rows",
                    returned.len(),
                    chunk.len()
                )));
            }
            for (record, mut row) in chunk.iter_mut().zip(returned) {
                let value = row.take(name).ok_or_else(|| Error::decode(name, "missing generated key"))?;
                column.set_value(record, value)?;
            }
        }
        Ok(())
    }

    /// Update every non-key column of the row matching `record`'s primary
    /// key. Returns the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for views or tables without a primary
    /// key, plus driver errors.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub async fn update_by_primary_key(&self, record: &T, options: &WriteOptions) -> Result<u64> {
        let conn = self.write_conn(options);
        self.update_in(&conn, record, options.cascading).await
    }

    /// Delete the row matching `record`'s primary key. Returns the number of
    /// rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for views or tables without a primary
    /// key, plus driver errors.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    pub async fn delete_by_primary_key(&self, record: &T, options: &WriteOptions) -> Result<u64> {
        let conn = self.write_conn(options);
        self.delete_in(&conn, record, options.cascading).await
    }

    pub(crate) async fn insert_in(&self, conn: &Conn, record: &mut T, cascading: bool) -> Result<()> {
        self.ensure_writable()?;
        let relations = if cascading { conn.database().relations::<T>() } else { Vec::new() };

        // referenced rows first so their keys can be copied onto the record
        for relation in relations.iter().filter(|relation| relation.child_first()) {
            relation.insert(conn, record).await?;
        }
        self.insert_row(conn, record).await?;
        for relation in relations.iter().filter(|relation| !relation.child_first()) {
            relation.insert(conn, record).await?;
        }
        Ok(())
    }

    pub(crate) async fn update_in(&self, conn: &Conn, record: &T, cascading: bool) -> Result<u64> {
        self.ensure_writable()?;
        let dialect = conn.dialect();
        let filter = self.primary_key_filter(record)?;
        let token = dialect.default_value_expression();

        let mut statement = sea_query::Query::update();
        statement.table(self.ident().write_ref());
        let mut assigned = 0;
        for column in self.columns().iter().filter(|column| !column.spec().is_primary_key()) {
            let value = match column.insert_value(record) {
                InsertValue::Value(value) => SimpleExpr::Value(value.into_sea()),
                InsertValue::Default => match token {
                    Some(token) => Expr::cust(token),
                    None => continue,
                },
            };
            statement.value(Alias::new(column.spec().name()), value);
            assigned += 1;
        }

        let mut affected = 0;
        if assigned > 0 {
            statement.and_where(filter.render(&RenderCtx { dialect, root: None }));
            let query = dialect.finish(statement.build(dialect.query_builder()))?;
            tracing::debug!(
                table = self.name(),
                sql = %query.sql,
                param_count = query.params.len(),
                "update by primary key"
            );
            affected = conn.exec(query).await?.rows_affected;
        }

        if cascading {
            for relation in conn.database().relations::<T>() {
                relation.update(conn, record).await?;
            }
        }
        Ok(affected)
    }

    pub(crate) async fn delete_in(&self, conn: &Conn, record: &T, cascading: bool) -> Result<u64> {
        self.ensure_writable()?;
        let dialect = conn.dialect();
        let filter = self.primary_key_filter(record)?;
        let relations = if cascading { conn.database().relations::<T>() } else { Vec::new() };

        // dependants go before the row, referenced rows after it
        for relation in relations.iter().filter(|relation| !relation.child_first()) {
            relation.delete(conn, record).await?;
        }

        let mut statement = sea_query::Query::delete();
        statement
            .from_table(self.ident().write_ref())
            .and_where(filter.render(&RenderCtx { dialect, root: None }));
        let query = dialect.finish(statement.build(dialect.query_builder()))?;
        tracing::debug!(
            table = self.name(),
            sql = %query.sql,
            param_count = query.params.len(),
            "delete by primary key"
        );
        let affected = conn.exec(query).await?.rows_affected;

        for relation in relations.iter().filter(|relation| relation.child_first()) {
            relation.delete(conn, record).await?;
        }
        Ok(affected)
    }

    async fn insert_row(&self, conn: &Conn, record: &mut T) -> Result<()> {
        let dialect = conn.dialect();
        let strategy = dialect.last_insert_id();
        let generated = self.auto_increment().filter(|column| column.is_zero(record));
        if generated.is_some() && strategy == LastInsertId::Unsupported {
            return Err(Error::Unsupported("reading generated keys on this dialect"));
        }

        let mut names = Vec::new();
        let mut row = Vec::new();
        for column in self.columns() {
            if let InsertValue::Value(value) = column.insert_value(record) {
                names.push(column.spec().name());
                row.push(SimpleExpr::Value(value.into_sea()));
            }
        }

        let returning = generated
            .filter(|_| strategy == LastInsertId::Returning)
            .map(|column| column.spec().name());
        let query = insert_query(dialect, self.ident(), &names, vec![row], returning)?;

        match (generated, returning) {
            (Some(column), Some(name)) => {
                let mut rows = conn.query(query).await?;
                let value = rows
                    .first_mut()
                    .and_then(|row| row.take(name))
                    .ok_or_else(|| Error::decode(name, "missing generated key"))?;
                column.set_value(record, value)?;
            }
            (Some(column), None) => {
                let id = conn.exec(query).await?.last_insert_id.ok_or_else(|| {
                    Error::Driver(anyhow::anyhow!("engine did not report a generated id"))
                })?;
                column.set_value(record, Value::Int64(id))?;
            }
            (None, _) => {
                conn.exec(query).await?;
            }
        }
        Ok(())
    }

    /// Every column of `record` as a batch row, or `None` when a default
    /// marker has no token on this dialect.
    fn batch_row(&self, record: &T, token: Option<&'static str>) -> Option<Vec<SimpleExpr>> {
        self.columns()
            .iter()
            .map(|column| match column.insert_value(record) {
                InsertValue::Value(value) => Some(SimpleExpr::Value(value.into_sea())),
                InsertValue::Default => token.map(Expr::cust),
            })
            .collect()
    }

    fn primary_key_filter(&self, record: &T) -> Result<Filter> {
        let predicates: Vec<Filter> = self
            .primary_keys()
            .map(|column| {
                Filter::Eq(Operand::Column(ColumnName::new(column.spec().name())), column.value(record))
            })
            .collect();
        if predicates.is_empty() {
            return Err(Error::Unsupported("writing by primary key on a table without one"));
        }
        Ok(conjunction(predicates))
    }
}
