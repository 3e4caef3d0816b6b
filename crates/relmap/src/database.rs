use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures::Future;
use tracing::Instrument;

use crate::dialect::{Dialect, Query};
use crate::error::{Error, Result};
use crate::executor::{ExecResult, Executor, Row};
use crate::options::Options;
use crate::relation::{Cascade, Relation};
use crate::table::{Descriptor, Record, TableIdent};

/// A database binding: dialect, default executor, options, and the
/// relations registered for cascading writes.
///
/// Tables registered through [`Database::builder`] hold a weak reference
/// back to the database and resolve the dialect from it.
#[derive(Debug)]
pub struct Database {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn Executor>,
    options: Options,
    relations: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Database {
    /// Start binding tables and relations to a dialect and executor.
    #[must_use]
    pub fn builder(
        dialect: impl Dialect, executor: impl Executor,
    ) -> DatabaseBuilder {
        DatabaseBuilder {
            dialect: Arc::new(dialect),
            executor: Arc::new(executor),
            options: Options::default(),
            idents: Vec::new(),
            relations: HashMap::new(),
        }
    }

    /// The dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        &*self.dialect
    }

    /// The default executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Execution context on the default executor, or on `executor` when
    /// given (transactions).
    #[must_use]
    pub fn conn(self: &Arc<Self>, executor: Option<Arc<dyn Executor>>) -> Conn {
        Conn {
            executor: executor.unwrap_or_else(|| Arc::clone(&self.executor)),
            db: Arc::clone(self),
        }
    }

    /// Relations registered with `T` as the parent, in declaration order.
    pub(crate) fn relations<T: Record>(&self) -> Vec<Arc<dyn Cascade<T>>> {
        self.relations
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Vec<Arc<dyn Cascade<T>>>>())
            .cloned()
            .unwrap_or_default()
    }
}

/// Collects tables and relations, then binds them once.
pub struct DatabaseBuilder {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn Executor>,
    options: Options,
    idents: Vec<Arc<TableIdent>>,
    relations: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl DatabaseBuilder {
    /// Replace the default options.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = Options {
            insert_chunk_size: options.insert_chunk_size.max(1),
            ..options
        };
        self
    }

    /// Register a table. Aliased and schema-qualified copies made from it
    /// share the binding.
    #[must_use]
    pub fn table(mut self, descriptor: &impl Descriptor) -> Self {
        self.idents.push(Arc::clone(descriptor.table().ident()));
        self
    }

    /// Register a relation for cascading writes.
    #[must_use]
    pub fn relation<P: Record, C: Record>(mut self, relation: &Relation<P, C>) -> Self {
        let entry = self
            .relations
            .entry(TypeId::of::<P>())
            .or_insert_with(|| Box::new(Vec::<Arc<dyn Cascade<P>>>::new()));
        if let Some(relations) = entry.downcast_mut::<Vec<Arc<dyn Cascade<P>>>>() {
            relations.push(Arc::new(relation.clone()));
        }
        self
    }

    /// Bind every registered table.
    ///
    /// # Panics
    ///
    /// Panics if a table is already bound to another database.
    #[must_use]
    pub fn build(self) -> Arc<Database> {
        let Self {
            dialect,
            executor,
            options,
            idents,
            relations,
        } = self;

        tracing::debug!(dialect = dialect.name(), tables = idents.len(), "binding database");

        Arc::new_cyclic(|weak| {
            for ident in &idents {
                ident.bind(weak.clone());
            }
            Database {
                dialect,
                executor,
                options,
                relations,
            }
        })
    }
}

/// Execution context: a database plus the executor statements run on.
#[derive(Debug, Clone)]
pub struct Conn {
    db: Arc<Database>,
    executor: Arc<dyn Executor>,
}

impl Conn {
    /// The database.
    #[must_use]
    pub const fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.db.dialect()
    }

    /// Runtime options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.db.options
    }

    /// Run a statement returning rows.
    ///
    /// # Errors
    ///
    /// Returns driver errors, [`Error::UniqueViolation`], or
    /// [`Error::Cancelled`] on timeout.
    pub async fn query(&self, query: Query) -> Result<Vec<Row>> {
        let span = tracing::debug_span!("query", dialect = self.dialect().name());
        let rows = self.executor.query(query.sql, query.params);
        self.run(rows).instrument(span).await
    }

    /// Run a statement returning no rows.
    ///
    /// # Errors
    ///
    /// Returns driver errors, [`Error::UniqueViolation`], or
    /// [`Error::Cancelled`] on timeout.
    pub async fn exec(&self, query: Query) -> Result<ExecResult> {
        let span = tracing::debug_span!("exec", dialect = self.dialect().name());
        let result = self.executor.exec(query.sql, query.params);
        self.run(result).instrument(span).await
    }

    async fn run<T>(&self, round_trip: impl Future<Output = anyhow::Result<T>>) -> Result<T> {
        let outcome = match self.db.options.statement_timeout {
            Some(timeout) => tokio::time::timeout(timeout, round_trip).await.map_err(|_elapsed| {
                tracing::warn!(?timeout, "statement cancelled");
                Error::Cancelled
            })?,
            None => round_trip.await,
        };
        outcome.map_err(|err| {
            if self.dialect().is_unique_violation(&err) {
                Error::UniqueViolation(err)
            } else {
                Error::Driver(err)
            }
        })
    }
}
