use std::sync::Arc;

use sea_query::{Alias, Expr, Order, SelectStatement};

use crate::database::Conn;
use crate::dialect::{Dialect, Query};
use crate::eager::EagerLoad;
use crate::error::{Error, Result};
use crate::executor::{Executor, Row};
use crate::filter::{Aggregate, ColumnName, Filter, RenderCtx, table_column};
use crate::join::{Join, JoinKind};
use crate::relation::Relation;
use crate::scan;
use crate::table::{Record, Table};
use crate::value::{ColumnValue, Value};

/// Builder for constructing SELECT queries rooted at a table.
///
/// Nothing is rendered until [`SelectBuilder::to_sql`] or one of the
/// executing methods is called. Unknown column names are reported then as
/// [`Error::InvalidField`].
pub struct SelectBuilder<T> {
    table: Table<T>,
    filters: Vec<Filter>,
    joins: Vec<Join>,
    group_by: Vec<ColumnName>,
    having: Vec<Filter>,
    order: Vec<(ColumnName, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    projection: Option<Vec<usize>>,
    extra_columns: Vec<(ColumnName, String)>,
    eager: Vec<Box<dyn EagerLoad<T>>>,
    fast_scan: bool,
    executor: Option<Arc<dyn Executor>>,
    invalid: Option<String>,
}

impl<T: Record> SelectBuilder<T> {
    pub(crate) fn new(table: Table<T>) -> Self {
        Self {
            table,
            filters: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            projection: None,
            extra_columns: Vec::new(),
            eager: Vec::new(),
            fast_scan: false,
            executor: None,
            invalid: None,
        }
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.validate(&filter);
        self.filters.push(filter);
        self
    }

    /// Adds a JOIN clause to the query.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.validate(join.on());
        self.joins.push(join);
        self
    }

    /// Joins the other side of a relation (and its junction table).
    ///
    /// # Panics
    ///
    /// Panics when the relation does not involve this query's table.
    #[must_use]
    pub fn join_relation<P: Record, C: Record>(mut self, relation: &Relation<P, C>) -> Self {
        let joins = relation.joins(self.table.alias(), JoinKind::Inner);
        self.joins.extend(joins);
        self
    }

    /// Left-joins the other side of a relation.
    ///
    /// # Panics
    ///
    /// Panics when the relation does not involve this query's table.
    #[must_use]
    pub fn left_join_relation<P: Record, C: Record>(mut self, relation: &Relation<P, C>) -> Self {
        let joins = relation.joins(self.table.alias(), JoinKind::Left);
        self.joins.extend(joins);
        self
    }

    /// Adds a GROUP BY column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<ColumnName>) -> Self {
        let column = column.into();
        self.validate_column(&column);
        self.group_by.push(column);
        self
    }

    /// Adds a HAVING condition.
    #[must_use]
    pub fn having(mut self, filter: Filter) -> Self {
        self.validate(&filter);
        self.having.push(filter);
        self
    }

    /// Adds ascending ORDER BY clause.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<ColumnName>) -> Self {
        let column = column.into();
        self.validate_column(&column);
        self.order.push((column, Order::Asc));
        self
    }

    /// Adds descending ORDER BY clause.
    #[must_use]
    pub fn order_by_desc(mut self, column: impl Into<ColumnName>) -> Self {
        let column = column.into();
        self.validate_column(&column);
        self.order.push((column, Order::Desc));
        self
    }

    /// Sets the maximum number of rows to return.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Return distinct rows only.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Fetch only these columns of the root table.
    #[must_use]
    pub fn columns<C: Into<ColumnName>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        let root = self.table.alias().to_string();
        let mut positions = Vec::new();
        for column in columns {
            let column = column.into();
            let position = self
                .table
                .columns()
                .iter()
                .position(|c| c.spec().name() == column.name())
                .filter(|_| column.qualifier().is_none_or(|q| q == root));
            match position {
                Some(position) if !positions.contains(&position) => positions.push(position),
                Some(_) => {}
                None => self.invalidate(column.name()),
            }
        }
        self.projection = Some(positions);
        self
    }

    /// Fetch only these columns, by database or field name.
    #[must_use]
    pub fn columns_by_name(mut self, names: &[&str]) -> Self {
        let mut positions = Vec::new();
        for name in names {
            match self.table.column_by_name(name) {
                Ok(column) => {
                    let position = column.spec().position();
                    if !positions.contains(&position) {
                        positions.push(position);
                    }
                }
                Err(_) => self.invalidate(name),
            }
        }
        self.projection = Some(positions);
        self
    }

    /// Load a relation onto the fetched records.
    #[must_use]
    pub fn eager(mut self, loader: impl EagerLoad<T> + 'static) -> Self {
        self.eager.push(Box::new(loader));
        self
    }

    /// Assign row fields by position. Requires the full projection.
    #[must_use]
    pub const fn fast_scan(mut self) -> Self {
        self.fast_scan = true;
        self
    }

    /// Run on `executor` (a transaction, say) instead of the database's
    /// default executor.
    #[must_use]
    pub fn using(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub(crate) fn extra_column(mut self, column: ColumnName, alias: String) -> Self {
        self.extra_columns.push((column, alias));
        self
    }

    fn validate(&mut self, filter: &Filter) {
        for name in filter.unqualified() {
            self.validate_name(name);
        }
    }

    fn validate_column(&mut self, column: &ColumnName) {
        if column.qualifier().is_none() {
            self.validate_name(column.name());
        }
    }

    fn validate_name(&mut self, name: &str) {
        if !self.table.columns().iter().any(|column| column.spec().name() == name) {
            self.invalidate(name);
        }
    }

    fn invalidate(&mut self, field: &str) {
        if self.invalid.is_none() {
            self.invalid = Some(field.to_string());
        }
    }

    fn check_valid(&self) -> Result<()> {
        self.invalid.as_ref().map_or(Ok(()), |field| {
            Err(Error::InvalidField {
                table: self.table.name().to_string(),
                field: field.clone(),
            })
        })
    }

    /// Every qualified column must belong to the root table or a joined table.
    fn check_scope(&self) {
        let root = self.table.alias();
        let joined: Vec<&str> = self.joins.iter().map(Join::qualifier).collect();
        let check = |column: &ColumnName| {
            if let Some(qualifier) = column.qualifier()
                && qualifier != root
                && !joined.contains(&qualifier)
            {
                panic!(
                    "column `{qualifier}.{}` references a table that is not part of the query on `{root}`",
                    column.name()
                );
            }
        };

        let filters = self.table.fixed_filter().into_iter().chain(&self.filters).chain(&self.having);
        for filter in filters.chain(self.joins.iter().map(Join::on)) {
            filter.for_each_column(&mut |column| check(column));
        }
        for column in self.group_by.iter().chain(self.order.iter().map(|(c, _)| c)) {
            check(column);
        }
        for (column, _) in &self.extra_columns {
            check(column);
        }
    }

    fn positions(&self) -> Vec<usize> {
        self.projection.clone().unwrap_or_else(|| (0..self.table.columns().len()).collect())
    }

    /// FROM, joins, conditions, grouping, and DISTINCT.
    fn base(&self, ctx: &RenderCtx<'_>) -> SelectStatement {
        self.check_scope();
        let mut statement = sea_query::Query::select();
        statement.from(self.table.ident().table_ref());

        for join in &self.joins {
            statement.join(join.kind.into_join_type(), join.table.table_ref(), join.on.render(ctx));
        }
        for filter in self.table.fixed_filter().into_iter().chain(&self.filters) {
            statement.and_where(filter.render(ctx));
        }
        if !self.group_by.is_empty() {
            statement.add_group_by(self.group_by.iter().map(|column| column.render(ctx)).collect::<Vec<_>>());
        }
        for filter in &self.having {
            statement.and_having(filter.render(ctx));
        }
        if self.distinct {
            statement.distinct();
        }
        statement
    }

    fn project(&self, statement: &mut SelectStatement, ctx: &RenderCtx<'_>) {
        let root = self.table.alias();
        for position in self.positions() {
            statement.column(table_column(root, self.table.columns()[position].spec().name()));
        }
        for (column, alias) in &self.extra_columns {
            statement.expr_as(column.render(ctx), Alias::new(alias.as_str()));
        }
    }

    fn paginate(&self, statement: &mut SelectStatement) {
        if let Some(limit) = self.limit {
            statement.limit(limit);
        }
        if let Some(offset) = self.offset {
            statement.offset(offset);
        }
    }

    fn statement(&self, ctx: &RenderCtx<'_>) -> SelectStatement {
        let mut statement = self.base(ctx);
        self.project(&mut statement, ctx);
        for (column, order) in &self.order {
            statement.order_by_expr(column.render(ctx), order.clone());
        }
        self.paginate(&mut statement);
        statement
    }

    fn finish(&self, dialect: &dyn Dialect, statement: &SelectStatement) -> Result<Query> {
        let query = dialect.finish(statement.build(dialect.query_builder()))?;
        tracing::debug!(
            table = self.table.name(),
            sql = %query.sql,
            param_count = query.params.len(),
            "SelectBuilder generated SQL"
        );
        Ok(query)
    }

    fn ctx<'a>(&'a self, dialect: &'a dyn Dialect) -> RenderCtx<'a> {
        RenderCtx {
            dialect,
            root: Some(self.table.alias()),
        }
    }

    /// Render the SELECT statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] for unknown columns, or an error if a
    /// value cannot be converted.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database, or a column
    /// references a table that is not part of the query.
    pub fn to_sql(&self) -> Result<Query> {
        self.check_valid()?;
        let database = self.table.ident().database();
        let dialect = database.dialect();
        self.finish(dialect, &self.statement(&self.ctx(dialect)))
    }

    fn conn(&self) -> Conn {
        self.table.ident().database().conn(self.executor.clone())
    }

    /// Fetch matching records, then run eager loaders over them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for a fast scan of a partial
    /// projection, plus driver and decode errors.
    pub async fn fetch(self) -> Result<Vec<T>> {
        let conn = self.conn();
        self.fetch_in(&conn).await
    }

    pub(crate) async fn fetch_in(mut self, conn: &Conn) -> Result<Vec<T>> {
        let eager = std::mem::take(&mut self.eager);
        let mut records: Vec<T> = self.fetch_rows_in(conn).await?.into_iter().map(|(record, _)| record).collect();
        for loader in &eager {
            loader.load(conn, &mut records).await?;
        }
        Ok(records)
    }

    /// Records paired with whatever row fields the scan left unconsumed.
    pub(crate) async fn fetch_rows_in(self, conn: &Conn) -> Result<Vec<(T, Row)>> {
        self.check_valid()?;
        let positions = self.positions();
        let partial = positions.len() < self.table.columns().len() || !self.extra_columns.is_empty();
        if self.fast_scan && partial {
            return Err(Error::Unsupported("fast scan of a partial projection"));
        }

        let dialect = conn.dialect();
        let query = self.finish(dialect, &self.statement(&self.ctx(dialect)))?;
        let rows = conn.query(query).await?;

        rows.into_iter()
            .map(|mut row| {
                let record = if self.fast_scan {
                    scan::fast_scan(&self.table, &mut row)?
                } else {
                    scan::scan(&self.table, &positions, &mut row)?
                };
                Ok::<_, Error>((record, row))
            })
            .collect()
    }

    /// Fetch exactly one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for no rows and [`Error::NotSingular`]
    /// when more than one row matches.
    pub async fn fetch_one(mut self) -> Result<T> {
        self.limit = Some(self.limit.map_or(2, |limit| limit.min(2)));
        let records = self.fetch().await?;
        match records.len() {
            1 => records.into_iter().next().ok_or(Error::NotFound),
            0 => Err(Error::NotFound),
            n => Err(Error::NotSingular(n)),
        }
    }

    /// Fetch at most one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSingular`] when more than one row matches.
    pub async fn fetch_optional(self) -> Result<Option<T>> {
        match self.fetch_one().await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Number of matching rows. Grouped, distinct, and paginated queries
    /// are counted through a subquery.
    ///
    /// # Errors
    ///
    /// Returns driver and decode errors.
    pub async fn count(self) -> Result<u64> {
        self.check_valid()?;
        let conn = self.conn();
        let dialect = conn.dialect();
        let ctx = self.ctx(dialect);
        let count = Aggregate::count_all().render(&ctx);

        let wrap = !self.group_by.is_empty() || self.distinct || self.limit.is_some() || self.offset.is_some();
        let statement = if wrap {
            let mut inner = self.base(&ctx);
            if self.group_by.is_empty() {
                self.project(&mut inner, &ctx);
            } else {
                for column in &self.group_by {
                    inner.expr(column.render(&ctx));
                }
            }
            self.paginate(&mut inner);
            let mut outer = sea_query::Query::select();
            outer.expr_as(count, Alias::new("count")).from_subquery(inner, Alias::new("counted"));
            outer
        } else {
            let mut statement = self.base(&ctx);
            statement.expr_as(count, Alias::new("count"));
            statement
        };

        let query = self.finish(dialect, &statement)?;
        let value = first_value(conn.query(query).await?);
        u64::from_value(value).map_err(|err| Error::decode("count", err))
    }

    /// Whether any row matches.
    ///
    /// # Errors
    ///
    /// Returns driver errors.
    pub async fn exists(self) -> Result<bool> {
        self.check_valid()?;
        let conn = self.conn();
        let dialect = conn.dialect();
        let ctx = self.ctx(dialect);

        let mut statement = self.base(&ctx);
        statement.expr(Expr::cust("1")).limit(1);
        if let Some(offset) = self.offset {
            statement.offset(offset);
        }

        let query = self.finish(dialect, &statement)?;
        Ok(!conn.query(query).await?.is_empty())
    }

    /// A single aggregate over the matching rows (the first group when
    /// grouped). `NULL` for an empty result.
    ///
    /// # Errors
    ///
    /// Returns driver errors.
    pub async fn aggregate(mut self, aggregate: Aggregate) -> Result<Value> {
        if let Some(column) = &aggregate.column {
            self.validate_column(column);
        }
        self.check_valid()?;
        let conn = self.conn();
        let dialect = conn.dialect();
        let ctx = self.ctx(dialect);

        let mut statement = self.base(&ctx);
        statement.expr_as(aggregate.render(&ctx), Alias::new("value"));

        let query = self.finish(dialect, &statement)?;
        Ok(first_value(conn.query(query).await?))
    }

    /// Group columns plus named aggregates, one row per group.
    ///
    /// # Errors
    ///
    /// Returns driver errors.
    pub async fn grouped(
        mut self, aggregates: impl IntoIterator<Item = (&'static str, Aggregate)>,
    ) -> Result<Vec<Row>> {
        let aggregates: Vec<_> = aggregates.into_iter().collect();
        for (_, aggregate) in &aggregates {
            if let Some(column) = &aggregate.column {
                self.validate_column(column);
            }
        }
        self.check_valid()?;
        let conn = self.conn();
        let dialect = conn.dialect();
        let ctx = self.ctx(dialect);

        let mut statement = self.base(&ctx);
        for column in &self.group_by {
            statement.expr_as(column.render(&ctx), Alias::new(column.name()));
        }
        for (alias, aggregate) in &aggregates {
            statement.expr_as(aggregate.render(&ctx), Alias::new(*alias));
        }
        for (column, order) in &self.order {
            statement.order_by_expr(column.render(&ctx), order.clone());
        }
        self.paginate(&mut statement);

        let query = self.finish(dialect, &statement)?;
        conn.query(query).await
    }
}

fn first_value(rows: Vec<Row>) -> Value {
    rows.into_iter()
        .next()
        .and_then(|row| row.fields.into_iter().next())
        .map(|field| field.value)
        .unwrap_or_default()
}
