use std::sync::Arc;

use sea_query::{Alias, ColumnRef, Expr, ExprTrait, IntoIden, SimpleExpr};

use crate::dialect::{AggregateFn, Dialect};
use crate::value::Value;

/// A column reference inside a predicate.
///
/// Unqualified names resolve against the statement's root table when the
/// filter is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName {
    pub(crate) qualifier: Option<Arc<str>>,
    pub(crate) name: &'static str,
}

impl ColumnName {
    /// A column resolved against the statement's root table.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            qualifier: None,
            name,
        }
    }

    /// A column qualified by a table alias.
    #[must_use]
    pub fn qualified(qualifier: impl Into<Arc<str>>, name: &'static str) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name,
        }
    }

    /// The database column name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The table alias, when qualified.
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub(crate) fn render(&self, ctx: &RenderCtx<'_>) -> SimpleExpr {
        match ctx.root {
            None => Expr::col(Alias::new(self.name)).into(),
            Some(root) => {
                Expr::col(table_column(self.qualifier.as_deref().unwrap_or(root), self.name))
                    .into()
            }
        }
    }
}

/// An aggregate over a column (or `*`), usable in projections and `HAVING`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub(crate) func: AggregateFn,
    pub(crate) column: Option<ColumnName>,
}

impl Aggregate {
    /// `COUNT(*)`
    #[must_use]
    pub const fn count_all() -> Self {
        Self {
            func: AggregateFn::Count,
            column: None,
        }
    }

    pub(crate) const fn over(func: AggregateFn, column: ColumnName) -> Self {
        Self {
            func,
            column: Some(column),
        }
    }

    pub(crate) fn render(&self, ctx: &RenderCtx<'_>) -> SimpleExpr {
        let body = self.column.as_ref().map_or_else(|| Expr::cust("*"), |c| c.render(ctx));
        ctx.dialect.aggregate(self.func, body)
    }

    /// `aggregate = value`
    #[must_use]
    pub fn eq(self, val: impl Into<Value>) -> Filter {
        Filter::Eq(Operand::Aggregate(self), val.into())
    }

    /// `aggregate <> value`
    #[must_use]
    pub fn ne(self, val: impl Into<Value>) -> Filter {
        Filter::Ne(Operand::Aggregate(self), val.into())
    }

    /// `aggregate > value`
    #[must_use]
    pub fn gt(self, val: impl Into<Value>) -> Filter {
        Filter::Gt(Operand::Aggregate(self), val.into())
    }

    /// `aggregate >= value`
    #[must_use]
    pub fn gte(self, val: impl Into<Value>) -> Filter {
        Filter::Gte(Operand::Aggregate(self), val.into())
    }

    /// `aggregate < value`
    #[must_use]
    pub fn lt(self, val: impl Into<Value>) -> Filter {
        Filter::Lt(Operand::Aggregate(self), val.into())
    }

    /// `aggregate <= value`
    #[must_use]
    pub fn lte(self, val: impl Into<Value>) -> Filter {
        Filter::Lte(Operand::Aggregate(self), val.into())
    }
}

/// Left-hand side of a value comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A column.
    Column(ColumnName),
    /// An aggregate (only meaningful in `HAVING`).
    Aggregate(Aggregate),
}

impl Operand {
    fn render(&self, ctx: &RenderCtx<'_>) -> SimpleExpr {
        match self {
            Self::Column(column) => column.render(ctx),
            Self::Aggregate(aggregate) => aggregate.render(ctx),
        }
    }

    const fn column(&self) -> Option<&ColumnName> {
        match self {
            Self::Column(column) => Some(column),
            Self::Aggregate(aggregate) => aggregate.column.as_ref(),
        }
    }

    const fn column_mut(&mut self) -> Option<&mut ColumnName> {
        match self {
            Self::Column(column) => Some(column),
            Self::Aggregate(aggregate) => aggregate.column.as_mut(),
        }
    }
}

impl From<ColumnName> for Operand {
    fn from(column: ColumnName) -> Self {
        Self::Column(column)
    }
}

/// Rendering context: the dialect plus the alias unqualified columns resolve
/// to. Without a root, every column renders unqualified (mutations).
#[derive(Clone, Copy)]
pub(crate) struct RenderCtx<'a> {
    pub dialect: &'a dyn Dialect,
    pub root: Option<&'a str>,
}

/// Database predicates, built before any database is attached and rendered
/// once the dialect is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// operand = value
    Eq(Operand, Value),
    /// operand <> value
    Ne(Operand, Value),
    /// operand > value
    Gt(Operand, Value),
    /// operand >= value
    Gte(Operand, Value),
    /// operand < value
    Lt(Operand, Value),
    /// operand <= value
    Lte(Operand, Value),
    /// operand IN (values)
    In(Operand, Vec<Value>),
    /// operand NOT IN (values)
    NotIn(Operand, Vec<Value>),
    /// operand IS NULL
    IsNull(Operand),
    /// operand IS NOT NULL
    IsNotNull(Operand),
    /// operand LIKE pattern
    Like(Operand, String),
    /// operand NOT LIKE pattern
    NotLike(Operand, String),
    /// operand BETWEEN low AND high
    Between(Operand, Value, Value),
    /// operand NOT BETWEEN low AND high
    NotBetween(Operand, Value, Value),
    /// Scalar operand equals any of the values.
    Any(Operand, Vec<Value>),
    /// Array operand equals the array of values.
    ArrayEq(Operand, Vec<Value>),
    /// Array operand contains every value.
    ArrayContains(Operand, Vec<Value>),
    /// Every element of the array operand is among the values.
    ArrayContainedBy(Operand, Vec<Value>),
    /// Array operand shares at least one element with the values.
    ArrayHasAny(Operand, Vec<Value>),
    /// Column-to-column comparison: left = right
    ColEq(ColumnName, ColumnName),
    /// Column-to-column comparison: left <> right
    ColNe(ColumnName, ColumnName),
    /// Column-to-column comparison: left > right
    ColGt(ColumnName, ColumnName),
    /// Column-to-column comparison: left >= right
    ColGte(ColumnName, ColumnName),
    /// Column-to-column comparison: left < right
    ColLt(ColumnName, ColumnName),
    /// Column-to-column comparison: left <= right
    ColLte(ColumnName, ColumnName),
    /// Two array columns hold equal arrays.
    ColArrayEq(ColumnName, ColumnName),
    /// Array column (first) contains the scalar column (second).
    ColArrayContains(ColumnName, ColumnName),
    /// Logical AND of multiple filters
    And(Vec<Self>),
    /// Logical OR of multiple filters
    Or(Vec<Self>),
    /// Logical NOT of a filter
    Not(Box<Self>),
}

impl Filter {
    /// Convert to a ``SeaQuery`` expression.
    pub(crate) fn render(&self, ctx: &RenderCtx<'_>) -> SimpleExpr {
        let dialect = ctx.dialect;
        let value = |v: &Value| SimpleExpr::Value(v.clone().into_sea());
        let array = |vals: &[Value]| SimpleExpr::Value(Value::Array(vals.to_vec()).into_sea());
        let values = |vals: &[Value]| vals.iter().map(|v| v.clone().into_sea()).collect::<Vec<_>>();

        match self {
            Self::Eq(op, val) => dialect.eq(op.render(ctx), value(val)),
            Self::Ne(op, val) => dialect.ne(op.render(ctx), value(val)),
            Self::Gt(op, val) => dialect.gt(op.render(ctx), value(val)),
            Self::Gte(op, val) => dialect.gte(op.render(ctx), value(val)),
            Self::Lt(op, val) => dialect.lt(op.render(ctx), value(val)),
            Self::Lte(op, val) => dialect.lte(op.render(ctx), value(val)),
            Self::In(op, vals) => op.render(ctx).is_in(values(vals)),
            Self::NotIn(op, vals) => op.render(ctx).is_not_in(values(vals)),
            Self::IsNull(op) => op.render(ctx).is_null(),
            Self::IsNotNull(op) => op.render(ctx).is_not_null(),
            Self::Like(op, pattern) => dialect.like(op.render(ctx), pattern.clone()),
            Self::NotLike(op, pattern) => op.render(ctx).not_like(pattern.clone()),
            Self::Between(op, low, high) => dialect.between(op.render(ctx), value(low), value(high)),
            Self::NotBetween(op, low, high) => {
                op.render(ctx).not_between(value(low), value(high))
            }
            Self::Any(op, vals) => dialect.array_any(op.render(ctx), array(vals)),
            Self::ArrayEq(op, vals) => dialect.array_eq(op.render(ctx), array(vals)),
            Self::ArrayContains(op, vals) => dialect.array_contains(op.render(ctx), array(vals)),
            Self::ArrayContainedBy(op, vals) => {
                dialect.array_contained_by(op.render(ctx), array(vals))
            }
            Self::ArrayHasAny(op, vals) => dialect.array_has_any(op.render(ctx), array(vals)),
            Self::ColEq(left, right) => dialect.eq(left.render(ctx), right.render(ctx)),
            Self::ColNe(left, right) => dialect.ne(left.render(ctx), right.render(ctx)),
            Self::ColGt(left, right) => dialect.gt(left.render(ctx), right.render(ctx)),
            Self::ColGte(left, right) => dialect.gte(left.render(ctx), right.render(ctx)),
            Self::ColLt(left, right) => dialect.lt(left.render(ctx), right.render(ctx)),
            Self::ColLte(left, right) => dialect.lte(left.render(ctx), right.render(ctx)),
            Self::ColArrayEq(left, right) => dialect.array_eq(left.render(ctx), right.render(ctx)),
            Self::ColArrayContains(array, scalar) => {
                dialect.array_contains_column(array.render(ctx), scalar.render(ctx))
            }
            Self::And(filters) => {
                let mut exprs = filters.iter().map(|f| f.render(ctx));
                exprs.next().map_or_else(
                    || Expr::value(true), // no filters, so all conditions satisfied, hence `true`
                    |first| exprs.fold(first, SimpleExpr::and),
                )
            }
            Self::Or(filters) => {
                let mut exprs = filters.iter().map(|f| f.render(ctx));
                exprs.next().map_or_else(
                    || Expr::value(false), // no filters, so 0 conditions satisfied, hence `false`
                    |first| exprs.fold(first, SimpleExpr::or),
                )
            }
            Self::Not(filter) => Expr::expr(filter.render(ctx)).not(),
        }
    }

    /// Combine with another filter using AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combine with another filter using OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negate this filter.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Visit every column reference.
    pub(crate) fn for_each_column(&self, f: &mut impl FnMut(&ColumnName)) {
        match self {
            Self::Eq(op, _)
            | Self::Ne(op, _)
            | Self::Gt(op, _)
            | Self::Gte(op, _)
            | Self::Lt(op, _)
            | Self::Lte(op, _)
            | Self::In(op, _)
            | Self::NotIn(op, _)
            | Self::IsNull(op)
            | Self::IsNotNull(op)
            | Self::Like(op, _)
            | Self::NotLike(op, _)
            | Self::Between(op, _, _)
            | Self::NotBetween(op, _, _)
            | Self::Any(op, _)
            | Self::ArrayEq(op, _)
            | Self::ArrayContains(op, _)
            | Self::ArrayContainedBy(op, _)
            | Self::ArrayHasAny(op, _) => {
                if let Some(column) = op.column() {
                    f(column);
                }
            }
            Self::ColEq(left, right)
            | Self::ColNe(left, right)
            | Self::ColGt(left, right)
            | Self::ColGte(left, right)
            | Self::ColLt(left, right)
            | Self::ColLte(left, right)
            | Self::ColArrayEq(left, right)
            | Self::ColArrayContains(left, right) => {
                f(left);
                f(right);
            }
            Self::And(filters) | Self::Or(filters) => {
                for filter in filters {
                    filter.for_each_column(f);
                }
            }
            Self::Not(filter) => filter.for_each_column(f),
        }
    }

    fn for_each_column_mut(&mut self, f: &mut impl FnMut(&mut ColumnName)) {
        match self {
            Self::Eq(op, _)
            | Self::Ne(op, _)
            | Self::Gt(op, _)
            | Self::Gte(op, _)
            | Self::Lt(op, _)
            | Self::Lte(op, _)
            | Self::In(op, _)
            | Self::NotIn(op, _)
            | Self::IsNull(op)
            | Self::IsNotNull(op)
            | Self::Like(op, _)
            | Self::NotLike(op, _)
            | Self::Between(op, _, _)
            | Self::NotBetween(op, _, _)
            | Self::Any(op, _)
            | Self::ArrayEq(op, _)
            | Self::ArrayContains(op, _)
            | Self::ArrayContainedBy(op, _)
            | Self::ArrayHasAny(op, _) => {
                if let Some(column) = op.column_mut() {
                    f(column);
                }
            }
            Self::ColEq(left, right)
            | Self::ColNe(left, right)
            | Self::ColGt(left, right)
            | Self::ColGte(left, right)
            | Self::ColLt(left, right)
            | Self::ColLte(left, right)
            | Self::ColArrayEq(left, right)
            | Self::ColArrayContains(left, right) => {
                f(left);
                f(right);
            }
            Self::And(filters) | Self::Or(filters) => {
                for filter in filters {
                    filter.for_each_column_mut(f);
                }
            }
            Self::Not(filter) => filter.for_each_column_mut(f),
        }
    }

    /// Move columns qualified by `from` to the alias `to`.
    pub(crate) fn requalify(&mut self, from: &str, to: &Arc<str>) {
        self.for_each_column_mut(&mut |column| {
            if column.qualifier.as_deref() == Some(from) {
                column.qualifier = Some(Arc::clone(to));
            }
        });
    }

    /// Resolve unqualified columns to `alias`.
    pub(crate) fn qualify(&mut self, alias: &Arc<str>) {
        self.for_each_column_mut(&mut |column| {
            if column.qualifier.is_none() {
                column.qualifier = Some(Arc::clone(alias));
            }
        });
    }

    /// Names of unqualified columns, validated against the root table.
    pub(crate) fn unqualified(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        self.for_each_column(&mut |column| {
            if column.qualifier.is_none() {
                names.push(column.name);
            }
        });
        names
    }

    // Convenience constructors for common single-table queries

    /// Creates an equality filter (column = value).
    #[must_use]
    pub fn eq(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Eq(ColumnName::new(col).into(), val.into())
    }

    /// Creates an inequality filter (column <> value).
    #[must_use]
    pub fn ne(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Ne(ColumnName::new(col).into(), val.into())
    }

    /// Creates a greater-than filter (column > value).
    #[must_use]
    pub fn gt(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Gt(ColumnName::new(col).into(), val.into())
    }

    /// Creates a greater-than-or-equal filter (column >= value).
    #[must_use]
    pub fn gte(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Gte(ColumnName::new(col).into(), val.into())
    }

    /// Creates a less-than filter (column < value).
    #[must_use]
    pub fn lt(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Lt(ColumnName::new(col).into(), val.into())
    }

    /// Creates a less-than-or-equal filter (column <= value).
    #[must_use]
    pub fn lte(col: &'static str, val: impl Into<Value>) -> Self {
        Self::Lte(ColumnName::new(col).into(), val.into())
    }

    /// Creates an IN filter (column IN (values)).
    #[must_use]
    pub fn is_in(col: &'static str, vals: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(ColumnName::new(col).into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates a NOT IN filter (column NOT IN (values)).
    #[must_use]
    pub fn not_in(col: &'static str, vals: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::NotIn(ColumnName::new(col).into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates an IS NULL filter.
    #[must_use]
    pub fn is_null(col: &'static str) -> Self {
        Self::IsNull(ColumnName::new(col).into())
    }

    /// Creates an IS NOT NULL filter.
    #[must_use]
    pub fn is_not_null(col: &'static str) -> Self {
        Self::IsNotNull(ColumnName::new(col).into())
    }

    /// Creates a LIKE filter with pattern matching.
    #[must_use]
    pub fn like(col: &'static str, pattern: impl Into<String>) -> Self {
        Self::Like(ColumnName::new(col).into(), pattern.into())
    }

    /// Creates a NOT LIKE filter with pattern matching.
    #[must_use]
    pub fn not_like(col: &'static str, pattern: impl Into<String>) -> Self {
        Self::NotLike(ColumnName::new(col).into(), pattern.into())
    }

    /// Creates a BETWEEN filter (column BETWEEN low AND high).
    #[must_use]
    pub fn between(col: &'static str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(ColumnName::new(col).into(), low.into(), high.into())
    }

    /// Creates a NOT BETWEEN filter.
    #[must_use]
    pub fn not_between(col: &'static str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::NotBetween(ColumnName::new(col).into(), low.into(), high.into())
    }

    /// Creates an ANY filter (column = ANY(values)).
    #[must_use]
    pub fn any(col: &'static str, vals: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::Any(ColumnName::new(col).into(), vals.into_iter().map(Into::into).collect())
    }

    // Table-qualified variants for joined queries

    /// Creates a table-qualified equality filter (table.column = value).
    #[must_use]
    pub fn table_eq(table: &'static str, col: &'static str, val: impl Into<Value>) -> Self {
        Self::Eq(ColumnName::qualified(table, col).into(), val.into())
    }

    /// Creates a table-qualified inequality filter (table.column <> value).
    #[must_use]
    pub fn table_ne(table: &'static str, col: &'static str, val: impl Into<Value>) -> Self {
        Self::Ne(ColumnName::qualified(table, col).into(), val.into())
    }

    /// Creates a table-qualified IN filter (table.column IN (values)).
    #[must_use]
    pub fn table_in(
        table: &'static str, col: &'static str, vals: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self::In(ColumnName::qualified(table, col).into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates a table-qualified IS NULL filter (table.column IS NULL).
    #[must_use]
    pub fn table_is_null(table: &'static str, col: &'static str) -> Self {
        Self::IsNull(ColumnName::qualified(table, col).into())
    }

    /// Compare two columns for equality.
    /// Table names are required since we're comparing columns from different tables.
    #[must_use]
    pub fn col_eq(
        table1: &'static str, col1: &'static str, table2: &'static str, col2: &'static str,
    ) -> Self {
        Self::ColEq(ColumnName::qualified(table1, col1), ColumnName::qualified(table2, col2))
    }

    /// Creates a column-to-column inequality filter (table1.col1 <> table2.col2).
    #[must_use]
    pub fn col_ne(
        table1: &'static str, col1: &'static str, table2: &'static str, col2: &'static str,
    ) -> Self {
        Self::ColNe(ColumnName::qualified(table1, col1), ColumnName::qualified(table2, col2))
    }

    /// Creates a column-to-column less-than filter (table1.col1 < table2.col2).
    #[must_use]
    pub fn col_lt(
        table1: &'static str, col1: &'static str, table2: &'static str, col2: &'static str,
    ) -> Self {
        Self::ColLt(ColumnName::qualified(table1, col1), ColumnName::qualified(table2, col2))
    }
}

pub(crate) fn table_column(table: &str, column: &str) -> ColumnRef {
    ColumnRef::TableColumn(Alias::new(table).into_iden(), Alias::new(column).into_iden())
}
