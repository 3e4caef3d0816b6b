//! Per-database SQL emission.
//!
//! Statements are assembled with ``SeaQuery`` through a single configurable
//! backend ([`QueryBuilder`]); a [`Dialect`] supplies the quote and
//! placeholder style for that backend plus the handful of constructs that
//! differ between engines (array predicates, aggregates, auto-increment key
//! retrieval, value serialization).

use std::fmt::Debug;

use anyhow::Result;
use sea_query::backend::{
    EscapeBuilder, OperLeftAssocDecider, PrecedenceDecider, QuotedBuilder, TableRefBuilder,
};
use sea_query::prepare::SqlWriter;
use sea_query::{BinOper, Expr, ExprTrait, Func, Oper, Quote, SimpleExpr, SubQueryStatement, Values};

use crate::value::Value;

/// A rendered statement, ready for an [`Executor`](crate::Executor).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SQL text with dialect placeholders.
    pub sql: String,
    /// Bound parameters, already serialized by [`Dialect::bind_value`].
    pub params: Vec<Value>,
}

/// How a dialect reports auto-generated primary keys after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastInsertId {
    /// The execution result carries the generated id.
    ByResult,
    /// The statement needs a `RETURNING` suffix.
    Returning,
    /// The engine cannot report generated ids.
    Unsupported,
}

/// Aggregate functions usable in projections and `HAVING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    /// `COUNT`
    Count,
    /// `COUNT(DISTINCT ..)`
    CountDistinct,
    /// `SUM`
    Sum,
    /// `AVG`
    Avg,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
}

/// Per-database SQL emission differences.
///
/// Expression methods receive already-rendered operands and return the
/// combined expression; the defaults emit portable SQL.
pub trait Dialect: Debug + Send + Sync + 'static {
    /// Dialect name, used in logs.
    fn name(&self) -> &'static str;

    /// The ``SeaQuery`` backend configured for this dialect.
    fn query_builder(&self) -> QueryBuilder;

    /// Quote an identifier, escaping embedded quote characters.
    fn quote_identifier(&self, ident: &str) -> String {
        let quote = self.query_builder().quote;
        let (open, close) = (quote.left(), quote.right());
        let escaped = ident.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    /// `left = right`
    fn eq(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.eq(right)
    }

    /// `left <> right`
    fn ne(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.ne(right)
    }

    /// `left > right`
    fn gt(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.gt(right)
    }

    /// `left >= right`
    fn gte(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.gte(right)
    }

    /// `left < right`
    fn lt(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.lt(right)
    }

    /// `left <= right`
    fn lte(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        left.lte(right)
    }

    /// `left LIKE pattern`
    fn like(&self, left: SimpleExpr, pattern: String) -> SimpleExpr {
        left.like(pattern)
    }

    /// `left BETWEEN low AND high`
    fn between(&self, left: SimpleExpr, low: SimpleExpr, high: SimpleExpr) -> SimpleExpr {
        left.between(low, high)
    }

    /// Wrap `body` in an aggregate function.
    fn aggregate(&self, func: AggregateFn, body: SimpleExpr) -> SimpleExpr {
        match func {
            AggregateFn::Count => Func::count(body).into(),
            AggregateFn::CountDistinct => Func::count_distinct(body).into(),
            AggregateFn::Sum => Func::sum(body).into(),
            AggregateFn::Avg => Func::avg(body).into(),
            AggregateFn::Min => Func::min(body).into(),
            AggregateFn::Max => Func::max(body).into(),
        }
    }

    /// Both arrays hold the same elements in the same order.
    fn array_eq(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr;

    /// `array` contains every element of `elements`.
    fn array_contains(&self, array: SimpleExpr, elements: SimpleExpr) -> SimpleExpr;

    /// Every element of `array` is in `container`.
    fn array_contained_by(&self, array: SimpleExpr, container: SimpleExpr) -> SimpleExpr {
        self.array_contains(container, array)
    }

    /// The arrays share at least one element.
    fn array_has_any(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr;

    /// The scalar equals some element of `array`.
    fn array_any(&self, scalar: SimpleExpr, array: SimpleExpr) -> SimpleExpr;

    /// Column-to-column form of [`Dialect::array_any`], used by joins where
    /// an array key column references a scalar key column.
    fn array_contains_column(&self, array: SimpleExpr, scalar: SimpleExpr) -> SimpleExpr {
        self.array_any(scalar, array)
    }

    /// Strategy for reading auto-generated primary keys.
    fn last_insert_id(&self) -> LastInsertId;

    /// Token that makes a column take its default inside `VALUES (..)`, if the
    /// engine has one.
    fn default_value_expression(&self) -> Option<&'static str> {
        Some("DEFAULT")
    }

    /// Clause completing `INSERT INTO t` when no column is given a value.
    fn default_values_clause(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// Whether `INSERT .. ON CONFLICT` is available.
    fn supports_on_conflict(&self) -> bool {
        true
    }

    /// Serialize a parameter into the shape the engine stores.
    fn bind_value(&self, value: Value) -> Value {
        value
    }

    /// Whether a driver error is a unique-constraint violation.
    fn is_unique_violation(&self, err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            let message = cause.to_string();
            message.contains("UNIQUE constraint failed")
                || message.contains("duplicate key value violates unique constraint")
                || message.contains("Duplicate entry")
        })
    }

    /// Render a built statement, serializing its values for this engine.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be converted.
    fn finish(&self, (sql, values): (String, Values)) -> Result<Query> {
        let params = values
            .into_iter()
            .map(|value| Value::from_sea(value).map(|value| self.bind_value(value)))
            .collect::<Result<_>>()?;
        Ok(Query { sql, params })
    }
}

/// PostgreSQL: native arrays, `$N` placeholders, `RETURNING` ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::default()
    }

    fn array_eq(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("$1 = $2", [left, right])
    }

    fn array_contains(&self, array: SimpleExpr, elements: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("$1 @> $2", [array, elements])
    }

    fn array_contained_by(&self, array: SimpleExpr, container: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("$1 <@ $2", [array, container])
    }

    fn array_has_any(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("$1 && $2", [left, right])
    }

    fn array_any(&self, scalar: SimpleExpr, array: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("$1 = ANY($2)", [scalar, array])
    }

    fn last_insert_id(&self) -> LastInsertId {
        LastInsertId::Returning
    }
}

/// SQLite: arrays and JSON stored as JSON text, `?` placeholders, ids from
/// the execution result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn query_builder(&self) -> QueryBuilder {
        QueryBuilder {
            quote: Quote::new(b'"'),
            placeholder: "?",
            numbered: false,
        }
    }

    fn array_eq(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("json(?) = json(?)", [left, right])
    }

    fn array_contains(&self, array: SimpleExpr, elements: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs(
            "NOT EXISTS (SELECT 1 FROM json_each(?) AS e WHERE e.value NOT IN (SELECT a.value \
             FROM json_each(?) AS a))",
            [elements, array],
        )
    }

    fn array_has_any(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs(
            "EXISTS (SELECT 1 FROM json_each(?) AS l WHERE l.value IN (SELECT r.value FROM \
             json_each(?) AS r))",
            [left, right],
        )
    }

    fn array_any(&self, scalar: SimpleExpr, array: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("? IN (SELECT value FROM json_each(?))", [scalar, array])
    }

    fn last_insert_id(&self) -> LastInsertId {
        LastInsertId::ByResult
    }

    fn default_value_expression(&self) -> Option<&'static str> {
        None
    }

    fn bind_value(&self, value: Value) -> Value {
        match value {
            Value::Array(_) | Value::Json(_) => Value::Str(value.to_json().to_string()),
            Value::Timestamp(ts) => Value::Str(ts.to_rfc3339()),
            Value::Date(date) => Value::Str(date.to_string()),
            Value::Time(time) => Value::Str(time.to_string()),
            other => other,
        }
    }
}

/// MySQL: arrays stored as JSON documents, backtick quoting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn query_builder(&self) -> QueryBuilder {
        QueryBuilder {
            quote: Quote::new(b'`'),
            placeholder: "?",
            numbered: false,
        }
    }

    fn array_eq(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("CAST(? AS JSON) = CAST(? AS JSON)", [left, right])
    }

    fn array_contains(&self, array: SimpleExpr, elements: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("JSON_CONTAINS(?, ?)", [array, elements])
    }

    fn array_has_any(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("JSON_OVERLAPS(?, ?)", [left, right])
    }

    fn array_any(&self, scalar: SimpleExpr, array: SimpleExpr) -> SimpleExpr {
        Expr::cust_with_exprs("? MEMBER OF (?)", [scalar, array])
    }

    fn last_insert_id(&self) -> LastInsertId {
        LastInsertId::ByResult
    }

    fn default_values_clause(&self) -> &'static str {
        "() VALUES ()"
    }

    fn supports_on_conflict(&self) -> bool {
        false
    }

    fn bind_value(&self, value: Value) -> Value {
        match value {
            Value::Array(_) | Value::Json(_) => Value::Str(value.to_json().to_string()),
            other => other,
        }
    }
}

/// ``SeaQuery`` backend parameterized by quote and placeholder style.
#[derive(Clone, Copy)]
pub struct QueryBuilder {
    /// Identifier quote characters.
    pub quote: Quote,
    /// `"?"` or `"$"`
    pub placeholder: &'static str,
    /// false for "?", true for "$1, $2, ..."
    pub numbered: bool,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            quote: Quote::new(b'"'),
            placeholder: "$",
            numbered: true,
        }
    }
}

impl QuotedBuilder for QueryBuilder {
    fn quote(&self) -> Quote {
        self.quote
    }
}

impl EscapeBuilder for QueryBuilder {}

impl TableRefBuilder for QueryBuilder {}

impl OperLeftAssocDecider for QueryBuilder {
    fn well_known_left_associative(&self, op: &BinOper) -> bool {
        // Mirrors sea-query 0.32.7 `common_well_known_left_associative`
        matches!(
            op,
            BinOper::And | BinOper::Or | BinOper::Add | BinOper::Sub | BinOper::Mul | BinOper::Mod
        )
    }
}

impl PrecedenceDecider for QueryBuilder {
    fn inner_expr_well_known_greater_precedence(
        &self, inner: &SimpleExpr, _outer_oper: &Oper,
    ) -> bool {
        // forces parentheses, except around `IN` value lists which render
        // their own
        matches!(inner, SimpleExpr::Tuple(_))
    }
}

impl sea_query::backend::QueryBuilder for QueryBuilder {
    fn prepare_query_statement(&self, query: &SubQueryStatement, sql: &mut dyn SqlWriter) {
        match query {
            SubQueryStatement::SelectStatement(s) => self.prepare_select_statement(s, sql),
            SubQueryStatement::InsertStatement(s) => self.prepare_insert_statement(s, sql),
            SubQueryStatement::UpdateStatement(s) => self.prepare_update_statement(s, sql),
            SubQueryStatement::DeleteStatement(s) => self.prepare_delete_statement(s, sql),
            SubQueryStatement::WithStatement(s) => self.prepare_with_query(s, sql),
        }
    }

    fn prepare_value(&self, value: &sea_query::Value, sql: &mut dyn SqlWriter) {
        sql.push_param(value.clone(), self);
    }

    fn placeholder(&self) -> (&str, bool) {
        (self.placeholder, self.numbered)
    }
}
