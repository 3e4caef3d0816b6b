use std::sync::Arc;

use sea_query::JoinType;

use crate::filter::Filter;
use crate::table::{Descriptor, TableIdent};

/// A join clause of a select statement.
#[derive(Debug, Clone)]
pub struct Join {
    pub(crate) table: Arc<TableIdent>,
    pub(crate) on: Filter,
    pub(crate) kind: JoinKind,
}

/// Join types supported by the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL OUTER JOIN`
    Full,
}

impl Join {
    /// Creates a JOIN (defaults to INNER JOIN) on a table by name.
    #[must_use]
    pub fn new(table: &'static str, on: Filter) -> Self {
        Self::with(JoinKind::Inner, Arc::new(TableIdent::named(table)), on)
    }

    /// Creates a LEFT JOIN.
    #[must_use]
    pub fn left(table: &'static str, on: Filter) -> Self {
        Self::with(JoinKind::Left, Arc::new(TableIdent::named(table)), on)
    }

    /// Creates a RIGHT JOIN.
    #[must_use]
    pub fn right(table: &'static str, on: Filter) -> Self {
        Self::with(JoinKind::Right, Arc::new(TableIdent::named(table)), on)
    }

    /// Creates a FULL OUTER JOIN.
    #[must_use]
    pub fn full(table: &'static str, on: Filter) -> Self {
        Self::with(JoinKind::Full, Arc::new(TableIdent::named(table)), on)
    }

    /// Creates an INNER JOIN (alias for `new`).
    #[must_use]
    pub fn inner(table: &'static str, on: Filter) -> Self {
        Self::new(table, on)
    }

    /// Join a declared table under its own alias (and schema).
    #[must_use]
    pub fn table(kind: JoinKind, table: &impl Descriptor, on: Filter) -> Self {
        Self::with(kind, Arc::clone(table.table().ident()), on)
    }

    pub(crate) const fn with(kind: JoinKind, table: Arc<TableIdent>, on: Filter) -> Self {
        Self { table, on, kind }
    }

    /// Sets an alias for the joined table.
    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.table = Arc::new(self.table.with_alias(alias));
        self
    }

    /// Alias the joined table's columns are qualified by.
    #[must_use]
    pub fn qualifier(&self) -> &str {
        self.table.alias()
    }

    /// The join condition.
    #[must_use]
    pub const fn on(&self) -> &Filter {
        &self.on
    }

    /// The join type.
    #[must_use]
    pub const fn kind(&self) -> JoinKind {
        self.kind
    }
}

impl JoinKind {
    pub(crate) const fn into_join_type(self) -> JoinType {
        match self {
            Self::Inner => JoinType::InnerJoin,
            Self::Left => JoinType::LeftJoin,
            Self::Right => JoinType::RightJoin,
            Self::Full => JoinType::FullOuterJoin,
        }
    }
}
