//! Errors

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Errors returned by query construction, execution, and mapping.
///
/// Binding mistakes (querying an unbound table, mixing columns from tables
/// that are not part of the statement) are programmer errors and panic
/// instead of surfacing here.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied column name is not part of the table.
    #[error("table `{table}` has no column named `{field}`")]
    InvalidField {
        /// Table the lookup was performed against.
        table: String,
        /// The offending column name.
        field: String,
    },

    /// A single-row fetch returned no rows.
    #[error("no rows found")]
    NotFound,

    /// A single-row fetch matched more than one row.
    #[error("expected a single row, found {0}")]
    NotSingular(usize),

    /// A row value could not be converted into the column's type.
    #[error("cannot decode column `{column}`: {reason}")]
    Decode {
        /// Column being decoded.
        column: String,
        /// Why the conversion failed.
        reason: String,
    },

    /// The statement violated a unique constraint.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(anyhow::Error),

    /// The operation is not available for this query, table, or dialect.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The round-trip exceeded the configured statement timeout.
    #[error("statement cancelled")]
    Cancelled,

    /// Error raised by the execution layer.
    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

impl Error {
    /// Returns `true` for the [`Error::NotFound`] condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` for the [`Error::NotSingular`] condition.
    #[must_use]
    pub const fn is_not_singular(&self) -> bool {
        matches!(self, Self::NotSingular(_))
    }

    pub(crate) fn decode(column: &str, reason: impl ToString) -> Self {
        Self::Decode {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }
}
