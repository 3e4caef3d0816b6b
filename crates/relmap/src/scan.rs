//! Row-to-record conversion.

use crate::error::{Error, Result};
use crate::executor::Row;
use crate::table::{Record, Table};

/// Map fields by name onto a fresh record. Fields consumed by the projected
/// columns are removed from `row`; anything else stays behind.
pub(crate) fn scan<T: Record>(table: &Table<T>, projection: &[usize], row: &mut Row) -> Result<T> {
    let mut record = table.new_record();
    for &position in projection {
        let column = &table.columns()[position];
        let name = column.spec().name();
        let value = row.take(name).ok_or_else(|| Error::decode(name, "missing column"))?;
        column.set_value(&mut record, value)?;
    }
    Ok(record)
}

/// Assign fields by position. The row must start with every column of the
/// table in declaration order.
///
/// Values still go through each column's erased setter; only the by-name
/// field lookup of [`scan`] is skipped.
pub(crate) fn fast_scan<T: Record>(table: &Table<T>, row: &mut Row) -> Result<T> {
    let columns = table.columns();
    let layout_matches = row.fields.len() >= columns.len()
        && columns.iter().zip(&row.fields).all(|(column, field)| column.spec().name() == field.name);
    if !layout_matches {
        return Err(Error::Unsupported("fast scan of a row that does not match the table layout"));
    }

    let mut record = table.new_record();
    for (column, field) in columns.iter().zip(row.fields.drain(..columns.len())) {
        column.set_value(&mut record, field.value)?;
    }
    Ok(record)
}
