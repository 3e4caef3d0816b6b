use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::dialect::AggregateFn;
use crate::error::{Error, Result};
use crate::filter::{Aggregate, ColumnName, Filter, Operand};
use crate::table::TableIdent;
use crate::value::{ColumnValue, Value};

/// Static metadata for one column of a table.
///
/// Built by the `table!` macro; flags listed after a field
/// (`[primary_key, auto_increment]`) map onto the builder methods here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    field: &'static str,
    name: &'static str,
    position: usize,
    primary_key: bool,
    auto_increment: bool,
    has_default: bool,
    unique: bool,
    array: bool,
    nullable: bool,
    custom_scan: bool,
}

impl ColumnSpec {
    /// A column whose database name matches the record field.
    #[must_use]
    pub const fn new(field: &'static str, position: usize) -> Self {
        Self {
            field,
            name: field,
            position,
            primary_key: false,
            auto_increment: false,
            has_default: false,
            unique: false,
            array: false,
            nullable: false,
            custom_scan: false,
        }
    }

    /// Override the database column name.
    #[must_use]
    pub const fn db_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Mark as part of the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as generated by the database on insert.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.has_default = true;
        self
    }

    /// Mark as having a database-side default.
    #[must_use]
    pub const fn has_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Mark as carrying a unique constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn typed<V: ColumnValue>(mut self) -> Self {
        self.array = V::IS_ARRAY;
        self.nullable = V::IS_NULLABLE;
        self.custom_scan = V::CUSTOM_SCAN;
        self
    }

    /// Declared (record field) name.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// Database column name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Ordinal position within the owning table.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Part of the primary key.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Generated by the database on insert.
    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Has a database-side default.
    #[must_use]
    pub const fn is_defaulted(&self) -> bool {
        self.has_default
    }

    /// Carries a unique constraint.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Holds an array.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.array
    }

    /// Accepts `NULL`.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Needs lenient decoding from non-native encodings.
    #[must_use]
    pub const fn is_custom_scan(&self) -> bool {
        self.custom_scan
    }
}

/// Value written for a column by an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A literal value.
    Value(Value),
    /// Use the column default.
    Default,
}

/// A typed column of record `T` holding values of type `V`.
pub struct Column<T, V> {
    spec: Arc<ColumnSpec>,
    ident: Arc<TableIdent>,
    get: fn(&T) -> &V,
    get_mut: fn(&mut T) -> &mut V,
}

impl<T, V> Clone for Column<T, V> {
    fn clone(&self) -> Self {
        Self {
            spec: Arc::clone(&self.spec),
            ident: Arc::clone(&self.ident),
            get: self.get,
            get_mut: self.get_mut,
        }
    }
}

impl<T, V> fmt::Debug for Column<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("table", &self.ident.alias())
            .field("name", &self.spec.name)
            .field("position", &self.spec.position)
            .finish()
    }
}

impl<T, V: ColumnValue> Column<T, V> {
    /// Bind a column spec to a table and a record field.
    #[must_use]
    pub fn new(
        ident: &Arc<TableIdent>, spec: ColumnSpec, get: fn(&T) -> &V, get_mut: fn(&mut T) -> &mut V,
    ) -> Self {
        Self {
            spec: Arc::new(spec.typed::<V>()),
            ident: Arc::clone(ident),
            get,
            get_mut,
        }
    }

    /// Column metadata.
    #[must_use]
    pub fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    /// Alias-qualified reference for predicates, ordering, and projections.
    #[must_use]
    pub fn name(&self) -> ColumnName {
        ColumnName::qualified(self.ident.alias_arc(), self.spec.name)
    }

    /// Read the field.
    pub fn get<'a>(&self, record: &'a T) -> &'a V {
        (self.get)(record)
    }

    /// Write the field.
    pub fn set(&self, record: &mut T, value: V) {
        *(self.get_mut)(record) = value;
    }

    /// Array elements (or the scalar itself) as dynamic values.
    pub fn flatten(&self, record: &T) -> Vec<Value> {
        self.get(record).to_value().flatten()
    }

    fn operand(&self) -> Operand {
        Operand::Column(self.name())
    }

    /// `column = value`
    #[must_use]
    pub fn eq(&self, value: impl Into<V>) -> Filter {
        Filter::Eq(self.operand(), value.into().to_value())
    }

    /// `column <> value`
    #[must_use]
    pub fn ne(&self, value: impl Into<V>) -> Filter {
        Filter::Ne(self.operand(), value.into().to_value())
    }

    /// `column < value`
    #[must_use]
    pub fn lt(&self, value: impl Into<V>) -> Filter {
        Filter::Lt(self.operand(), value.into().to_value())
    }

    /// `column <= value`
    #[must_use]
    pub fn lte(&self, value: impl Into<V>) -> Filter {
        Filter::Lte(self.operand(), value.into().to_value())
    }

    /// `column > value`
    #[must_use]
    pub fn gt(&self, value: impl Into<V>) -> Filter {
        Filter::Gt(self.operand(), value.into().to_value())
    }

    /// `column >= value`
    #[must_use]
    pub fn gte(&self, value: impl Into<V>) -> Filter {
        Filter::Gte(self.operand(), value.into().to_value())
    }

    /// `column BETWEEN low AND high`
    #[must_use]
    pub fn between(&self, low: impl Into<V>, high: impl Into<V>) -> Filter {
        Filter::Between(self.operand(), low.into().to_value(), high.into().to_value())
    }

    /// `column NOT BETWEEN low AND high`
    #[must_use]
    pub fn not_between(&self, low: impl Into<V>, high: impl Into<V>) -> Filter {
        Filter::NotBetween(self.operand(), low.into().to_value(), high.into().to_value())
    }

    /// `column LIKE pattern`
    #[must_use]
    pub fn like(&self, pattern: impl Into<String>) -> Filter {
        Filter::Like(self.operand(), pattern.into())
    }

    /// `column NOT LIKE pattern`
    #[must_use]
    pub fn not_like(&self, pattern: impl Into<String>) -> Filter {
        Filter::NotLike(self.operand(), pattern.into())
    }

    /// `column IN (values)`
    #[must_use]
    pub fn is_in(&self, values: impl IntoIterator<Item = impl Into<V>>) -> Filter {
        Filter::In(self.operand(), values.into_iter().map(|v| v.into().to_value()).collect())
    }

    /// `column NOT IN (values)`
    #[must_use]
    pub fn not_in(&self, values: impl IntoIterator<Item = impl Into<V>>) -> Filter {
        Filter::NotIn(self.operand(), values.into_iter().map(|v| v.into().to_value()).collect())
    }

    /// `column IS NULL`
    #[must_use]
    pub fn is_null(&self) -> Filter {
        Filter::IsNull(self.operand())
    }

    /// `column IS NOT NULL`
    #[must_use]
    pub fn is_not_null(&self) -> Filter {
        Filter::IsNotNull(self.operand())
    }

    /// Scalar column equals any element of `values`.
    #[must_use]
    pub fn any_of(&self, values: impl IntoIterator<Item = impl Into<V>>) -> Filter {
        Filter::Any(self.operand(), values.into_iter().map(|v| v.into().to_value()).collect())
    }

    /// Array column equals `values`.
    #[must_use]
    pub fn array_eq(&self, values: impl Into<V>) -> Filter {
        Filter::ArrayEq(self.operand(), values.into().to_value().flatten())
    }

    /// Array column contains every element of `values`.
    #[must_use]
    pub fn array_contains(&self, values: impl Into<V>) -> Filter {
        Filter::ArrayContains(self.operand(), values.into().to_value().flatten())
    }

    /// Every element of the array column is in `values`.
    #[must_use]
    pub fn array_contained_by(&self, values: impl Into<V>) -> Filter {
        Filter::ArrayContainedBy(self.operand(), values.into().to_value().flatten())
    }

    /// Array column shares at least one element with `values`.
    #[must_use]
    pub fn array_has_any(&self, values: impl Into<V>) -> Filter {
        Filter::ArrayHasAny(self.operand(), values.into().to_value().flatten())
    }

    /// `column = other`
    #[must_use]
    pub fn eq_column<U, W>(&self, other: &Column<U, W>) -> Filter {
        Filter::ColEq(self.name(), other.column_name())
    }

    /// `column <> other`
    #[must_use]
    pub fn ne_column<U, W>(&self, other: &Column<U, W>) -> Filter {
        Filter::ColNe(self.name(), other.column_name())
    }

    /// `column < other`
    #[must_use]
    pub fn lt_column<U, W>(&self, other: &Column<U, W>) -> Filter {
        Filter::ColLt(self.name(), other.column_name())
    }

    /// `column > other`
    #[must_use]
    pub fn gt_column<U, W>(&self, other: &Column<U, W>) -> Filter {
        Filter::ColGt(self.name(), other.column_name())
    }

    /// `COUNT(column)`
    #[must_use]
    pub fn count(&self) -> Aggregate {
        Aggregate::over(AggregateFn::Count, self.name())
    }

    /// `COUNT(DISTINCT column)`
    #[must_use]
    pub fn count_distinct(&self) -> Aggregate {
        Aggregate::over(AggregateFn::CountDistinct, self.name())
    }

    /// `SUM(column)`
    #[must_use]
    pub fn sum(&self) -> Aggregate {
        Aggregate::over(AggregateFn::Sum, self.name())
    }

    /// `AVG(column)`
    #[must_use]
    pub fn avg(&self) -> Aggregate {
        Aggregate::over(AggregateFn::Avg, self.name())
    }

    /// `MIN(column)`
    #[must_use]
    pub fn min(&self) -> Aggregate {
        Aggregate::over(AggregateFn::Min, self.name())
    }

    /// `MAX(column)`
    #[must_use]
    pub fn max(&self) -> Aggregate {
        Aggregate::over(AggregateFn::Max, self.name())
    }
}

impl<T, W> Column<T, W> {
    fn column_name(&self) -> ColumnName {
        ColumnName::qualified(self.ident.alias_arc(), self.spec.name)
    }
}

impl<T, V> From<&Column<T, V>> for ColumnName {
    fn from(column: &Column<T, V>) -> Self {
        column.column_name()
    }
}

/// Object-safe view of a column, used wherever records are handled without
/// knowing each field's type.
pub trait AnyColumn<T>: Send + Sync {
    /// Column metadata.
    fn spec(&self) -> &ColumnSpec;

    /// The owning table.
    fn ident(&self) -> &Arc<TableIdent>;

    /// Read the field as a dynamic value.
    fn value(&self, record: &T) -> Value;

    /// Write the field from a dynamic value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] naming the column when the value does not
    /// convert.
    fn set_value(&self, record: &mut T, value: Value) -> Result<()>;

    /// Whether the field holds its type's zero value.
    fn is_zero(&self, record: &T) -> bool;

    /// Order two records by this column.
    fn compare(&self, left: &T, right: &T) -> Ordering;

    /// Alias-qualified reference.
    fn name(&self) -> ColumnName {
        ColumnName::qualified(self.ident().alias_arc(), self.spec().name())
    }

    /// Array elements (or the scalar itself).
    fn flatten(&self, record: &T) -> Vec<Value> {
        self.value(record).flatten()
    }

    /// Append the canonical key encoding of the field.
    fn format(&self, record: &T, out: &mut String) {
        self.value(record).format_key(out);
    }

    /// Value written by inserts: zero values on generated or defaulted
    /// columns become [`InsertValue::Default`].
    fn insert_value(&self, record: &T) -> InsertValue {
        let spec = self.spec();
        if (spec.is_auto_increment() || spec.is_defaulted()) && self.is_zero(record) {
            InsertValue::Default
        } else {
            InsertValue::Value(self.value(record))
        }
    }
}

impl<T, V> AnyColumn<T> for Column<T, V>
where
    T: Send + Sync + 'static,
    V: ColumnValue,
{
    fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    fn ident(&self) -> &Arc<TableIdent> {
        &self.ident
    }

    fn value(&self, record: &T) -> Value {
        self.get(record).to_value()
    }

    fn set_value(&self, record: &mut T, value: Value) -> Result<()> {
        let value = V::from_value(value).map_err(|e| Error::decode(self.spec.name, e))?;
        self.set(record, value);
        Ok(())
    }

    fn is_zero(&self, record: &T) -> bool {
        self.get(record).is_zero()
    }

    fn compare(&self, left: &T, right: &T) -> Ordering {
        self.get(left).compare(self.get(right))
    }
}
