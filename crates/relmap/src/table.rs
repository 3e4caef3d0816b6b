use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use heck::ToLowerCamelCase;
use sea_query::{Alias, IntoIden, TableRef};

use crate::column::AnyColumn;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::select::SelectBuilder;

/// Records are plain structs moved between tasks and cloned into relation
/// slots.
pub trait Record: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Record for T {}

/// Name, alias, schema, and database binding of a table.
///
/// Aliased and schema-qualified copies share the binding of the table they
/// were derived from.
pub struct TableIdent {
    name: &'static str,
    alias: Arc<str>,
    schema: Option<Arc<str>>,
    binding: Arc<OnceLock<Weak<Database>>>,
}

impl fmt::Debug for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableIdent")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("schema", &self.schema)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl TableIdent {
    /// A table aliased by its lower-camel-cased name.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            alias: name.to_lower_camel_case().into(),
            schema: None,
            binding: Arc::new(OnceLock::new()),
        }
    }

    /// A table aliased by its own name.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self {
            alias: name.into(),
            ..Self::new(name)
        }
    }

    /// Table name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Alias used to qualify columns.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub(crate) fn alias_arc(&self) -> Arc<str> {
        Arc::clone(&self.alias)
    }

    /// Schema, when qualified.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Copy with a different alias, sharing the binding.
    #[must_use]
    pub fn with_alias(&self, alias: &str) -> Self {
        Self {
            name: self.name,
            alias: alias.into(),
            schema: self.schema.clone(),
            binding: Arc::clone(&self.binding),
        }
    }

    /// Copy in a different schema, sharing the binding.
    #[must_use]
    pub fn with_schema(&self, schema: &str) -> Self {
        Self {
            name: self.name,
            alias: Arc::clone(&self.alias),
            schema: Some(schema.into()),
            binding: Arc::clone(&self.binding),
        }
    }

    /// Whether the table is bound to a database.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    pub(crate) fn bind(&self, database: Weak<Database>) {
        assert!(
            self.binding.set(database).is_ok(),
            "table `{}` is already bound to a database",
            self.name
        );
    }

    /// The database this table is bound to.
    ///
    /// # Panics
    ///
    /// Panics when the table has not been registered with a
    /// [`Database`](crate::Database) or the database was dropped.
    #[must_use]
    pub fn database(&self) -> Arc<Database> {
        self.binding.get().and_then(Weak::upgrade).unwrap_or_else(|| {
            panic!("table `{}` is not bound to a database; register it with Database::builder", self.name)
        })
    }

    /// Aliased reference used by `SELECT`.
    pub(crate) fn table_ref(&self) -> TableRef {
        let table = Alias::new(self.name).into_iden();
        let alias = (*self.alias != *self.name).then(|| Alias::new(&*self.alias).into_iden());
        match (&self.schema, alias) {
            (Some(schema), Some(alias)) => {
                TableRef::SchemaTableAlias(Alias::new(&**schema).into_iden(), table, alias)
            }
            (Some(schema), None) => TableRef::SchemaTable(Alias::new(&**schema).into_iden(), table),
            (None, Some(alias)) => TableRef::TableAlias(table, alias),
            (None, None) => TableRef::Table(table),
        }
    }

    /// Unaliased reference used by mutations.
    pub(crate) fn write_ref(&self) -> TableRef {
        let table = Alias::new(self.name).into_iden();
        match &self.schema {
            Some(schema) => TableRef::SchemaTable(Alias::new(&**schema).into_iden(), table),
            None => TableRef::Table(table),
        }
    }

    /// Quoted `schema.table`.
    pub(crate) fn quoted_name(&self, quote: impl Fn(&str) -> String) -> String {
        self.schema.as_deref().map_or_else(
            || quote(self.name),
            |schema| format!("{}.{}", quote(schema), quote(self.name)),
        )
    }
}

/// Runtime descriptor of a table holding records of type `T`.
pub struct Table<T> {
    ident: Arc<TableIdent>,
    columns: Arc<[Arc<dyn AnyColumn<T>>]>,
    primary_keys: Arc<[usize]>,
    fixed_filter: Option<Filter>,
    read_only: bool,
    factory: fn() -> T,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            ident: Arc::clone(&self.ident),
            columns: Arc::clone(&self.columns),
            primary_keys: Arc::clone(&self.primary_keys),
            fixed_filter: self.fixed_filter.clone(),
            read_only: self.read_only,
            factory: self.factory,
        }
    }
}

impl<T> fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("ident", &self.ident)
            .field("columns", &self.columns.iter().map(|c| c.spec().name()).collect::<Vec<_>>())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<T: Record> Table<T> {
    /// Assemble a table from its columns, classifying primary keys.
    #[must_use]
    pub fn new(ident: Arc<TableIdent>, columns: Vec<Arc<dyn AnyColumn<T>>>, factory: fn() -> T) -> Self {
        let primary_keys = columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.spec().is_primary_key())
            .map(|(index, _)| index)
            .collect();
        Self {
            ident,
            columns: columns.into(),
            primary_keys,
            fixed_filter: None,
            read_only: false,
            factory,
        }
    }

    /// Table identity.
    #[must_use]
    pub const fn ident(&self) -> &Arc<TableIdent> {
        &self.ident
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.ident.name()
    }

    /// Alias used to qualify columns.
    #[must_use]
    pub fn alias(&self) -> &str {
        self.ident.alias()
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[Arc<dyn AnyColumn<T>>] {
        &self.columns
    }

    /// Primary-key columns in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &Arc<dyn AnyColumn<T>>> {
        self.primary_keys.iter().map(|&index| &self.columns[index])
    }

    /// The generated primary-key column, if any.
    pub(crate) fn auto_increment(&self) -> Option<&Arc<dyn AnyColumn<T>>> {
        self.primary_keys().find(|column| column.spec().is_auto_increment())
    }

    /// Look up a column by database or field name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] for unknown names.
    pub fn column_by_name(&self, name: &str) -> Result<&Arc<dyn AnyColumn<T>>> {
        self.columns
            .iter()
            .find(|column| column.spec().name() == name)
            .or_else(|| self.columns.iter().find(|column| column.spec().field() == name))
            .ok_or_else(|| Error::InvalidField {
                table: self.name().to_string(),
                field: name.to_string(),
            })
    }

    /// Fixed condition of a read-only view.
    #[must_use]
    pub const fn fixed_filter(&self) -> Option<&Filter> {
        self.fixed_filter.as_ref()
    }

    /// Whether writes are rejected.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only { Err(Error::Unsupported("writing through a read-only view")) } else { Ok(()) }
    }

    /// A fresh record from the descriptor's factory.
    #[must_use]
    pub fn new_record(&self) -> T {
        (self.factory)()
    }

    /// Quoted `schema.table AS alias` clause.
    ///
    /// # Panics
    ///
    /// Panics when the table is not bound to a database.
    #[must_use]
    pub fn from_clause(&self) -> String {
        let database = self.ident.database();
        let dialect = database.dialect();
        let table = self.ident.quoted_name(|s| dialect.quote_identifier(s));
        if self.ident.alias() == self.ident.name() {
            table
        } else {
            format!("{table} AS {}", dialect.quote_identifier(self.ident.alias()))
        }
    }

    /// A query rooted at this table, honoring any fixed filter.
    #[must_use]
    pub fn select(&self) -> SelectBuilder<T> {
        SelectBuilder::new(self.clone())
    }

    /// Read-only mirror restricted by `filter`. Unqualified columns of the
    /// filter resolve to this table.
    #[must_use]
    pub fn view(&self, filter: Filter) -> Self {
        let mut filter = filter;
        filter.qualify(&self.ident.alias_arc());
        let fixed_filter = match self.fixed_filter.clone() {
            Some(existing) => existing.and(filter),
            None => filter,
        };
        Self {
            fixed_filter: Some(fixed_filter),
            read_only: true,
            ..self.clone()
        }
    }

    /// Carry the view state of `source` onto this (re-identified) copy.
    pub(crate) fn inherit(&mut self, source: &Self) {
        self.read_only = source.read_only;
        self.fixed_filter = source.fixed_filter.clone().map(|mut filter| {
            filter.requalify(source.alias(), &self.ident.alias_arc());
            filter
        });
    }
}

/// Typed descriptor generated by the `table!` macro: a [`Table`] plus one
/// typed [`Column`](crate::Column) field per record field.
pub trait Descriptor: Sized + Send + Sync + 'static {
    /// Record type of the table.
    type Record: Record;

    /// Table name.
    const NAME: &'static str;

    /// Build the descriptor over an identity.
    fn from_binding(ident: Arc<TableIdent>) -> Self;

    /// The erased table.
    fn table(&self) -> &Table<Self::Record>;

    /// Mutable access to the erased table.
    fn table_mut(&mut self) -> &mut Table<Self::Record>;

    /// A fresh record.
    fn new_record(&self) -> Self::Record {
        self.table().new_record()
    }

    /// Copy under a different alias (self-joins). Columns keep their
    /// positions and the binding is shared.
    #[must_use]
    fn with_alias(&self, alias: &str) -> Self {
        let mut descriptor = Self::from_binding(Arc::new(self.table().ident().with_alias(alias)));
        descriptor.table_mut().inherit(self.table());
        descriptor
    }

    /// Copy in a different schema (multi-tenant layouts).
    #[must_use]
    fn with_schema(&self, schema: &str) -> Self {
        let mut descriptor = Self::from_binding(Arc::new(self.table().ident().with_schema(schema)));
        descriptor.table_mut().inherit(self.table());
        descriptor
    }

    /// Read-only mirror restricted by `filter`.
    #[must_use]
    fn view(&self, filter: Filter) -> Self {
        let mut descriptor = Self::from_binding(Arc::clone(self.table().ident()));
        *descriptor.table_mut() = self.table().view(filter);
        descriptor
    }

    /// A query rooted at this table.
    fn select(&self) -> SelectBuilder<Self::Record> {
        self.table().select()
    }
}
