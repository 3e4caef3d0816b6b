//! Relations between tables and the slots that hold related records.
//!
//! A [`Relation`] links a parent table to a child table either directly
//! through key pairs (a foreign key on one side referencing the other) or
//! through a junction table. Array-typed key columns switch the link from
//! equality to containment.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use sea_query::{Alias, SimpleExpr};

use crate::column::{AnyColumn, Column};
use crate::database::Conn;
use crate::eager::Eager;
use crate::error::{Error, Result};
use crate::filter::{ColumnName, Filter, Operand, RenderCtx};
use crate::join::{Join, JoinKind};
use crate::table::{Descriptor, Record, Table, TableIdent};
use crate::value::{ColumnValue, Value};

/// Slot for a to-many relation.
pub type Many<T> = Vec<T>;

/// Slot for a to-one relation.
pub type One<T> = Option<Box<T>>;

/// Storage for materialized related records.
pub trait RelationSlot<C>: Send + Sync + 'static {
    /// Empty the slot.
    fn clear(&mut self);

    /// Add a related record. To-one slots keep the first record attached.
    fn attach(&mut self, child: C);

    /// Related records currently held.
    fn children(&self) -> Vec<&C>;

    /// Mutable access to the related records currently held.
    fn children_mut(&mut self) -> Vec<&mut C>;
}

impl<C: Record> RelationSlot<C> for Vec<C> {
    fn clear(&mut self) {
        Self::clear(self);
    }

    fn attach(&mut self, child: C) {
        self.push(child);
    }

    fn children(&self) -> Vec<&C> {
        self.iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut C> {
        self.iter_mut().collect()
    }
}

impl<C: Record> RelationSlot<C> for Option<Box<C>> {
    fn clear(&mut self) {
        *self = None;
    }

    fn attach(&mut self, child: C) {
        if self.is_none() {
            *self = Some(Box::new(child));
        }
    }

    fn children(&self) -> Vec<&C> {
        self.as_deref().into_iter().collect()
    }

    fn children_mut(&mut self) -> Vec<&mut C> {
        self.as_deref_mut().into_iter().collect()
    }
}

/// Accessors for the slot field of a parent record. Built with [`slot!`](crate::slot).
pub struct Slot<P, S> {
    get: fn(&P) -> &S,
    get_mut: fn(&mut P) -> &mut S,
}

impl<P, S> Slot<P, S> {
    /// Bind a slot to its record field.
    #[must_use]
    pub const fn new(get: fn(&P) -> &S, get_mut: fn(&mut P) -> &mut S) -> Self {
        Self { get, get_mut }
    }
}

pub(crate) trait SlotAccess<P, C>: Send + Sync {
    fn clear(&self, parent: &mut P);
    fn attach(&self, parent: &mut P, child: C);
    fn children<'a>(&self, parent: &'a P) -> Vec<&'a C>;
    fn children_mut<'a>(&self, parent: &'a mut P) -> Vec<&'a mut C>;
}

impl<P, C, S> SlotAccess<P, C> for Slot<P, S>
where
    S: RelationSlot<C>,
{
    fn clear(&self, parent: &mut P) {
        (self.get_mut)(parent).clear();
    }

    fn attach(&self, parent: &mut P, child: C) {
        (self.get_mut)(parent).attach(child);
    }

    fn children<'a>(&self, parent: &'a P) -> Vec<&'a C> {
        (self.get)(parent).children()
    }

    fn children_mut<'a>(&self, parent: &'a mut P) -> Vec<&'a mut C> {
        (self.get_mut)(parent).children_mut()
    }
}

/// A local column of the parent paired with the column of the child it
/// links to.
pub struct KeyPair<P, C> {
    pub(crate) local: Arc<dyn AnyColumn<P>>,
    pub(crate) foreign: Arc<dyn AnyColumn<C>>,
}

impl<P, C> Clone for KeyPair<P, C> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            foreign: Arc::clone(&self.foreign),
        }
    }
}

impl<P, C> KeyPair<P, C>
where
    P: Record,
    C: Record,
{
    /// Pair `local` (on the parent) with `foreign` (on the child).
    #[must_use]
    pub fn new<V: ColumnValue, W: ColumnValue>(local: &Column<P, V>, foreign: &Column<C, W>) -> Self {
        Self {
            local: Arc::new(local.clone()),
            foreign: Arc::new(foreign.clone()),
        }
    }

    pub(crate) fn local_array(&self) -> bool {
        self.local.spec().is_array()
    }

    pub(crate) fn foreign_array(&self) -> bool {
        self.foreign.spec().is_array()
    }

    fn flipped(&self) -> KeyPair<C, P> {
        KeyPair {
            local: Arc::clone(&self.foreign),
            foreign: Arc::clone(&self.local),
        }
    }
}

/// A junction table linking parent and child keys for many-to-many
/// relations.
pub struct Junction<P, C> {
    pub(crate) ident: Arc<TableIdent>,
    pub(crate) local: Vec<(Arc<dyn AnyColumn<P>>, &'static str)>,
    pub(crate) foreign: Vec<(Arc<dyn AnyColumn<C>>, &'static str)>,
}

impl<P: Record, C: Record> Junction<P, C> {
    /// A junction table with no key columns yet.
    #[must_use]
    pub fn new(table: &'static str) -> Self {
        Self {
            ident: Arc::new(TableIdent::new(table)),
            local: Vec::new(),
            foreign: Vec::new(),
        }
    }

    /// Junction column `column` references the parent column `key`.
    #[must_use]
    pub fn local<V: ColumnValue>(mut self, key: &Column<P, V>, column: &'static str) -> Self {
        self.local.push((Arc::new(key.clone()), column));
        self
    }

    /// Junction column `column` references the child column `key`.
    #[must_use]
    pub fn foreign<V: ColumnValue>(mut self, key: &Column<C, V>, column: &'static str) -> Self {
        self.foreign.push((Arc::new(key.clone()), column));
        self
    }

    /// Junction table name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.ident.name()
    }

    pub(crate) fn column(&self, name: &'static str) -> ColumnName {
        ColumnName::qualified(self.ident.alias_arc(), name)
    }

    fn flipped(&self) -> Junction<C, P> {
        Junction {
            ident: Arc::clone(&self.ident),
            local: self.foreign.clone(),
            foreign: self.local.clone(),
        }
    }
}

pub(crate) enum Link<P, C> {
    Direct(Arc<[KeyPair<P, C>]>),
    Junction(Arc<Junction<P, C>>),
}

impl<P, C> Clone for Link<P, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(keys) => Self::Direct(Arc::clone(keys)),
            Self::Junction(junction) => Self::Junction(Arc::clone(junction)),
        }
    }
}

/// A declared relation from parent records `P` to child records `C`.
pub struct Relation<P, C> {
    name: &'static str,
    parent: Arc<TableIdent>,
    child: Table<C>,
    link: Link<P, C>,
    to_many: bool,
    filter: Option<Filter>,
    slot: Arc<dyn SlotAccess<P, C>>,
}

impl<P, C> Clone for Relation<P, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            parent: Arc::clone(&self.parent),
            child: self.child.clone(),
            link: self.link.clone(),
            to_many: self.to_many,
            filter: self.filter.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<P, C: Record> fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("parent", &self.parent.name())
            .field("child", &self.child.ident().name())
            .field("to_many", &self.to_many)
            .finish_non_exhaustive()
    }
}

impl<P: Record, C: Record> Relation<P, C> {
    fn direct<S: RelationSlot<C>>(
        name: &'static str, child: &impl Descriptor<Record = C>, keys: Vec<KeyPair<P, C>>,
        to_many: bool, slot: Slot<P, S>,
    ) -> Self {
        let parent = keys.first().map(|pair| Arc::clone(pair.local.ident()));
        let Some(parent) = parent else {
            panic!("relation `{name}` needs at least one key pair");
        };
        Self {
            name,
            parent,
            child: child.table().clone(),
            link: Link::Direct(keys.into()),
            to_many,
            filter: None,
            slot: Arc::new(slot),
        }
    }

    /// Each parent has at most one child.
    ///
    /// # Panics
    ///
    /// Panics when `keys` is empty.
    #[must_use]
    pub fn to_one(
        name: &'static str, child: &impl Descriptor<Record = C>, keys: Vec<KeyPair<P, C>>,
        slot: Slot<P, One<C>>,
    ) -> Self {
        Self::direct(name, child, keys, false, slot)
    }

    /// Each parent has any number of children.
    ///
    /// # Panics
    ///
    /// Panics when `keys` is empty.
    #[must_use]
    pub fn to_many(
        name: &'static str, child: &impl Descriptor<Record = C>, keys: Vec<KeyPair<P, C>>,
        slot: Slot<P, Many<C>>,
    ) -> Self {
        Self::direct(name, child, keys, true, slot)
    }

    /// Parents and children linked through a junction table.
    ///
    /// # Panics
    ///
    /// Panics when the junction has no local or no foreign columns.
    #[must_use]
    pub fn many_to_many(
        name: &'static str, child: &impl Descriptor<Record = C>, junction: Junction<P, C>,
        slot: Slot<P, Many<C>>,
    ) -> Self {
        assert!(!junction.foreign.is_empty(), "relation `{name}` needs foreign junction columns");
        let parent = junction.local.first().map(|(key, _)| Arc::clone(key.ident()));
        let Some(parent) = parent else {
            panic!("relation `{name}` needs local junction columns");
        };
        Self {
            name,
            parent,
            child: child.table().clone(),
            link: Link::Junction(Arc::new(junction)),
            to_many: true,
            filter: None,
            slot: Arc::new(slot),
        }
    }

    /// The same link walked from the child side, where each child holds at
    /// most one parent. The relation filter is not carried over.
    ///
    /// # Panics
    ///
    /// Panics when `parent` is not the table this relation starts from.
    #[must_use]
    pub fn inverse_one(
        &self, name: &'static str, parent: &impl Descriptor<Record = P>, slot: Slot<C, One<P>>,
    ) -> Relation<C, P> {
        self.inverse(name, parent, false, slot)
    }

    /// The same link walked from the child side, where each child holds any
    /// number of parents (many-to-many, or a key shared by several parents).
    /// The relation filter is not carried over.
    ///
    /// # Panics
    ///
    /// Panics when `parent` is not the table this relation starts from.
    #[must_use]
    pub fn inverse_many(
        &self, name: &'static str, parent: &impl Descriptor<Record = P>, slot: Slot<C, Many<P>>,
    ) -> Relation<C, P> {
        self.inverse(name, parent, true, slot)
    }

    fn inverse<S: RelationSlot<P>>(
        &self, name: &'static str, parent: &impl Descriptor<Record = P>, to_many: bool, slot: Slot<C, S>,
    ) -> Relation<C, P> {
        assert!(
            parent.table().alias() == self.parent.alias(),
            "relation `{name}` reverses `{}`, which starts from `{}`, not `{}`",
            self.name,
            self.parent.alias(),
            parent.table().alias()
        );
        let link = match &self.link {
            Link::Direct(keys) => Link::Direct(keys.iter().map(KeyPair::flipped).collect()),
            Link::Junction(junction) => Link::Junction(Arc::new(junction.flipped())),
        };
        Relation {
            name,
            parent: Arc::clone(self.child.ident()),
            child: parent.table().clone(),
            link,
            to_many,
            filter: None,
            slot: Arc::new(slot),
        }
    }

    /// Restrict the related records. Unqualified columns resolve to the
    /// child table.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        let mut filter = filter;
        filter.qualify(&self.child.ident().alias_arc());
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Relation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The child table.
    #[must_use]
    pub const fn child(&self) -> &Table<C> {
        &self.child
    }

    /// Whether a parent holds many children.
    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        self.to_many
    }

    /// Whether any key column is array-typed.
    #[must_use]
    pub fn has_array_key(&self) -> bool {
        match &self.link {
            Link::Direct(keys) => keys.iter().any(|pair| pair.local_array() || pair.foreign_array()),
            Link::Junction(_) => false,
        }
    }

    /// Extra condition on the related records.
    #[must_use]
    pub const fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Eager-load request for this relation.
    #[must_use]
    pub fn eager(&self) -> Eager<P, C> {
        Eager::new(self.clone())
    }

    pub(crate) const fn link(&self) -> &Link<P, C> {
        &self.link
    }

    pub(crate) fn slot(&self) -> &dyn SlotAccess<P, C> {
        &*self.slot
    }

    pub(crate) fn parent_alias(&self) -> &str {
        self.parent.alias()
    }

    /// Join condition between parent and child (or, for junction relations,
    /// between the root side and the junction table). Scalar pairs are
    /// written with the root's column first.
    ///
    /// # Panics
    ///
    /// Panics when `root` is neither the parent's nor the child's alias.
    #[must_use]
    pub fn join_predicate(&self, root: &str) -> Filter {
        let child_root = self.child_is_root(root);
        let predicates = match &self.link {
            Link::Direct(keys) => keys.iter().map(|pair| direct_predicate(pair, child_root)).collect(),
            Link::Junction(junction) if child_root => junction
                .foreign
                .iter()
                .map(|(key, column)| Filter::ColEq(key.name(), junction.column(*column)))
                .collect(),
            Link::Junction(junction) => junction
                .local
                .iter()
                .map(|(key, column)| Filter::ColEq(key.name(), junction.column(*column)))
                .collect(),
        };
        conjunction(predicates)
    }

    /// Joins bringing the non-root side into a query rooted at `root`.
    pub(crate) fn joins(&self, root: &str, kind: JoinKind) -> Vec<Join> {
        let child_root = self.child_is_root(root);
        let other = if child_root { Arc::clone(&self.parent) } else { Arc::clone(self.child.ident()) };
        let with_filter = |on: Filter| match self.filter.clone() {
            Some(filter) => on.and(filter),
            None => on,
        };

        match &self.link {
            Link::Direct(_) => vec![Join::with(kind, other, with_filter(self.join_predicate(root)))],
            Link::Junction(junction) => {
                let far_keys = if child_root {
                    junction.local.iter().map(|(key, column)| Filter::ColEq(key.name(), junction.column(*column))).collect()
                } else {
                    junction.foreign.iter().map(|(key, column)| Filter::ColEq(key.name(), junction.column(*column))).collect()
                };
                vec![
                    Join::with(kind, Arc::clone(&junction.ident), self.join_predicate(root)),
                    Join::with(kind, other, with_filter(conjunction(far_keys))),
                ]
            }
        }
    }

    fn child_is_root(&self, root: &str) -> bool {
        if root == self.parent.alias() {
            false
        } else if root == self.child.alias() {
            true
        } else {
            panic!(
                "relation `{}` links `{}` and `{}`, not `{root}`",
                self.name,
                self.parent.alias(),
                self.child.alias()
            )
        }
    }

    /// Fetch the related records of a single parent into its slot, without
    /// the batching of eager loading.
    ///
    /// # Errors
    ///
    /// Returns driver and decode errors.
    ///
    /// # Panics
    ///
    /// Panics when the child table is not bound to a database.
    pub async fn load(&self, parent: &mut P) -> Result<()> {
        let conn = self.child.ident().database().conn(None);
        self.load_in(&conn, parent).await
    }

    pub(crate) async fn load_in(&self, conn: &Conn, parent: &mut P) -> Result<()> {
        self.slot.clear(parent);

        let mut select = self.child.select();
        let mut predicates = Vec::new();
        match &self.link {
            Link::Direct(keys) => {
                for pair in keys.iter() {
                    let Some(predicate) = single_parent_predicate(pair, parent) else {
                        return Ok(());
                    };
                    predicates.push(predicate);
                }
            }
            Link::Junction(junction) => {
                let on = conjunction(
                    junction
                        .foreign
                        .iter()
                        .map(|(key, column)| Filter::ColEq(junction.column(*column), key.name()))
                        .collect(),
                );
                select = select.join(Join::with(JoinKind::Inner, Arc::clone(&junction.ident), on));
                for (key, column) in &junction.local {
                    let value = key.value(parent);
                    if value.is_null() {
                        return Ok(());
                    }
                    predicates.push(Filter::Eq(Operand::Column(junction.column(*column)), value));
                }
            }
        }
        if let Some(filter) = self.filter.clone() {
            predicates.push(filter);
        }

        let children = select.r#where(conjunction(predicates)).fetch_in(conn).await?;
        tracing::debug!(relation = self.name, children = children.len(), "loaded relation");
        for child in children {
            self.slot.attach(parent, child);
        }
        Ok(())
    }
}

fn direct_predicate<P: Record, C: Record>(pair: &KeyPair<P, C>, child_root: bool) -> Filter {
    let (local, foreign) = (pair.local.name(), pair.foreign.name());
    match (pair.local.spec().is_array(), pair.foreign.spec().is_array()) {
        (false, false) if child_root => Filter::ColEq(foreign, local),
        (false, false) => Filter::ColEq(local, foreign),
        (true, false) => Filter::ColArrayContains(local, foreign),
        (false, true) => Filter::ColArrayContains(foreign, local),
        (true, true) if child_root => Filter::ColArrayEq(foreign, local),
        (true, true) => Filter::ColArrayEq(local, foreign),
    }
}

/// Condition on the child's column for one parent, or `None` when the
/// parent's key cannot match anything.
fn single_parent_predicate<P: Record, C: Record>(pair: &KeyPair<P, C>, parent: &P) -> Option<Filter> {
    let value = pair.local.value(parent);
    let foreign = Operand::Column(pair.foreign.name());
    match (pair.local_array(), pair.foreign_array()) {
        (false, false) => (!value.is_null()).then(|| Filter::Eq(foreign, value)),
        (true, false) => {
            let values = value.flatten();
            (!values.is_empty()).then(|| Filter::In(foreign, values))
        }
        (false, true) => (!value.is_null()).then(|| Filter::ArrayContains(foreign, vec![value])),
        (true, true) => {
            let values = value.flatten();
            (!values.is_empty()).then(|| Filter::ArrayEq(foreign, values))
        }
    }
}

pub(crate) fn conjunction(mut predicates: Vec<Filter>) -> Filter {
    if predicates.len() == 1 {
        predicates.remove(0)
    } else {
        Filter::And(predicates)
    }
}

/// Cascading writes through a relation, walking only populated slots.
pub(crate) trait Cascade<P>: Send + Sync {
    /// Children are referenced by the parent and must exist first.
    fn child_first(&self) -> bool;

    fn insert<'a>(&'a self, conn: &'a Conn, parent: &'a mut P) -> BoxFuture<'a, Result<()>>;

    fn update<'a>(&'a self, conn: &'a Conn, parent: &'a P) -> BoxFuture<'a, Result<()>>;

    fn delete<'a>(&'a self, conn: &'a Conn, parent: &'a P) -> BoxFuture<'a, Result<()>>;
}

impl<P: Record, C: Record> Cascade<P> for Relation<P, C> {
    fn child_first(&self) -> bool {
        match &self.link {
            Link::Direct(keys) => {
                keys.iter().all(|pair| pair.foreign.spec().is_primary_key())
                    && !keys.iter().all(|pair| pair.local.spec().is_primary_key())
            }
            Link::Junction(_) => false,
        }
    }

    fn insert<'a>(&'a self, conn: &'a Conn, parent: &'a mut P) -> BoxFuture<'a, Result<()>> {
        async move {
            match &self.link {
                Link::Direct(keys) if self.child_first() => {
                    for child in self.slot.children_mut(parent) {
                        self.child.insert_in(conn, child, true).await?;
                    }
                    let referenced = self.slot.children(parent).first().map(|child| {
                        keys.iter()
                            .filter(|pair| !pair.local_array() && !pair.foreign_array())
                            .map(|pair| (Arc::clone(&pair.local), pair.foreign.value(child)))
                            .collect::<Vec<_>>()
                    });
                    for (local, value) in referenced.unwrap_or_default() {
                        local.set_value(parent, value)?;
                    }
                }
                Link::Direct(keys) => {
                    let inherited: Vec<(Arc<dyn AnyColumn<C>>, Value)> = keys
                        .iter()
                        .filter(|pair| !pair.local_array() && !pair.foreign_array())
                        .map(|pair| (Arc::clone(&pair.foreign), pair.local.value(parent)))
                        .collect();
                    for child in self.slot.children_mut(parent) {
                        for (foreign, value) in &inherited {
                            foreign.set_value(child, value.clone())?;
                        }
                        self.child.insert_in(conn, child, true).await?;
                    }
                }
                Link::Junction(junction) => {
                    let locals: Vec<Value> = junction.local.iter().map(|(key, _)| key.value(parent)).collect();
                    for child in self.slot.children_mut(parent) {
                        self.child.insert_in(conn, child, true).await?;
                        let foreigns = junction.foreign.iter().map(|(key, _)| key.value(child));
                        insert_junction_row(conn, junction, locals.iter().cloned().chain(foreigns).collect()).await?;
                    }
                }
            }
            Ok::<_, Error>(())
        }
        .boxed()
    }

    fn update<'a>(&'a self, conn: &'a Conn, parent: &'a P) -> BoxFuture<'a, Result<()>> {
        async move {
            for child in self.slot.children(parent) {
                self.child.update_in(conn, child, true).await?;
            }
            Ok::<_, Error>(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, conn: &'a Conn, parent: &'a P) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Link::Junction(junction) = &self.link {
                delete_junction_rows(conn, junction, parent).await?;
            }
            for child in self.slot.children(parent) {
                self.child.delete_in(conn, child, true).await?;
            }
            Ok::<_, Error>(())
        }
        .boxed()
    }
}

async fn insert_junction_row<P: Record, C: Record>(conn: &Conn, junction: &Junction<P, C>, values: Vec<Value>) -> Result<()> {
    let dialect = conn.dialect();
    let columns = junction.local.iter().map(|(_, c)| *c).chain(junction.foreign.iter().map(|(_, c)| *c));
    let mut statement = sea_query::Query::insert();
    statement
        .into_table(junction.ident.write_ref())
        .columns(columns.map(Alias::new))
        .values_panic(values.into_iter().map(|value| SimpleExpr::Value(value.into_sea())));
    let query = dialect.finish(statement.build(dialect.query_builder()))?;
    tracing::debug!(table = junction.name(), sql = %query.sql, "inserting junction row");
    conn.exec(query).await?;
    Ok(())
}

async fn delete_junction_rows<P: Record, C: Record>(conn: &Conn, junction: &Junction<P, C>, parent: &P) -> Result<()> {
    let dialect = conn.dialect();
    let ctx = RenderCtx { dialect, root: None };
    let mut statement = sea_query::Query::delete();
    statement.from_table(junction.ident.write_ref());
    for &(ref key, column) in &junction.local {
        let value = SimpleExpr::Value(key.value(parent).into_sea());
        statement.and_where(dialect.eq(ColumnName::new(column).render(&ctx), value));
    }
    let query = dialect.finish(statement.build(dialect.query_builder()))?;
    tracing::debug!(table = junction.name(), sql = %query.sql, "deleting junction rows");
    conn.exec(query).await?;
    Ok(())
}
