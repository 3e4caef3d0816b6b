//! Batched loading of related records.
//!
//! One query fetches the children of every parent at a relation level. The
//! children are then reconciled onto the parents either by comparing each
//! child against each parent, or through a hash index of parent keys when
//! there are enough parents and every key is scalar.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use sea_query::Order;

use crate::database::Conn;
use crate::error::{Error, Result};
use crate::filter::{ColumnName, Filter, Operand};
use crate::join::{Join, JoinKind};
use crate::relation::{Link, Relation, conjunction};
use crate::table::Record;
use crate::value::{ScalarKey, Value};

/// Prefix of the aliases junction-side keys are projected under.
const JUNCTION_KEY: &str = "__junction_";

/// A loader attaching related records onto already-fetched parents.
pub trait EagerLoad<P>: Send + Sync {
    /// Fetch and attach related records for every parent.
    fn load<'a>(&'a self, conn: &'a Conn, parents: &'a mut [P]) -> BoxFuture<'a, Result<()>>;
}

/// Eager-load request for one relation, with overrides for the child query
/// and nested requests for the children's own relations.
pub struct Eager<P, C> {
    relation: Relation<P, C>,
    filters: Vec<Filter>,
    order: Vec<(ColumnName, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    columns: Option<Vec<ColumnName>>,
    nested: Vec<Box<dyn EagerLoad<C>>>,
}

impl<P: Record, C: Record> Eager<P, C> {
    pub(crate) fn new(relation: Relation<P, C>) -> Self {
        Self {
            relation,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            columns: None,
            nested: Vec::new(),
        }
    }

    /// Restrict the children. Unqualified columns resolve to the child table.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        let mut filter = filter;
        filter.qualify(&self.relation.child().ident().alias_arc());
        self.filters.push(filter);
        self
    }

    /// Order the children ascending.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<ColumnName>) -> Self {
        self.order.push((column.into(), Order::Asc));
        self
    }

    /// Order the children descending.
    #[must_use]
    pub fn order_by_desc(mut self, column: impl Into<ColumnName>) -> Self {
        self.order.push((column.into(), Order::Desc));
        self
    }

    /// Cap the number of children fetched for the whole batch.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip children of the whole batch.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Fetch only these child columns. Join keys are always included.
    #[must_use]
    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnName>) -> Self {
        self.columns = Some(columns.into_iter().collect());
        self
    }

    /// Load a relation of the children before they are attached.
    #[must_use]
    pub fn with(mut self, nested: impl EagerLoad<C> + 'static) -> Self {
        self.nested.push(Box::new(nested));
        self
    }

    async fn load_level(&self, conn: &Conn, parents: &mut [P]) -> Result<()> {
        let relation = &self.relation;
        let slot = relation.slot();
        for parent in parents.iter_mut() {
            slot.clear(parent);
        }
        if parents.is_empty() {
            return Ok(());
        }

        let Some(batch) = self.fetch(conn, parents).await? else {
            tracing::debug!(relation = relation.name(), "no parent keys; skipping fetch");
            return Ok(());
        };
        let Batch { mut children, keys, arrays } = batch;

        for nested in &self.nested {
            nested.load(conn, &mut children).await?;
        }

        let parent_keys: Vec<Vec<Value>> = parents.iter().map(|parent| self.parent_key(parent)).collect();
        let threshold = conn.options().hash_join_threshold;
        let brute_force = parents.len() < threshold || arrays.iter().any(|&(local, foreign)| local || foreign);

        tracing::debug!(
            relation = relation.name(),
            parents = parents.len(),
            children = children.len(),
            strategy = if brute_force { "brute-force" } else { "hash" },
            "reconciling eager load"
        );

        let mut attached = 0usize;
        if brute_force {
            for (child, child_key) in children.iter().zip(&keys) {
                for (parent, parent_key) in parents.iter_mut().zip(&parent_keys) {
                    if keys_match(parent_key, child_key, &arrays) {
                        slot.attach(parent, child.clone());
                        attached += 1;
                    }
                }
            }
        } else {
            let mut index: IndexMap<JoinKey, Vec<usize>> = IndexMap::new();
            for (position, parent_key) in parent_keys.iter().enumerate() {
                if let Some(key) = JoinKey::new(parent_key) {
                    index.entry(key).or_default().push(position);
                }
            }
            for (child, child_key) in children.iter().zip(&keys) {
                let Some(matches) = JoinKey::new(child_key).and_then(|key| index.get(&key)) else {
                    continue;
                };
                for &position in matches {
                    slot.attach(&mut parents[position], child.clone());
                    attached += 1;
                }
            }
        }

        tracing::debug!(relation = relation.name(), attached, "attached related records");
        Ok(())
    }

    fn parent_key(&self, parent: &P) -> Vec<Value> {
        match self.relation.link() {
            Link::Direct(keys) => keys.iter().map(|pair| pair.local.value(parent)).collect(),
            Link::Junction(junction) => junction.local.iter().map(|(key, _)| key.value(parent)).collect(),
        }
    }

    /// Fetch the children of every parent, with the key values each child
    /// is reconciled by. `None` when no parent has a usable key.
    async fn fetch(&self, conn: &Conn, parents: &[P]) -> Result<Option<Batch<C>>> {
        let relation = &self.relation;
        let child = relation.child();
        let mut select = child.select();
        let mut predicates = Vec::new();
        let mut key_columns = Vec::new();

        let arrays: Vec<(bool, bool)> = match relation.link() {
            Link::Direct(keys) => {
                for pair in keys.iter() {
                    let values = distinct(parents.iter().map(|parent| pair.local.value(parent)), pair.local_array());
                    if values.is_empty() {
                        return Ok(None);
                    }
                    let foreign = Operand::Column(pair.foreign.name());
                    predicates.push(if pair.foreign_array() {
                        Filter::ArrayHasAny(foreign, values)
                    } else {
                        Filter::In(foreign, values)
                    });
                    key_columns.push(pair.foreign.name());
                }
                keys.iter().map(|pair| (pair.local_array(), pair.foreign_array())).collect()
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
                for (position, (key, column)) in junction.local.iter().enumerate() {
                    let values = distinct(parents.iter().map(|parent| key.value(parent)), false);
                    if values.is_empty() {
                        return Ok(None);
                    }
                    predicates.push(Filter::In(Operand::Column(junction.column(*column)), values));
                    select = select.extra_column(junction.column(*column), format!("{JUNCTION_KEY}{position}"));
                }
                key_columns.extend(junction.foreign.iter().map(|(key, _)| key.name()));
                vec![(false, false); junction.local.len()]
            }
        };

        if let Some(filter) = relation.filter().cloned() {
            predicates.push(filter);
        }
        predicates.extend(self.filters.iter().cloned());
        select = select.r#where(conjunction(predicates));

        if let Some(columns) = &self.columns {
            let mut projection = columns.clone();
            for key in key_columns {
                if !projection.iter().any(|column| column.name() == key.name()) {
                    projection.push(key);
                }
            }
            select = select.columns(projection);
        }
        for (column, order) in &self.order {
            select = match order {
                Order::Desc => select.order_by_desc(column.clone()),
                _ => select.order_by(column.clone()),
            };
        }
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select = select.offset(offset);
        }

        let rows = select.fetch_rows_in(conn).await?;
        let mut children = Vec::with_capacity(rows.len());
        let mut keys = Vec::with_capacity(rows.len());
        for (child, mut row) in rows {
            let key: Vec<Value> = match relation.link() {
                Link::Direct(pairs) => pairs.iter().map(|pair| pair.foreign.value(&child)).collect(),
                Link::Junction(junction) => (0..junction.local.len())
                    .map(|position| {
                        let alias = format!("{JUNCTION_KEY}{position}");
                        row.take(&alias).ok_or_else(|| Error::decode(&alias, "missing junction key"))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            children.push(child);
            keys.push(key);
        }
        Ok(Some(Batch { children, keys, arrays }))
    }
}

impl<P: Record, C: Record> EagerLoad<P> for Eager<P, C> {
    fn load<'a>(&'a self, conn: &'a Conn, parents: &'a mut [P]) -> BoxFuture<'a, Result<()>> {
        self.load_level(conn, parents).boxed()
    }
}

struct Batch<C> {
    children: Vec<C>,
    keys: Vec<Vec<Value>>,
    arrays: Vec<(bool, bool)>,
}

/// Distinct non-null key values across parents, flattening array keys.
fn distinct(values: impl Iterator<Item = Value>, flatten: bool) -> Vec<Value> {
    let mut seen: IndexMap<String, Value> = IndexMap::new();
    for value in values {
        let items = if flatten { value.flatten() } else { vec![value] };
        for item in items.into_iter().filter(|item| !item.is_null()) {
            let mut key = String::new();
            item.encode_key(&mut key);
            seen.entry(key).or_insert(item);
        }
    }
    seen.into_values().collect()
}

fn keys_match(parent: &[Value], child: &[Value], arrays: &[(bool, bool)]) -> bool {
    parent.iter().zip(child).zip(arrays).all(|((local, foreign), &(local_array, foreign_array))| {
        match (local_array, foreign_array) {
            (false, false) => local.key_eq(foreign),
            (true, false) => local.clone().flatten().iter().any(|item| item.key_eq(foreign)),
            (false, true) => foreign.clone().flatten().iter().any(|item| item.key_eq(local)),
            (true, true) => {
                let (left, right) = (local.clone().flatten(), foreign.clone().flatten());
                !left.is_empty()
                    && left.len() == right.len()
                    && left.iter().zip(&right).all(|(l, r)| l.key_eq(r))
            }
        }
    })
}

/// Hash-join key: the raw value for single hashable keys, otherwise the
/// length-prefixed encoding of every key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Scalar(ScalarKey),
    Encoded(String),
}

impl JoinKey {
    fn new(values: &[Value]) -> Option<Self> {
        if values.iter().any(Value::is_null) {
            return None;
        }
        if let [single] = values {
            if let Some(key) = single.scalar_key() {
                return Some(Self::Scalar(key));
            }
        }
        let mut encoded = String::new();
        for value in values {
            value.encode_key(&mut encoded);
        }
        Some(Self::Encoded(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_values_skip_nulls_and_flatten() {
        let values = vec![
            Value::Int64(1),
            Value::Null,
            Value::Int32(1),
            Value::Int64(2),
        ];
        assert_eq!(distinct(values.into_iter(), false), vec![Value::Int64(1), Value::Int64(2)]);

        let arrays = vec![
            Value::Array(vec![Value::Int64(1), Value::Int64(2)]),
            Value::Array(vec![Value::Int64(2), Value::Int64(3)]),
        ];
        assert_eq!(
            distinct(arrays.into_iter(), true),
            vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]
        );
    }

    #[test]
    fn containment_matching() {
        let parent = [Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)])];
        let local_array = [(true, false)];
        assert!(keys_match(&parent, &[Value::Int64(2)], &local_array));
        assert!(!keys_match(&parent, &[Value::Int64(4)], &local_array));

        let both = [(true, true)];
        let empty = [Value::Array(Vec::new())];
        assert!(!keys_match(&empty, &empty, &both));
        assert!(keys_match(&parent, &parent, &both));
    }

    #[test]
    fn join_keys() {
        assert_eq!(JoinKey::new(&[Value::Int32(5)]), JoinKey::new(&[Value::Int64(5)]));
        assert_eq!(JoinKey::new(&[Value::Null]), None);
        assert!(matches!(
            JoinKey::new(&[Value::Int64(1), Value::from("a")]),
            Some(JoinKey::Encoded(_))
        ));
        assert!(matches!(JoinKey::new(&[Value::Double(1.5)]), Some(JoinKey::Encoded(_))));
    }
}
