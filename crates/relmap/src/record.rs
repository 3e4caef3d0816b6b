//! Declarative table definitions.
//!
//! [`table!`](crate::table) expands one declaration into the record struct,
//! its descriptor with a typed [`Column`](crate::Column) per field, and the
//! [`Descriptor`](crate::Descriptor) wiring. Relation slots live on the
//! record but carry no column.
//!
//! ```ignore
//! relmap::table! {
//!     table = "posts",
//!     descriptor = Posts,
//!     #[derive(Debug, Clone, Default)]
//!     pub struct Post {
//!         pub id: i64 => [primary_key, auto_increment],
//!         pub author_id: i64,
//!         pub title: String => [db_name = "headline"],
//!         pub tags: Vec<String>,
//!     }
//!     relations {
//!         pub author: One<User>,
//!     }
//! }
//! ```
//!
//! Column flags are the [`ColumnSpec`](crate::ColumnSpec) builder methods.
//! The record must implement `Default`; it is the descriptor's factory.

/// Declare a table: record struct, descriptor struct, and their wiring.
#[macro_export]
macro_rules! table {
    (
        table = $table:literal,
        descriptor = $descriptor:ident,
        $(#[$meta:meta])*
        $vis:vis struct $record:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty $( => [ $( $flag:ident $( = $arg:literal )? ),* $(,)? ] )?
            ),* $(,)?
        }
        $(
            relations {
                $(
                    $(#[$rel_meta:meta])*
                    pub $rel:ident : $rel_ty:ty
                ),* $(,)?
            }
        )?
    ) => {
        #[allow(missing_docs)]
        $(#[$meta])*
        $vis struct $record {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
            $($(
                $(#[$rel_meta])*
                pub $rel: $rel_ty,
            )*)?
        }

        #[allow(missing_docs)]
        #[derive(Debug, Clone)]
        $vis struct $descriptor {
            table: $crate::Table<$record>,
            $( pub $field: $crate::Column<$record, $ty>, )*
        }

        impl $crate::Descriptor for $descriptor {
            type Record = $record;

            const NAME: &'static str = $table;

            #[allow(unused_assignments)]
            fn from_binding(ident: ::std::sync::Arc<$crate::TableIdent>) -> Self {
                let mut position = 0;
                $(
                    let $field: $crate::Column<$record, $ty> = $crate::Column::new(
                        &ident,
                        $crate::ColumnSpec::new(stringify!($field), position) $($( .$flag($($arg)?) )*)?,
                        |record| &record.$field,
                        |record| &mut record.$field,
                    );
                    position += 1;
                )*
                let columns: ::std::vec::Vec<::std::sync::Arc<dyn $crate::AnyColumn<$record>>> =
                    vec![$( ::std::sync::Arc::new($field.clone()) ),*];
                Self {
                    table: $crate::Table::new(ident, columns, <$record as ::std::default::Default>::default),
                    $( $field, )*
                }
            }

            fn table(&self) -> &$crate::Table<$record> {
                &self.table
            }

            fn table_mut(&mut self) -> &mut $crate::Table<$record> {
                &mut self.table
            }
        }

        impl $descriptor {
            /// Unbound descriptor aliased by the lower-camel-cased table name.
            #[must_use]
            pub fn new() -> Self {
                <Self as $crate::Descriptor>::from_binding(::std::sync::Arc::new($crate::TableIdent::new($table)))
            }
        }

        impl ::std::default::Default for $descriptor {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::ops::Deref for $descriptor {
            type Target = $crate::Table<$record>;

            fn deref(&self) -> &Self::Target {
                &self.table
            }
        }
    };
}

/// Accessors for a relation slot field: `slot!(User, posts)`.
#[macro_export]
macro_rules! slot {
    ($record:ty, $field:ident) => {
        $crate::Slot::new(
            |record: &$record| &record.$field,
            |record: &mut $record| &mut record.$field,
        )
    };
}
