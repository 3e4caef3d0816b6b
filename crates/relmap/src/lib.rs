//! Typed relational mapping for SQL databases.
//!
//! Tables are declared once with [`table!`], bound to a dialect and an
//! executor through [`Database::builder`], and queried through typed
//! columns. Relations between tables load in batches: one extra query per
//! relation level, however many parents were fetched.
//!
//! # Quick Start
//!
//! ## Declare tables
//!
//! ```ignore
//! use relmap::{Many, One, table};
//!
//! table! {
//!     table = "users",
//!     descriptor = Users,
//!     #[derive(Debug, Clone, Default)]
//!     pub struct User {
//!         pub id: i64 => [primary_key, auto_increment],
//!         pub email: String => [unique],
//!         pub name: String,
//!     }
//!     relations {
//!         pub posts: Many<Post>,
//!     }
//! }
//!
//! table! {
//!     table = "posts",
//!     descriptor = Posts,
//!     #[derive(Debug, Clone, Default)]
//!     pub struct Post {
//!         pub id: i64 => [primary_key, auto_increment],
//!         pub author_id: i64,
//!         pub title: String,
//!         pub published: bool,
//!     }
//!     relations {
//!         pub author: One<User>,
//!     }
//! }
//! ```
//!
//! ## Bind and relate
//!
//! ```ignore
//! use relmap::{Database, KeyPair, Relation, Sqlite, slot};
//!
//! let users = Users::new();
//! let posts = Posts::new();
//! let user_posts =
//!     Relation::to_many("posts", &posts, vec![KeyPair::new(&users.id, &posts.author_id)], slot!(User, posts));
//!
//! let db = Database::builder(Sqlite, executor)
//!     .table(&users)
//!     .table(&posts)
//!     .relation(&user_posts)
//!     .build();
//! ```
//!
//! ## Query
//!
//! ```ignore
//! // Typed predicates, eager loading, one query per level
//! let authors = users
//!     .select()
//!     .r#where(users.name.like("A%"))
//!     .order_by(&users.name)
//!     .eager(user_posts.eager().r#where(posts.published.eq(true)).order_by_desc(&posts.id))
//!     .fetch()
//!     .await?;
//!
//! // Single rows
//! let user = users.select().r#where(users.id.eq(7)).fetch_one().await?;
//! let count = users.select().count().await?;
//! ```
//!
//! ## Write
//!
//! ```ignore
//! use relmap::WriteOptions;
//!
//! let mut user = User { name: "Ada".into(), email: "ada@example.com".into(), ..User::default() };
//! user.posts.push(Post { title: "Notes".into(), ..Post::default() });
//!
//! // Inserts the user, then the post with `author_id` set from the new id
//! users.insert(&mut user, &WriteOptions::default().cascading(true)).await?;
//!
//! users.update_by_primary_key(&user, &WriteOptions::default()).await?;
//! users.delete_by_primary_key(&user, &WriteOptions::default().cascading(true)).await?;
//! ```
//!
//! ## Upserts
//!
//! ```ignore
//! InsertBuilder::new(&users)
//!     .set("email", "test@example.com")
//!     .set("name", "John Doe")
//!     .on_conflict("email")
//!     .do_update(&["name"])
//!     .execute()
//!     .await?;
//! // INSERT INTO "users" ("email", "name") VALUES ($1, $2)
//! //     ON CONFLICT ("email") DO UPDATE SET "name" = "excluded"."name"
//! ```

mod column;
mod database;
mod delete;
mod dialect;
mod eager;
mod error;
mod executor;
mod filter;
mod insert;
mod join;
mod mutation;
mod options;
mod record;
mod relation;
mod scan;
mod select;
mod table;
mod update;
mod value;

pub use column::{AnyColumn, Column, ColumnSpec, InsertValue};
pub use database::{Conn, Database, DatabaseBuilder};
pub use delete::DeleteBuilder;
pub use dialect::{AggregateFn, Dialect, LastInsertId, MySql, Postgres, Query, QueryBuilder, Sqlite};
pub use eager::{Eager, EagerLoad};
pub use error::{Error, Result};
pub use executor::{ExecResult, Executor, Field, FutureResult, Row};
pub use filter::{Aggregate, ColumnName, Filter, Operand};
pub use insert::InsertBuilder;
pub use join::{Join, JoinKind};
pub use mutation::WriteOptions;
pub use options::Options;
pub use relation::{Junction, KeyPair, Many, One, Relation, RelationSlot, Slot};
pub use select::SelectBuilder;
pub use table::{Descriptor, Record, Table, TableIdent};
pub use update::UpdateBuilder;
pub use value::{ColumnValue, Value};
pub use sea_query;
