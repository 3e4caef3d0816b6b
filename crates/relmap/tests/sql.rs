//! Generated SQL for the Postgres dialect.
//!
//! Statements are rendered against a recording executor; the canned
//! responses stand in for what the server would return.

#![allow(missing_docs)]

mod common;

use std::time::Duration;

use common::{Fixture, Users, assert_sql_contains, post, row, user};
use futures::FutureExt;
use relmap::{
    Database, DeleteBuilder, Descriptor, Error, ExecResult, Executor, Filter, FutureResult, InsertBuilder,
    Options, Postgres, Row, UpdateBuilder, Value, WriteOptions,
};

/// Executor whose statements never complete.
#[derive(Debug)]
struct Stalled;

impl Executor for Stalled {
    fn query(&self, _sql: String, _params: Vec<Value>) -> FutureResult<Vec<Row>> {
        futures::future::pending().boxed()
    }

    fn exec(&self, _sql: String, _params: Vec<Value>) -> FutureResult<ExecResult> {
        futures::future::pending().boxed()
    }
}

// SELECT tests

#[test]
fn select_basic() {
    let fx = Fixture::postgres();
    let query = fx.users.select().to_sql().unwrap();

    assert_sql_contains(&query.sql, &["SELECT users.id, users.name, users.email, users.active", "FROM users"]);
    assert_eq!(query.params.len(), 0);
}

#[test]
fn select_with_ordering_and_limits() {
    let fx = Fixture::postgres();
    let users = &fx.users;
    let query = users
        .select()
        .r#where(users.active.eq(true))
        .r#where(users.id.gt(100))
        .order_by(&users.id)
        .order_by_desc(&users.name)
        .limit(10)
        .offset(5)
        .to_sql()
        .unwrap();

    assert_sql_contains(
        &query.sql,
        &[
            "SELECT users.id, users.name, users.email, users.active",
            "WHERE ((users.active) = ($1)) AND ((users.id) > ($2))",
            "ORDER BY users.id ASC, users.name DESC",
            "LIMIT $3",
            "OFFSET $4",
        ],
    );
    assert_eq!(
        query.params,
        [Value::Bool(true), Value::Int64(100), Value::Uint64(10), Value::Uint64(5)]
    );
}

#[test]
fn select_with_or_filter() {
    let fx = Fixture::postgres();
    let users = &fx.users;
    let query = users.select().r#where(users.active.eq(true).or(users.id.gt(100))).to_sql().unwrap();

    assert_sql_contains(&query.sql, &["WHERE ((users.active) = ($1)) OR ((users.id) > ($2))"]);
}

#[test]
fn select_with_projection() {
    let fx = Fixture::postgres();
    let users = &fx.users;
    let query = users.select().columns([users.id.name(), users.email.name()]).to_sql().unwrap();

    assert_sql_contains(&query.sql, &["SELECT users.id, users.email", "FROM users"]);
    assert!(!query.sql.contains("active"), "{}", query.sql);
}

#[test]
fn unknown_columns_are_reported() {
    let fx = Fixture::postgres();
    let err = fx.users.select().r#where(Filter::eq("nickname", "ada")).to_sql().unwrap_err();

    assert!(
        matches!(&err, Error::InvalidField { table, field } if table == "users" && field == "nickname"),
        "{err:?}"
    );

    let err = fx.users.select().columns_by_name(&["id", "nickname"]).to_sql().unwrap_err();
    assert!(matches!(err, Error::InvalidField { .. }), "{err:?}");
}

#[test]
fn select_joins_relation() {
    let fx = Fixture::postgres();
    let query = fx.posts.select().join_relation(&fx.post_author).r#where(fx.users.active.eq(true)).to_sql().unwrap();

    assert_sql_contains(
        &query.sql,
        &[
            "SELECT posts.id, posts.author_id, posts.title, posts.published, posts.tag_ids",
            "FROM posts",
            "INNER JOIN users ON (posts.author_id) = (users.id)",
            "WHERE (users.active) = ($1)",
        ],
    );
}

#[test]
fn select_joins_through_junction() {
    let fx = Fixture::postgres();
    let query = fx.users.select().left_join_relation(&fx.user_teams).to_sql().unwrap();

    assert_sql_contains(
        &query.sql,
        &[
            "FROM users",
            "LEFT JOIN memberships ON (users.id) = (memberships.user_id)",
            "LEFT JOIN teams ON (teams.id) = (memberships.team_id)",
        ],
    );
}

#[test]
fn select_with_value_lists() {
    let fx = Fixture::postgres();
    let users = &fx.users;
    let query = users
        .select()
        .r#where(users.id.is_in([1_i64, 2, 3]))
        .r#where(users.name.not_in(["x", "y"]))
        .to_sql()
        .unwrap();

    assert_sql_contains(
        &query.sql,
        &["WHERE ((users.id) IN ($1, $2, $3)) AND ((users.name) NOT IN ($4, $5))"],
    );
    assert_eq!(query.params[..3], [Value::Int64(1), Value::Int64(2), Value::Int64(3)]);

    let fx = Fixture::sqlite(Options::default());
    let query = fx.users.select().r#where(fx.users.id.is_in([1_i64, 2])).to_sql().unwrap();
    assert_sql_contains(&query.sql, &["WHERE (users.id) IN (?, ?)"]);
}

#[test]
fn from_clause_quotes_schema_and_alias() {
    let fx = Fixture::postgres();
    assert_eq!(fx.users.from_clause(), "\"users\"");
    assert_eq!(fx.users.with_alias("author").from_clause(), "\"users\" AS \"author\"");
    assert_eq!(fx.users.with_schema("tenant").from_clause(), "\"tenant\".\"users\"");

    let fx = Fixture::mysql();
    assert_eq!(fx.users.from_clause(), "`users`");
}

#[test]
fn inverse_relations_join_through_the_same_keys() {
    let fx = Fixture::postgres();
    assert!(!fx.post_author.is_to_many());
    assert!(fx.team_members.is_to_many());

    let query = fx.posts.select().join_relation(&fx.post_author).to_sql().unwrap();
    assert_sql_contains(&query.sql, &["FROM posts", "INNER JOIN users ON (posts.author_id) = (users.id)"]);

    let query = fx.teams.select().join_relation(&fx.team_members).r#where(fx.users.active.eq(true)).to_sql().unwrap();
    assert_sql_contains(
        &query.sql,
        &[
            "FROM teams",
            "INNER JOIN memberships ON (teams.id) = (memberships.team_id)",
            "INNER JOIN users ON (users.id) = (memberships.user_id)",
            "WHERE (users.active) = ($1)",
        ],
    );
}

#[test]
#[should_panic(expected = "starts from `users`, not `writer`")]
fn inverse_relations_start_from_the_parent_table() {
    let fx = Fixture::postgres();
    let writer = fx.users.with_alias("writer");
    let _ = fx.user_posts.inverse_one("author", &writer, relmap::slot!(common::Post, author));
}

#[test]
fn array_predicates_use_native_operators() {
    let fx = Fixture::postgres();
    let posts = &fx.posts;
    let query = posts.select().r#where(posts.tag_ids.array_contains(vec![1_i64, 2])).to_sql().unwrap();

    assert_sql_contains(&query.sql, &["WHERE", "posts.tag_ids", "@>", "$1"]);
    assert_eq!(query.params, [Value::Array(vec![Value::Int64(1), Value::Int64(2)])]);
}

#[test]
fn views_add_their_filter() {
    let fx = Fixture::postgres();
    let active = fx.users.view(fx.users.active.eq(true));
    let query = active.select().r#where(active.name.like("A%")).to_sql().unwrap();

    assert_sql_contains(&query.sql, &["FROM users", "WHERE ((users.active) = ($1)) AND", "users.name", "LIKE"]);
}

#[tokio::test]
async fn count_wraps_paginated_queries() {
    let fx = Fixture::postgres();
    fx.recorder.respond(vec![row(&[("count", Value::Int64(3))])]);

    let count = fx.users.select().r#where(fx.users.active.eq(true)).limit(3).count().await.unwrap();

    assert_eq!(count, 3);
    let statements = fx.recorder.statements();
    assert_eq!(statements.len(), 1);
    assert_sql_contains(&statements[0], &["SELECT COUNT(*) AS count", "FROM (SELECT users.id", "LIMIT $2", "AS counted"]);
}

#[tokio::test]
async fn eager_loading_issues_one_query_per_level() {
    let fx = Fixture::postgres();
    let (users, posts) = (&fx.users, &fx.posts);
    fx.recorder.respond(vec![
        row(&[
            ("id", Value::Int64(1)),
            ("name", Value::Str("Ada".into())),
            ("email", Value::Str("ada@example.com".into())),
            ("active", Value::Bool(true)),
        ]),
        row(&[
            ("id", Value::Int64(2)),
            ("name", Value::Str("Bob".into())),
            ("email", Value::Str("bob@example.com".into())),
            ("active", Value::Bool(true)),
        ]),
    ]);
    let post_row = |id: i64, author: i64| {
        row(&[
            ("id", Value::Int64(id)),
            ("author_id", Value::Int64(author)),
            ("title", Value::Str(format!("post {id}"))),
            ("published", Value::Bool(true)),
            ("tag_ids", Value::Array(Vec::new())),
        ])
    };
    fx.recorder.respond(vec![post_row(10, 1), post_row(11, 2), post_row(12, 1)]);

    let loaded = users
        .select()
        .eager(fx.user_posts.eager().r#where(posts.published.eq(true)))
        .fetch()
        .await
        .unwrap();

    let statements = fx.recorder.statements();
    assert_eq!(statements.len(), 2);
    assert_sql_contains(&statements[1], &["FROM posts", "WHERE", "(posts.author_id) IN ($1, $2)", "posts.published"]);
    assert_eq!(fx.recorder.params()[1][..2], [Value::Int64(1), Value::Int64(2)]);

    let titles: Vec<Vec<&str>> =
        loaded.iter().map(|user| user.posts.iter().map(|post| post.title.as_str()).collect()).collect();
    assert_eq!(titles, [vec!["post 10", "post 12"], vec!["post 11"]]);
}

#[tokio::test]
async fn eager_loading_skips_fetch_without_parents() {
    let fx = Fixture::postgres();
    let loaded = fx.users.select().eager(fx.user_posts.eager()).fetch().await.unwrap();

    assert!(loaded.is_empty());
    assert_eq!(fx.recorder.count(), 1);
}

// INSERT tests

#[test]
fn insert_basic() {
    let fx = Fixture::postgres();
    let query = InsertBuilder::new(&fx.tags).set("id", 1_i64).set("label", "rust").build().unwrap();

    assert_sql_contains(&query.sql, &["INSERT INTO tags (id, label) VALUES ($1, $2)"]);
    assert_eq!(query.params, [Value::Int64(1), Value::Str("rust".into())]);
}

#[test]
fn insert_from_record_skips_generated_key() {
    let fx = Fixture::postgres();
    let query = InsertBuilder::from_record(&fx.users, &user("Ada")).build().unwrap();

    assert_sql_contains(&query.sql, &["INSERT INTO users (name, email, active) VALUES ($1, $2, $3)"]);
    assert_eq!(query.params.len(), 3);
}

#[test]
fn insert_with_upsert() {
    let fx = Fixture::postgres();
    let query = InsertBuilder::new(&fx.users)
        .set("email", "ada@example.com")
        .set("name", "Ada")
        .on_conflict("email")
        .do_update(&["name"])
        .build()
        .unwrap();

    assert_sql_contains(
        &query.sql,
        &[
            "INSERT INTO users (email, name) VALUES ($1, $2)",
            "ON CONFLICT (email)",
            "DO UPDATE",
            "SET name = excluded.name",
        ],
    );
}

#[test]
fn insert_upsert_do_nothing() {
    let fx = Fixture::postgres();
    let query = InsertBuilder::new(&fx.tags).set("id", 3_i64).on_conflict("id").do_nothing().build().unwrap();

    assert_sql_contains(&query.sql, &["INSERT INTO tags (id) VALUES ($1)", "ON CONFLICT (id) DO NOTHING"]);
}

#[test]
fn insert_rejects_unknown_columns() {
    let fx = Fixture::postgres();
    let err = InsertBuilder::new(&fx.users).set("nickname", "ada").build().unwrap_err();

    assert!(matches!(err, Error::InvalidField { .. }), "{err:?}");
}

#[test]
fn upserts_are_unsupported_on_mysql() {
    let fx = Fixture::mysql();
    let err = InsertBuilder::new(&fx.users)
        .set("email", "ada@example.com")
        .on_conflict("email")
        .do_update_all()
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
}

#[tokio::test]
async fn insert_reads_generated_key_by_returning() {
    let fx = Fixture::postgres();
    fx.recorder.respond(vec![row(&[("id", Value::Int64(42))])]);

    let mut ada = user("Ada");
    fx.users.insert(&mut ada, &WriteOptions::default()).await.unwrap();

    assert_eq!(ada.id, 42);
    assert_sql_contains(
        &fx.recorder.statements()[0],
        &["INSERT INTO users (name, email, active) VALUES ($1, $2, $3)", "RETURNING id"],
    );
}

#[tokio::test]
async fn insert_all_batches_in_chunks() {
    let fx = Fixture::postgres_with(Options {
        insert_chunk_size: 2,
        ..Options::default()
    });
    fx.recorder.respond(vec![row(&[("id", Value::Int64(10))]), row(&[("id", Value::Int64(11))])]);
    fx.recorder.respond(vec![row(&[("id", Value::Int64(12))])]);

    let mut batch = vec![user("Ada"), user("Bob"), user("Cy")];
    fx.users.insert_all(&mut batch, &WriteOptions::default()).await.unwrap();

    let ids: Vec<i64> = batch.iter().map(|user| user.id).collect();
    assert_eq!(ids, [10, 11, 12]);

    let statements = fx.recorder.statements();
    assert_eq!(statements.len(), 2);
    assert_sql_contains(
        &statements[0],
        &[
            "INSERT INTO users (id, name, email, active)",
            "VALUES (DEFAULT, $1, $2, $3), (DEFAULT, $4, $5, $6)",
            "RETURNING id",
        ],
    );
    assert_sql_contains(&statements[1], &["VALUES (DEFAULT, $1, $2, $3)", "RETURNING id"]);
}

#[tokio::test]
async fn insert_all_rejects_cascading() {
    let fx = Fixture::postgres();
    let mut batch = vec![user("Ada")];
    let err = fx.users.insert_all(&mut batch, &WriteOptions::default().cascading(true)).await.unwrap_err();

    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
    assert_eq!(fx.recorder.count(), 0);
}

#[tokio::test]
async fn cascading_insert_sets_foreign_keys() {
    let fx = Fixture::postgres();
    fx.recorder.respond(vec![row(&[("id", Value::Int64(7))])]);
    fx.recorder.respond(vec![row(&[("id", Value::Int64(70))])]);
    fx.recorder.respond(vec![row(&[("id", Value::Int64(71))])]);

    let mut ada = user("Ada");
    ada.posts = vec![post(0, "first"), post(0, "second")];
    fx.users.insert(&mut ada, &WriteOptions::default().cascading(true)).await.unwrap();

    assert_eq!(ada.id, 7);
    let keys: Vec<(i64, i64)> = ada.posts.iter().map(|post| (post.id, post.author_id)).collect();
    assert_eq!(keys, [(70, 7), (71, 7)]);

    let statements = fx.recorder.statements();
    assert_eq!(statements.len(), 3);
    assert_sql_contains(&statements[1], &["INSERT INTO posts (author_id, title, published, tag_ids)"]);
    assert_eq!(fx.recorder.params()[1][0], Value::Int64(7));
}

// UPDATE tests

#[test]
fn update_basic() {
    let fx = Fixture::postgres();
    let query = UpdateBuilder::new(&fx.users).set("name", "Ada").r#where(Filter::eq("id", 7_i64)).build().unwrap();

    assert_sql_contains(&query.sql, &["UPDATE users", "SET name = $1", "WHERE (id) = ($2)"]);
    assert_eq!(query.params, [Value::Str("Ada".into()), Value::Int64(7)]);
}

#[test]
fn update_with_returning() {
    let fx = Fixture::postgres();
    let query = UpdateBuilder::new(&fx.users)
        .set("active", false)
        .r#where(Filter::eq("id", 7_i64))
        .returning("email")
        .build()
        .unwrap();

    assert_sql_contains(&query.sql, &["UPDATE users", "SET active = $1", "WHERE (id) = ($2)", "RETURNING email"]);
}

#[tokio::test]
async fn update_by_primary_key_sets_other_columns() {
    let fx = Fixture::postgres();
    let ada = common::User { id: 7, ..user("Ada") };

    let updated = fx.users.update_by_primary_key(&ada, &WriteOptions::default()).await.unwrap();

    assert_eq!(updated, 1);
    assert_sql_contains(
        &fx.recorder.statements()[0],
        &["UPDATE users", "SET name = $1, email = $2, active = $3", "WHERE (id) = ($4)"],
    );
}

// DELETE tests

#[test]
fn delete_basic() {
    let fx = Fixture::postgres();
    let query = DeleteBuilder::new(&fx.posts).r#where(Filter::eq("author_id", 7_i64)).returning("id").build().unwrap();

    assert_sql_contains(&query.sql, &["DELETE FROM posts", "WHERE (author_id) = ($1)", "RETURNING id"]);
}

#[tokio::test]
async fn delete_by_primary_key() {
    let fx = Fixture::postgres();
    let ada = common::User { id: 7, ..user("Ada") };

    fx.users.delete_by_primary_key(&ada, &WriteOptions::default()).await.unwrap();

    assert_sql_contains(&fx.recorder.statements()[0], &["DELETE FROM users", "WHERE (id) = ($1)"]);
    assert_eq!(fx.recorder.params()[0], [Value::Int64(7)]);
}

#[tokio::test]
async fn views_are_read_only() {
    let fx = Fixture::postgres();
    let active = fx.users.view(fx.users.active.eq(true));
    let mut ada = user("Ada");

    let err = InsertBuilder::new(&active).set("name", "Ada").build().unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");

    let err = active.insert(&mut ada, &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");

    let err = DeleteBuilder::new(&active).build().unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
    assert_eq!(fx.recorder.count(), 0);
}

#[tokio::test]
async fn fast_scan_requires_the_full_projection() {
    let fx = Fixture::postgres();
    let users = &fx.users;
    let err = users.select().columns([users.id.name(), users.name.name()]).fast_scan().fetch().await.unwrap_err();

    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
    assert_eq!(fx.recorder.count(), 0);
}

#[tokio::test]
async fn statement_timeout_cancels_round_trips() {
    let users = Users::new();
    let _db = Database::builder(Postgres, Stalled)
        .options(Options {
            statement_timeout: Some(Duration::from_millis(20)),
            ..Options::default()
        })
        .table(&users)
        .build();

    let err = users.select().fetch().await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");

    let err = users.insert(&mut user("Ada"), &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
}
