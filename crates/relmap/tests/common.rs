//! Common test helpers shared across integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use relmap::{
    Database, Dialect, ExecResult, Executor, Field, FutureResult, Junction, KeyPair, Many, MySql,
    One, Options, Postgres, Relation, Row, Sqlite, Value, slot, table,
};
use relmap_sqlite::SqliteExecutor;

// Common test tables used across multiple test files

table! {
    table = "users",
    descriptor = Users,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct User {
        pub id: i64 => [primary_key, auto_increment],
        pub name: String,
        pub email: String => [unique],
        pub active: bool,
    }
    relations {
        pub posts: Many<Post>,
        pub teams: Many<Team>,
    }
}

table! {
    table = "posts",
    descriptor = Posts,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Post {
        pub id: i64 => [primary_key, auto_increment],
        pub author_id: i64,
        pub title: String,
        pub published: bool,
        pub tag_ids: Vec<i64>,
    }
    relations {
        pub author: One<User>,
        pub tags: Many<Tag>,
        pub comments: Many<Comment>,
    }
}

table! {
    table = "tags",
    descriptor = Tags,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Tag {
        pub id: i64 => [primary_key],
        pub label: String,
    }
}

table! {
    table = "comments",
    descriptor = Comments,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Comment {
        pub id: i64 => [primary_key, auto_increment],
        pub post_id: i64,
        pub body: String,
    }
}

table! {
    table = "teams",
    descriptor = Teams,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Team {
        pub id: i64 => [primary_key, auto_increment],
        pub name: String,
    }
    relations {
        pub members: Many<User>,
    }
}

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        active INTEGER NOT NULL
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        published INTEGER NOT NULL,
        tag_ids TEXT NOT NULL DEFAULT '[]'
    );
    CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        post_id INTEGER NOT NULL,
        body TEXT NOT NULL
    );
    CREATE TABLE teams (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
    CREATE TABLE memberships (user_id INTEGER NOT NULL, team_id INTEGER NOT NULL);
";

/// Executor that records every statement. Wraps a `SQLite` connection, or
/// answers queries from a queue of canned result sets when there is none.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Option<SqliteExecutor>,
    log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    responses: Arc<Mutex<VecDeque<Vec<Row>>>>,
}

impl Recorder {
    pub fn sqlite() -> Self {
        let inner = SqliteExecutor::in_memory().expect("open in-memory database");
        inner.execute_batch(SCHEMA).expect("create schema");
        Self {
            inner: Some(inner),
            ..Self::default()
        }
    }

    /// Queue the rows returned by the next query.
    pub fn respond(&self, rows: Vec<Row>) {
        self.responses.lock().push_back(rows);
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params(&self) -> Vec<Vec<Value>> {
        self.log.lock().iter().map(|(_, params)| params.clone()).collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Statements run since the last [`Recorder::clear`].
    pub fn count(&self) -> usize {
        self.log.lock().len()
    }
}

impl Executor for Recorder {
    fn query(&self, sql: String, params: Vec<Value>) -> FutureResult<Vec<Row>> {
        self.log.lock().push((sql.clone(), params.clone()));
        if let Some(inner) = &self.inner {
            return inner.query(sql, params);
        }
        let rows = self.responses.lock().pop_front().unwrap_or_default();
        async move { Ok::<_, anyhow::Error>(rows) }.boxed()
    }

    fn exec(&self, sql: String, params: Vec<Value>) -> FutureResult<ExecResult> {
        self.log.lock().push((sql.clone(), params.clone()));
        if let Some(inner) = &self.inner {
            return inner.exec(sql, params);
        }
        async move {
            Ok::<_, anyhow::Error>(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            })
        }
        .boxed()
    }
}

/// A row of named fields.
pub fn row(fields: &[(&str, Value)]) -> Row {
    Row {
        fields: fields
            .iter()
            .map(|(name, value)| Field {
                name: (*name).to_string(),
                value: value.clone(),
            })
            .collect(),
    }
}

/// Tables and relations bound to one database.
pub struct Fixture {
    pub db: Arc<Database>,
    pub recorder: Recorder,
    pub users: Users,
    pub posts: Posts,
    pub tags: Tags,
    pub comments: Comments,
    pub teams: Teams,
    pub user_posts: Relation<User, Post>,
    pub user_teams: Relation<User, Team>,
    pub team_members: Relation<Team, User>,
    pub post_author: Relation<Post, User>,
    pub post_tags: Relation<Post, Tag>,
    pub post_comments: Relation<Post, Comment>,
}

impl Fixture {
    /// In-memory `SQLite` database with the test schema.
    pub fn sqlite(options: Options) -> Self {
        Self::bind(Sqlite, Recorder::sqlite(), options)
    }

    /// Postgres dialect over a [`Recorder`] with canned responses.
    pub fn postgres() -> Self {
        Self::postgres_with(Options::default())
    }

    pub fn postgres_with(options: Options) -> Self {
        Self::bind(Postgres, Recorder::default(), options)
    }

    pub fn mysql() -> Self {
        Self::bind(MySql, Recorder::default(), Options::default())
    }

    fn bind(dialect: impl Dialect, recorder: Recorder, options: Options) -> Self {
        init_tracing();
        let users = Users::new();
        let posts = Posts::new();
        let tags = Tags::new();
        let comments = Comments::new();
        let teams = Teams::new();

        let user_posts = Relation::to_many(
            "posts",
            &posts,
            vec![KeyPair::new(&users.id, &posts.author_id)],
            slot!(User, posts),
        );
        let user_teams = Relation::many_to_many(
            "teams",
            &teams,
            Junction::new("memberships").local(&users.id, "user_id").foreign(&teams.id, "team_id"),
            slot!(User, teams),
        );
        let team_members = user_teams.inverse_many("members", &users, slot!(Team, members));
        let post_author = user_posts.inverse_one("author", &users, slot!(Post, author));
        let post_tags =
            Relation::to_many("tags", &tags, vec![KeyPair::new(&posts.tag_ids, &tags.id)], slot!(Post, tags));
        let post_comments = Relation::to_many(
            "comments",
            &comments,
            vec![KeyPair::new(&posts.id, &comments.post_id)],
            slot!(Post, comments),
        );

        let db = Database::builder(dialect, recorder.clone())
            .options(options)
            .table(&users)
            .table(&posts)
            .table(&tags)
            .table(&comments)
            .table(&teams)
            .relation(&user_posts)
            .relation(&user_teams)
            .relation(&team_members)
            .relation(&post_author)
            .relation(&post_tags)
            .relation(&post_comments)
            .build();

        Self {
            db,
            recorder,
            users,
            posts,
            tags,
            comments,
            teams,
            user_posts,
            user_teams,
            team_members,
            post_author,
            post_tags,
            post_comments,
        }
    }
}

/// Route logs to the test harness; `RUST_LOG=relmap=debug` shows generated SQL.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        active: true,
        ..User::default()
    }
}

pub fn post(author_id: i64, title: &str) -> Post {
    Post {
        author_id,
        title: title.to_string(),
        published: true,
        ..Post::default()
    }
}

/// Normalize SQL by collapsing whitespace.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize SQL for comparison by removing identifier quotes and normalizing whitespace.
/// Preserves quotes inside string literals.
fn canonicalize_sql(sql: &str) -> String {
    let mut cleaned = String::with_capacity(sql.len());
    let mut in_single_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_single_quote = !in_single_quote;
                cleaned.push(ch);
            }
            '"' if !in_single_quote => {}
            _ => cleaned.push(ch),
        }
    }

    normalize_sql(&cleaned)
}

/// Assert that SQL contains all expected fragments in order.
///
/// Identifier quotes and whitespace are normalized on both sides before
/// fragments are searched for sequentially.
#[allow(clippy::missing_panics_doc)]
pub fn assert_sql_contains(actual: &str, fragments: &[&str]) {
    let actual_canonical = canonicalize_sql(actual);
    let mut search_start = 0usize;

    for fragment in fragments {
        let fragment_canonical = canonicalize_sql(fragment);
        if fragment_canonical.is_empty() {
            continue;
        }

        if let Some(pos) = actual_canonical[search_start..].find(&fragment_canonical) {
            search_start += pos + fragment_canonical.len();
        } else {
            panic!("expected SQL fragment `{fragment_canonical}` not found in `{actual_canonical}`");
        }
    }
}
