//! End-to-end behaviour against an in-memory `SQLite` database.

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{Comment, Fixture, Tag, Team, User, assert_sql_contains, post, user};
use relmap::{
    Aggregate, Database, Descriptor, Error, KeyPair, Many, One, Options, Relation, Sqlite, Value, WriteOptions,
    slot, table,
};
use relmap_sqlite::SqliteExecutor;

table! {
    table = "regions",
    descriptor = Regions,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Region {
        pub country: String => [primary_key],
        pub code: String => [primary_key],
        pub name: String,
    }
    relations {
        pub offices: Many<Office>,
    }
}

table! {
    table = "offices",
    descriptor = Offices,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Office {
        pub id: i64 => [primary_key, auto_increment],
        pub country: String,
        pub code: String,
        pub city: String,
    }
}

table! {
    table = "emps",
    descriptor = Emps,
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Emp {
        pub id: i64 => [primary_key, auto_increment],
        pub name: String,
        pub manager_id: i64,
    }
    relations {
        pub boss: One<Emp>,
    }
}

/// A fresh in-memory database bound to the given tables.
fn standalone(schema: &str, options: Options, bind: impl FnOnce(relmap::DatabaseBuilder) -> relmap::DatabaseBuilder) -> Arc<Database> {
    let executor = SqliteExecutor::in_memory().expect("open in-memory database");
    executor.execute_batch(schema).expect("create schema");
    bind(Database::builder(Sqlite, executor).options(options)).build()
}

fn writes() -> WriteOptions {
    WriteOptions::default()
}

/// Three users; Ada has two posts (one unpublished), Bob one, Cy none. The
/// first post has two comments.
async fn seed(fx: &Fixture) -> Vec<User> {
    let mut users = vec![user("Ada"), user("Bob"), user("Cy")];
    fx.users.insert_all(&mut users, &writes()).await.unwrap();

    let mut posts = vec![post(users[0].id, "a1"), post(users[1].id, "b1"), post(users[0].id, "a2")];
    posts[2].published = false;
    fx.posts.insert_all(&mut posts, &writes()).await.unwrap();

    let mut comments = vec![
        Comment {
            post_id: posts[0].id,
            body: "first".into(),
            ..Comment::default()
        },
        Comment {
            post_id: posts[0].id,
            body: "second".into(),
            ..Comment::default()
        },
    ];
    fx.comments.insert_all(&mut comments, &writes()).await.unwrap();
    users
}

#[tokio::test]
async fn insert_round_trip() {
    let fx = Fixture::sqlite(Options::default());
    let mut ada = user("Ada");
    fx.users.insert(&mut ada, &writes()).await.unwrap();
    assert_eq!(ada.id, 1);

    let mut bob = user("Bob");
    bob.active = false;
    fx.users.insert(&mut bob, &writes()).await.unwrap();
    assert_eq!(bob.id, 2);

    let fetched = fx.users.select().r#where(fx.users.id.eq(bob.id)).fetch_one().await.unwrap();
    assert_eq!(fetched, bob);
}

#[tokio::test]
async fn insert_all_assigns_ids_in_order() {
    let fx = Fixture::sqlite(Options::default());
    let users = seed(&fx).await;

    let ids: Vec<i64> = users.iter().map(|user| user.id).collect();
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(fx.users.select().count().await.unwrap(), 3);
}

#[tokio::test]
async fn insert_all_without_generated_keys_uses_chunks() {
    let fx = Fixture::sqlite(Options {
        insert_chunk_size: 2,
        ..Options::default()
    });
    let mut tags: Vec<Tag> = [(1, "rust"), (2, "sql"), (3, "async")]
        .into_iter()
        .map(|(id, label)| Tag { id, label: label.into() })
        .collect();

    fx.tags.insert_all(&mut tags, &writes()).await.unwrap();

    assert_eq!(fx.recorder.count(), 2);
    let labels: Vec<String> =
        fx.tags.select().order_by(&fx.tags.id).fetch().await.unwrap().into_iter().map(|tag| tag.label).collect();
    assert_eq!(labels, ["rust", "sql", "async"]);
}

#[tokio::test]
async fn zero_chunk_size_inserts_row_by_row() {
    let fx = Fixture::sqlite(Options {
        insert_chunk_size: 0,
        ..Options::default()
    });
    assert_eq!(fx.db.options().insert_chunk_size, 1);
    let mut tags: Vec<Tag> = (1..=3).map(|id| Tag { id, label: format!("tag {id}") }).collect();

    fx.tags.insert_all(&mut tags, &writes()).await.unwrap();

    assert_eq!(fx.recorder.count(), 3);
    assert_eq!(fx.tags.select().count().await.unwrap(), 3);
}

#[tokio::test]
async fn eager_matches_per_parent_loading() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let (users, posts) = (&fx.users, &fx.posts);

    fx.recorder.clear();
    let eager = users
        .select()
        .order_by(&users.id)
        .eager(fx.user_posts.eager().order_by(&posts.id))
        .fetch()
        .await
        .unwrap();
    assert_eq!(fx.recorder.count(), 2);

    let mut lazy = users.select().order_by(&users.id).fetch().await.unwrap();
    for user in &mut lazy {
        fx.user_posts.load(user).await.unwrap();
    }

    assert_eq!(eager, lazy);
    let counts: Vec<usize> = eager.iter().map(|user| user.posts.len()).collect();
    assert_eq!(counts, [2, 1, 0]);
}

#[tokio::test]
async fn hash_join_agrees_with_brute_force() {
    let load = |threshold: usize| async move {
        let fx = Fixture::sqlite(Options {
            hash_join_threshold: threshold,
            ..Options::default()
        });
        seed(&fx).await;
        let (users, posts) = (&fx.users, &fx.posts);
        users
            .select()
            .order_by(&users.id)
            .eager(
                fx.user_posts
                    .eager()
                    .order_by(&posts.id)
                    .with(fx.post_comments.eager().order_by(&fx.comments.id)),
            )
            .fetch()
            .await
            .unwrap()
    };

    let hashed = load(0).await;
    let brute = load(usize::MAX).await;
    assert_eq!(hashed, brute);
    assert_eq!(hashed[0].posts[0].comments.len(), 2);
    assert!(hashed[0].posts[1].comments.is_empty());
}

#[tokio::test]
async fn composite_keys_reconcile_by_every_column() {
    let load = |threshold: usize| async move {
        let regions = Regions::new();
        let offices = Offices::new();
        let region_offices = Relation::to_many(
            "offices",
            &offices,
            vec![KeyPair::new(&regions.country, &offices.country), KeyPair::new(&regions.code, &offices.code)],
            slot!(Region, offices),
        );
        let _db = standalone(
            "CREATE TABLE regions (country TEXT NOT NULL, code TEXT NOT NULL, name TEXT NOT NULL, PRIMARY KEY (country, code));
             CREATE TABLE offices (id INTEGER PRIMARY KEY AUTOINCREMENT, country TEXT NOT NULL, code TEXT NOT NULL, city TEXT NOT NULL);",
            Options {
                hash_join_threshold: threshold,
                ..Options::default()
            },
            |builder| builder.table(&regions).table(&offices).relation(&region_offices),
        );

        let mut rows: Vec<Region> = [("us", "ca", "California"), ("us", "ny", "New York"), ("ca", "on", "Ontario"), ("ca", "ca", "Cariboo")]
            .into_iter()
            .map(|(country, code, name)| Region {
                country: country.into(),
                code: code.into(),
                name: name.into(),
                ..Region::default()
            })
            .collect();
        regions.insert_all(&mut rows, &writes()).await.unwrap();

        // ("ca", "ny") is fetched by the per-column IN lists but matches no region
        let mut sites: Vec<Office> = [("us", "ca", "LA"), ("us", "ca", "SF"), ("ca", "ca", "Quesnel"), ("us", "ny", "NYC"), ("ca", "ny", "Nowhere")]
            .into_iter()
            .map(|(country, code, city)| Office {
                country: country.into(),
                code: code.into(),
                city: city.into(),
                ..Office::default()
            })
            .collect();
        offices.insert_all(&mut sites, &writes()).await.unwrap();

        regions
            .select()
            .order_by(&regions.country)
            .order_by(&regions.code)
            .eager(region_offices.eager().order_by(&offices.id))
            .fetch()
            .await
            .unwrap()
    };

    let hashed = load(0).await;
    let brute = load(usize::MAX).await;
    assert_eq!(hashed, brute);

    let cities: Vec<(String, Vec<String>)> = hashed
        .into_iter()
        .map(|region| (region.name, region.offices.into_iter().map(|office| office.city).collect()))
        .collect();
    assert_eq!(
        cities,
        [
            ("Cariboo".to_string(), vec!["Quesnel".to_string()]),
            ("Ontario".to_string(), vec![]),
            ("California".to_string(), vec!["LA".to_string(), "SF".to_string()]),
            ("New York".to_string(), vec!["NYC".to_string()]),
        ]
    );
}

#[tokio::test]
async fn self_relations_through_aliases() {
    let emps = Emps::new();
    let boss = emps.with_alias("boss");
    let reports_to =
        Relation::to_one("boss", &boss, vec![KeyPair::new(&emps.manager_id, &boss.id)], slot!(Emp, boss));
    let _db = standalone(
        "CREATE TABLE emps (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, manager_id INTEGER NOT NULL);",
        Options::default(),
        |builder| builder.table(&emps).relation(&reports_to),
    );
    assert_eq!(boss.from_clause(), "\"emps\" AS \"boss\"");

    let mut staff = vec![
        Emp {
            name: "a".into(),
            ..Emp::default()
        },
        Emp {
            name: "b".into(),
            manager_id: 1,
            ..Emp::default()
        },
    ];
    emps.insert_all(&mut staff, &writes()).await.unwrap();

    let loaded = emps.select().order_by(&emps.id).eager(reports_to.eager()).fetch().await.unwrap();
    let bosses: Vec<Option<&str>> =
        loaded.iter().map(|emp| emp.boss.as_deref().map(|boss| boss.name.as_str())).collect();
    assert_eq!(bosses, [None, Some("a")]);

    let query = emps.select().join_relation(&reports_to).r#where(boss.name.eq("a")).to_sql().unwrap();
    assert_sql_contains(
        &query.sql,
        &["FROM emps", "INNER JOIN emps AS boss ON (emps.manager_id) = (boss.id)", "WHERE (boss.name) = (?)"],
    );
    let reports: Vec<String> = emps
        .select()
        .join_relation(&reports_to)
        .r#where(boss.name.eq("a"))
        .fetch()
        .await
        .unwrap()
        .into_iter()
        .map(|emp| emp.name)
        .collect();
    assert_eq!(reports, ["b"]);
}

#[tokio::test]
async fn eager_filters_and_nesting() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let (users, posts) = (&fx.users, &fx.posts);

    fx.recorder.clear();
    let loaded = users
        .select()
        .r#where(users.name.eq("Ada"))
        .eager(
            fx.user_posts
                .eager()
                .r#where(posts.published.eq(true))
                .with(fx.post_comments.eager().order_by_desc(&fx.comments.id)),
        )
        .fetch()
        .await
        .unwrap();

    assert_eq!(fx.recorder.count(), 3);
    let ada = &loaded[0];
    assert_eq!(ada.posts.len(), 1);
    let bodies: Vec<&str> = ada.posts[0].comments.iter().map(|comment| comment.body.as_str()).collect();
    assert_eq!(bodies, ["second", "first"]);
}

#[tokio::test]
async fn to_one_relation_loads_parent_record() {
    let fx = Fixture::sqlite(Options::default());
    let users = seed(&fx).await;

    let posts = fx.posts.select().order_by(&fx.posts.id).eager(fx.post_author.eager()).fetch().await.unwrap();

    let authors: Vec<Option<&str>> =
        posts.iter().map(|post| post.author.as_deref().map(|author| author.name.as_str())).collect();
    assert_eq!(authors, [Some("Ada"), Some("Bob"), Some("Ada")]);
    assert_eq!(posts[0].author.as_deref().map(|author| author.id), Some(users[0].id));
}

#[tokio::test]
async fn array_keys_attach_contained_children() {
    let fx = Fixture::sqlite(Options::default());
    let mut tags: Vec<Tag> =
        [1, 2, 4].into_iter().map(|id| Tag { id, label: format!("tag {id}") }).collect();
    fx.tags.insert_all(&mut tags, &writes()).await.unwrap();

    let mut tagged = post(1, "tagged");
    tagged.tag_ids = vec![1, 2, 3];
    fx.posts.insert(&mut tagged, &writes()).await.unwrap();
    let mut untagged = post(1, "untagged");
    fx.posts.insert(&mut untagged, &writes()).await.unwrap();

    let loaded = fx
        .posts
        .select()
        .order_by(&fx.posts.id)
        .eager(fx.post_tags.eager().order_by(&fx.tags.id))
        .fetch()
        .await
        .unwrap();

    let ids: Vec<Vec<i64>> = loaded.iter().map(|post| post.tags.iter().map(|tag| tag.id).collect()).collect();
    assert_eq!(ids, [vec![1, 2], vec![]]);
    assert_eq!(loaded[0].tag_ids, [1, 2, 3]);

    let mut single = loaded[0].clone();
    fx.post_tags.load(&mut single).await.unwrap();
    assert_eq!(single.tags, loaded[0].tags);
}

#[tokio::test]
async fn array_filters_run_on_json_arrays() {
    let fx = Fixture::sqlite(Options::default());
    let posts = &fx.posts;
    for (title, tag_ids) in [("one", vec![1, 2]), ("two", vec![2, 3]), ("three", vec![])] {
        let mut record = post(1, title);
        record.tag_ids = tag_ids;
        posts.insert(&mut record, &writes()).await.unwrap();
    }

    let titles = |records: Vec<common::Post>| records.into_iter().map(|post| post.title).collect::<Vec<_>>();

    let containing = posts.select().r#where(posts.tag_ids.array_contains(vec![2_i64])).order_by(&posts.id);
    assert_eq!(titles(containing.fetch().await.unwrap()), ["one", "two"]);

    let overlapping = posts.select().r#where(posts.tag_ids.array_has_any(vec![3_i64, 9]));
    assert_eq!(titles(overlapping.fetch().await.unwrap()), ["two"]);
}

#[tokio::test]
async fn updates_are_idempotent() {
    let fx = Fixture::sqlite(Options::default());
    let mut ada = user("Ada");
    fx.users.insert(&mut ada, &writes()).await.unwrap();

    ada.name = "Ada Lovelace".into();
    assert_eq!(fx.users.update_by_primary_key(&ada, &writes()).await.unwrap(), 1);
    let once = fx.users.select().r#where(fx.users.id.eq(ada.id)).fetch_one().await.unwrap();
    assert_eq!(fx.users.update_by_primary_key(&ada, &writes()).await.unwrap(), 1);
    let twice = fx.users.select().r#where(fx.users.id.eq(ada.id)).fetch_one().await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.name, "Ada Lovelace");
}

#[tokio::test]
async fn cascading_insert_writes_children_with_keys() {
    let fx = Fixture::sqlite(Options::default());
    let mut ada = user("Ada");
    ada.posts = vec![post(0, "first"), post(0, "second")];

    fx.users.insert(&mut ada, &writes().cascading(true)).await.unwrap();

    assert_eq!(fx.users.select().count().await.unwrap(), 1);
    let stored = fx.posts.select().order_by(&fx.posts.id).fetch().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|post| post.author_id == ada.id));
    assert_eq!(ada.posts.iter().map(|post| post.id).collect::<Vec<_>>(), [1, 2]);
}

#[tokio::test]
async fn cascading_insert_writes_referenced_rows_first() {
    let fx = Fixture::sqlite(Options::default());
    let mut draft = post(0, "draft");
    draft.author = Some(Box::new(user("Ada")));

    fx.posts.insert(&mut draft, &writes().cascading(true)).await.unwrap();

    let author_id = draft.author.as_deref().map(|author| author.id);
    assert_eq!(author_id, Some(1));
    assert_eq!(draft.author_id, 1);

    let stored = fx.posts.select().fetch_one().await.unwrap();
    assert_eq!(stored.author_id, 1);
}

#[tokio::test]
async fn many_to_many_through_junction() {
    let fx = Fixture::sqlite(Options::default());
    let mut ada = user("Ada");
    ada.teams = vec![
        Team {
            name: "core".into(),
            ..Team::default()
        },
        Team {
            name: "docs".into(),
            ..Team::default()
        },
    ];
    fx.users.insert(&mut ada, &writes().cascading(true)).await.unwrap();
    let mut bob = user("Bob");
    fx.users.insert(&mut bob, &writes()).await.unwrap();

    let loaded = fx
        .users
        .select()
        .order_by(&fx.users.id)
        .eager(fx.user_teams.eager().order_by(&fx.teams.name))
        .fetch()
        .await
        .unwrap();

    let names: Vec<Vec<&str>> =
        loaded.iter().map(|user| user.teams.iter().map(|team| team.name.as_str()).collect()).collect();
    assert_eq!(names, [vec!["core", "docs"], vec![]]);

    let mut single = loaded[0].clone();
    fx.user_teams.load(&mut single).await.unwrap();
    assert_eq!(single.teams.len(), 2);

    let joined = fx.users.select().join_relation(&fx.user_teams).r#where(fx.teams.name.eq("docs")).fetch().await.unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].id, ada.id);
}

#[tokio::test]
async fn many_to_many_loads_from_both_sides() {
    let fx = Fixture::sqlite(Options::default());
    let mut core = Team {
        name: "core".into(),
        members: vec![user("Ada"), user("Bob")],
        ..Team::default()
    };
    fx.teams.insert(&mut core, &writes().cascading(true)).await.unwrap();
    let mut docs = Team {
        name: "docs".into(),
        members: vec![user("Cy")],
        ..Team::default()
    };
    fx.teams.insert(&mut docs, &writes().cascading(true)).await.unwrap();

    let teams = fx
        .teams
        .select()
        .order_by(&fx.teams.id)
        .eager(fx.team_members.eager().order_by(&fx.users.id))
        .fetch()
        .await
        .unwrap();
    let members: Vec<Vec<&str>> =
        teams.iter().map(|team| team.members.iter().map(|user| user.name.as_str()).collect()).collect();
    assert_eq!(members, [vec!["Ada", "Bob"], vec!["Cy"]]);

    let users = fx.users.select().order_by(&fx.users.id).eager(fx.user_teams.eager()).fetch().await.unwrap();
    let teams: Vec<Vec<&str>> =
        users.iter().map(|user| user.teams.iter().map(|team| team.name.as_str()).collect()).collect();
    assert_eq!(teams, [vec!["core"], vec!["core"], vec!["docs"]]);
}

#[tokio::test]
async fn cascading_delete_removes_dependants() {
    let fx = Fixture::sqlite(Options::default());
    let mut ada = user("Ada");
    ada.posts = vec![post(0, "first"), post(0, "second")];
    ada.teams = vec![Team {
        name: "core".into(),
        ..Team::default()
    }];
    fx.users.insert(&mut ada, &writes().cascading(true)).await.unwrap();

    let deleted = fx.users.delete_by_primary_key(&ada, &writes().cascading(true)).await.unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(fx.users.select().count().await.unwrap(), 0);
    assert_eq!(fx.posts.select().count().await.unwrap(), 0);
    assert_eq!(fx.teams.select().count().await.unwrap(), 0);
    let junction = fx.recorder.statements();
    assert!(junction.iter().any(|sql| sql.starts_with("DELETE FROM \"memberships\"")), "{junction:?}");
}

#[tokio::test]
async fn fast_scan_matches_generic_scan() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let users = &fx.users;

    let generic = users.select().order_by(&users.id).fetch().await.unwrap();
    let fast = users.select().order_by(&users.id).fast_scan().fetch().await.unwrap();
    assert_eq!(generic, fast);

    let err = users.select().columns([users.id.name()]).fast_scan().fetch().await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
}

#[tokio::test]
async fn partial_projection_leaves_other_fields_default() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let users = &fx.users;

    let fetched = users.select().columns([users.id.name(), users.name.name()]).order_by(&users.id).fetch().await.unwrap();

    assert_eq!(fetched[0].name, "Ada");
    assert!(fetched[0].email.is_empty());
}

#[tokio::test]
async fn single_row_fetches() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let users = &fx.users;

    let err = users.select().r#where(users.name.eq("Nobody")).fetch_one().await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");

    let err = users.select().r#where(users.active.eq(true)).fetch_one().await.unwrap_err();
    assert!(matches!(err, Error::NotSingular(2)), "{err:?}");

    assert!(users.select().r#where(users.name.eq("Nobody")).fetch_optional().await.unwrap().is_none());
    let bob = users.select().r#where(users.name.eq("Bob")).fetch_optional().await.unwrap();
    assert_eq!(bob.map(|user| user.id), Some(2));
}

#[tokio::test]
async fn aggregates_and_existence() {
    let fx = Fixture::sqlite(Options::default());
    seed(&fx).await;
    let posts = &fx.posts;

    assert!(posts.select().r#where(posts.title.eq("b1")).exists().await.unwrap());
    assert!(!posts.select().r#where(posts.title.eq("zz")).exists().await.unwrap());
    assert_eq!(posts.select().aggregate(posts.id.max()).await.unwrap(), Value::Int64(3));
    assert_eq!(posts.select().r#where(posts.published.eq(true)).count().await.unwrap(), 2);

    let groups = posts
        .select()
        .group_by(&posts.author_id)
        .order_by(&posts.author_id)
        .grouped([("posts", Aggregate::count_all())])
        .await
        .unwrap();
    let counts: Vec<(Option<&Value>, Option<&Value>)> =
        groups.iter().map(|row| (row.get("author_id"), row.get("posts"))).collect();
    assert_eq!(
        counts,
        [
            (Some(&Value::Int64(1)), Some(&Value::Int64(2))),
            (Some(&Value::Int64(2)), Some(&Value::Int64(1)))
        ]
    );
}

#[tokio::test]
async fn unique_violations_are_classified() {
    let fx = Fixture::sqlite(Options::default());
    let mut first = user("Ada");
    fx.users.insert(&mut first, &writes()).await.unwrap();

    let mut duplicate = user("Ada");
    let err = fx.users.insert(&mut duplicate, &writes()).await.unwrap_err();
    assert!(matches!(err, Error::UniqueViolation(_)), "{err:?}");
}

#[tokio::test]
async fn views_restrict_reads() {
    let fx = Fixture::sqlite(Options::default());
    let mut users = seed(&fx).await;
    users[1].active = false;
    fx.users.update_by_primary_key(&users[1], &writes()).await.unwrap();

    let active = fx.users.view(fx.users.active.eq(true));
    let names: Vec<String> =
        active.select().order_by(&active.id).fetch().await.unwrap().into_iter().map(|user| user.name).collect();
    assert_eq!(names, ["Ada", "Cy"]);

    let err = active.update_by_primary_key(&users[0], &writes()).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
}
