//! End-to-end migration tests.
//!
//! These tests run full two-phase migrations against the in-memory source and
//! sink and check the documents left behind.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use sql_doc_migrate::{
    row, Config, ConfigContext, Document, DocumentId, MemorySink, MemorySource, MigrateError,
    Orchestrator, Row, RunStatus, SinkWriter, SourceReader, Translation, UnresolvedPolicy, Value,
    ORIGIN_ID_FIELD,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BLOG: &str = r#"
tables:
  - name: users
    columns:
      - { name: id, type: integer }
      - { name: name }
      - { name: surname, rename_to: last_name }
      - { name: password_hash, ignore: true }
  - name: posts
    columns:
      - { name: id, type: integer }
      - { name: user_id, type: integer }
      - { name: title }
      - { name: published_at, type: datetime }
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sql_doc_migrate=debug")
        .with_test_writer()
        .try_init();
}

fn users() -> Vec<Row> {
    vec![
        row! { "id" => 1, "name" => "Ada", "surname" => "Lovelace", "password_hash" => "x" },
        row! { "id" => 2, "name" => "Alan", "surname" => "Turing", "password_hash" => "y" },
    ]
}

fn posts() -> Vec<Row> {
    vec![
        row! { "id" => 10, "user_id" => 1, "title" => "Notes", "published_at" => "1843-09-01 10:00:00" },
        row! { "id" => 11, "user_id" => 2, "title" => "Computing", "published_at" => "1950-10-01 09:30:00" },
        row! { "id" => 12, "user_id" => "1", "title" => "Sequel", "published_at" => Value::Null },
    ]
}

fn blog_source() -> MemorySource {
    MemorySource::new()
        .with_table("users", users())
        .with_table("posts", posts())
}

fn orchestrator(yaml: &str, source: MemorySource, sink: Arc<MemorySink>) -> Orchestrator {
    Orchestrator::new(
        Translation::from_yaml(yaml).unwrap(),
        Arc::new(source),
        sink,
    )
}

async fn id_of(sink: &MemorySink, collection: &str, field: &str, value: &str) -> DocumentId {
    let mut query = Document::new();
    query.insert(field.to_string(), Value::from(value));
    sink.find_one(collection, &query).await.unwrap().unwrap().0
}

// =============================================================================
// Reference Resolution Tests
// =============================================================================

#[tokio::test]
async fn test_users_posts_references_resolved() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(BLOG, blog_source(), sink.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.rows_read(), 5);
    assert_eq!(report.documents_written(), 5);
    assert_eq!(report.references_resolved(), 3);
    assert_eq!(report.references_unresolved(), 0);

    let ada = id_of(&sink, "users", "name", "Ada").await;
    let alan = id_of(&sink, "users", "name", "Alan").await;

    let posts = sink.documents("posts").await;
    let author = |title: &str| {
        posts
            .iter()
            .find(|(_, doc)| doc["title"] == Value::from(title))
            .map(|(_, doc)| doc["user_id"].clone())
            .unwrap()
    };
    assert_eq!(author("Notes"), Value::Id(ada.clone()));
    assert_eq!(author("Computing"), Value::Id(alan));
    assert_eq!(author("Sequel"), Value::Id(ada));
}

#[tokio::test]
async fn test_no_origin_identifier_left_behind() {
    let sink = Arc::new(MemorySink::new());
    orchestrator(BLOG, blog_source(), sink.clone())
        .run()
        .await
        .unwrap();

    for collection in ["users", "posts"] {
        for (_, doc) in sink.documents(collection).await {
            assert!(
                !doc.contains_key(ORIGIN_ID_FIELD),
                "{} still carries {}",
                collection,
                ORIGIN_ID_FIELD
            );
        }
    }
}

#[tokio::test]
async fn test_rename_and_ignore_applied() {
    let sink = Arc::new(MemorySink::new());
    orchestrator(BLOG, blog_source(), sink.clone())
        .run()
        .await
        .unwrap();

    let users = sink.documents("users").await;
    let (_, ada) = &users[0];
    assert_eq!(ada["last_name"], Value::from("Lovelace"));
    assert!(!ada.contains_key("surname"));
    assert!(!ada.contains_key("password_hash"));
}

#[tokio::test]
async fn test_unresolved_reference_counted_once() {
    let source = MemorySource::new().with_table("users", users()).with_table(
        "posts",
        vec![
            row! { "id" => 10, "user_id" => 1, "title" => "Notes" },
            row! { "id" => 11, "user_id" => 99, "title" => "Orphan" },
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(BLOG, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let posts = report.table("posts").unwrap();
    assert_eq!(posts.references_resolved, 1);
    assert_eq!(posts.references_unresolved, 1);

    let orphan = sink
        .documents("posts")
        .await
        .into_iter()
        .find(|(_, doc)| doc["title"] == Value::from("Orphan"))
        .unwrap()
        .1;
    assert_eq!(orphan["user_id"], Value::Int(99));
    assert!(!orphan.contains_key(ORIGIN_ID_FIELD));
}

#[tokio::test]
async fn test_unresolved_reference_cleared() {
    let yaml = format!("options:\n  on_unresolved: clear\n{}", BLOG);
    let translation = Translation::from_yaml(&yaml).unwrap();
    assert_eq!(translation.options().on_unresolved, UnresolvedPolicy::Clear);

    let source = MemorySource::new()
        .with_table("users", vec![])
        .with_table("posts", vec![row! { "id" => 1, "user_id" => 5, "title" => "Lost" }]);
    let sink = Arc::new(MemorySink::new());
    let report = Orchestrator::new(translation, Arc::new(source), sink.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.references_unresolved(), 1);
    let posts = sink.documents("posts").await;
    let (_, doc) = &posts[0];
    assert_eq!(doc["user_id"], Value::Null);
}

#[tokio::test]
async fn test_renamed_collection_is_referenced_by_target_name() {
    let yaml = r#"
tables:
  - name: users
    rename_to: people
    columns:
      - { name: id, type: integer }
      - { name: name }
  - name: posts
    rename_to: articles
    columns:
      - { name: id, type: integer }
      - { name: user_id, type: integer }
"#;
    let source = MemorySource::new()
        .with_table("users", vec![row! { "id" => 1, "name" => "Ada" }])
        .with_table("posts", vec![row! { "id" => 1, "user_id" => 1 }]);
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(yaml, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.references_resolved(), 1);
    assert_eq!(sink.count("users").await, 0);
    let ada = id_of(&sink, "people", "name", "Ada").await;
    let articles = sink.documents("articles").await;
    let (_, article) = &articles[0];
    assert_eq!(article["user_id"], Value::Id(ada));
}

#[tokio::test]
async fn test_referencing_table_declared_first() {
    let yaml = r#"
tables:
  - name: posts
    columns:
      - { name: id, type: integer }
      - { name: user_id, type: integer }
      - { name: title }
  - name: users
    columns:
      - { name: id, type: integer }
      - { name: name }
"#;
    let source = MemorySource::new()
        .with_table(
            "posts",
            vec![
                row! { "id" => 10, "user_id" => 2, "title" => "Computing" },
                row! { "id" => 11, "user_id" => 1, "title" => "Notes" },
            ],
        )
        .with_table(
            "users",
            vec![row! { "id" => 1, "name" => "Ada" }, row! { "id" => 2, "name" => "Alan" }],
        );
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(yaml, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.references_resolved(), 2);
    assert_eq!(report.references_unresolved(), 0);

    let alan = id_of(&sink, "users", "name", "Alan").await;
    let (_, computing) = sink
        .find_one("posts", &row! { "title" => "Computing" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(computing["user_id"], Value::Id(alan));
    assert!(!computing.contains_key(ORIGIN_ID_FIELD));
}

#[tokio::test]
async fn test_self_reference_resolved() {
    let yaml = r#"
tables:
  - name: users
    columns:
      - { name: id, type: integer }
      - { name: name }
      - { name: parent_id, type: integer, references: users }
"#;
    let source = MemorySource::new().with_table(
        "users",
        vec![
            row! { "id" => 3, "name" => "Cleo", "parent_id" => 2 },
            row! { "id" => 1, "name" => "Ada", "parent_id" => Value::Null },
            row! { "id" => 2, "name" => "Byron", "parent_id" => 1 },
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(yaml, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.references_resolved(), 2);
    assert_eq!(report.references_unresolved(), 0);

    let ada = id_of(&sink, "users", "name", "Ada").await;
    let byron = id_of(&sink, "users", "name", "Byron").await;
    for (_, doc) in sink.documents("users").await {
        let expected = match &doc["name"] {
            Value::Text(name) if name == "Cleo" => Value::Id(byron.clone()),
            Value::Text(name) if name == "Byron" => Value::Id(ada.clone()),
            _ => Value::Null,
        };
        assert_eq!(doc["parent_id"], expected);
        assert!(!doc.contains_key(ORIGIN_ID_FIELD));
    }
}

#[tokio::test]
async fn test_keyless_table_is_never_a_reference_target() {
    let yaml = r#"
tables:
  - name: tags
    columns:
      - { name: label }
  - name: posts
    columns:
      - { name: id, type: integer }
      - { name: tag_id, type: integer }
"#;
    let source = MemorySource::new()
        .with_table("tags", vec![row! { "origin_identifier" => 5, "label" => "x" }])
        .with_table("posts", vec![row! { "id" => 1, "tag_id" => 5 }]);
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(yaml, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.references_resolved(), 0);
    assert_eq!(report.references_unresolved(), 1);

    let posts = sink.documents("posts").await;
    assert_eq!(posts[0].1["tag_id"], Value::Int(5));
    let tags = sink.documents("tags").await;
    assert_eq!(tags[0].1.get("label"), Some(&Value::from("x")));
    assert!(!tags[0].1.contains_key(ORIGIN_ID_FIELD));
}

// =============================================================================
// Row-Level Error Tests
// =============================================================================

#[tokio::test]
async fn test_malformed_datetime_row_skipped() {
    let source = MemorySource::new().with_table("users", users()).with_table(
        "posts",
        vec![
            row! { "id" => 10, "user_id" => 1, "title" => "Good", "published_at" => "2020-01-01 00:00:00" },
            row! { "id" => 11, "user_id" => 1, "title" => "Bad", "published_at" => "last tuesday" },
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(BLOG, source, sink.clone()).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let posts = report.table("posts").unwrap();
    assert_eq!(posts.rows_read, 2);
    assert_eq!(posts.documents_written, 1);
    assert_eq!(posts.errors.len(), 1);
    assert_eq!(posts.errors[0].row, 2);
    assert!(posts.errors[0].message.contains("published_at"));
    assert_eq!(sink.count("posts").await, 1);
}

// =============================================================================
// Hooks, Concurrency and Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_before_and_after_statements_run_in_order() {
    let yaml = r#"
tables:
  - name: users
    before: "LOCK TABLES users READ"
    after: "UNLOCK TABLES"
    columns:
      - { name: id, type: integer }
"#;
    let source = Arc::new(MemorySource::new().with_table("users", vec![row! { "id" => 1 }]));
    let sink = Arc::new(MemorySink::new());
    Orchestrator::new(Translation::from_yaml(yaml).unwrap(), source.clone(), sink)
        .run()
        .await
        .unwrap();

    assert_eq!(
        source.statements().await,
        vec!["LOCK TABLES users READ".to_string(), "UNLOCK TABLES".to_string()]
    );
}

#[tokio::test]
async fn test_parallel_workers_match_sequential() {
    let sequential = Arc::new(MemorySink::new());
    let parallel = Arc::new(MemorySink::new());

    let first = orchestrator(BLOG, blog_source(), sequential.clone())
        .run()
        .await
        .unwrap();
    let second = orchestrator(BLOG, blog_source(), parallel.clone())
        .with_workers(4)
        .run()
        .await
        .unwrap();

    assert_eq!(first.tables.len(), second.tables.len());
    for (a, b) in first.tables.iter().zip(&second.tables) {
        assert_eq!(a.table, b.table);
        assert_eq!(a.documents_written, b.documents_written);
        assert_eq!(a.references_resolved, b.references_resolved);
    }

    let ada = id_of(&parallel, "users", "name", "Ada").await;
    let notes = parallel
        .documents("posts")
        .await
        .into_iter()
        .find(|(_, doc)| doc["title"] == Value::from("Notes"))
        .unwrap()
        .1;
    assert_eq!(notes["user_id"], Value::Id(ada));
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = Arc::new(MemorySink::new());
    let report = orchestrator(BLOG, blog_source(), sink.clone())
        .with_cancel(cancel)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.tables.is_empty());
    assert_eq!(sink.count("users").await, 0);
}

/// Source that requests cancellation as soon as a given table is opened.
struct CancelOnOpen {
    inner: MemorySource,
    table: &'static str,
    cancel: CancellationToken,
}

#[async_trait]
impl SourceReader for CancelOnOpen {
    async fn open_cursor(
        &self,
        table: &str,
    ) -> sql_doc_migrate::Result<mpsc::Receiver<sql_doc_migrate::Result<Row>>> {
        let cursor = self.inner.open_cursor(table).await?;
        if table == self.table {
            self.cancel.cancel();
        }
        Ok(cursor)
    }

    async fn run_statement(&self, sql: &str) -> sql_doc_migrate::Result<()> {
        self.inner.run_statement(sql).await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    fn db_type(&self) -> &str {
        self.inner.db_type()
    }
}

#[tokio::test]
async fn test_cancelled_after_first_table_skips_resolution() {
    let cancel = CancellationToken::new();
    let source = CancelOnOpen {
        inner: blog_source(),
        table: "users",
        cancel: cancel.clone(),
    };
    let sink = Arc::new(MemorySink::new());
    let report = Orchestrator::new(
        Translation::from_yaml(BLOG).unwrap(),
        Arc::new(source),
        sink.clone(),
    )
    .with_cancel(cancel)
    .run()
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.tables[0].documents_written, 2);
    assert_eq!(report.references_resolved(), 0);
    assert_eq!(sink.count("posts").await, 0);

    let users = sink.documents("users").await;
    assert_eq!(users.len(), 2);
    for (_, doc) in users {
        assert!(doc.contains_key(ORIGIN_ID_FIELD));
    }
}

// =============================================================================
// Connection Error Tests
// =============================================================================

#[tokio::test]
async fn test_disconnected_sink_is_fatal() {
    let sink = Arc::new(MemorySink::new());
    sink.disconnect();
    let err = orchestrator(BLOG, blog_source(), sink).run().await.unwrap_err();
    assert!(matches!(err, MigrateError::Connection(_)));
}

#[tokio::test]
async fn test_missing_source_table_is_fatal() {
    let source = MemorySource::new().with_table("users", users());
    let err = orchestrator(BLOG, source, Arc::new(MemorySink::new()))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Source { .. }));
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[tokio::test]
async fn test_run_from_config_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = std::fs::File::create(dir.path().join("migrate.yaml")).unwrap();
    writeln!(
        config,
        r#"
sql_connection: {{ adapter: mysql, host: localhost, database: blog }}
no_sql_connection: {{ adapter: mongo, host: localhost, database: blog }}
migration: {{ workers: 2 }}
translation: blog.yaml
"#
    )
    .unwrap();
    std::fs::write(dir.path().join("blog.yaml"), BLOG).unwrap();

    let ctx = ConfigContext::new(dir.path());
    let config = Config::load(&ctx, "migrate.yaml").unwrap();
    let translation = config.load_translation(&ctx).unwrap();

    let sink = Arc::new(MemorySink::new());
    let report = Orchestrator::new(translation, Arc::new(blog_source()), sink)
        .with_workers(config.migration.workers())
        .run()
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.references_resolved(), 3);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"status\": \"completed\""));
}
