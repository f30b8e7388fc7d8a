//! Live-sandbox integration tests.
//!
//! These require a running, disposable local PostgreSQL instance. Opt in
//! with `cargo test --features sandbox-tests`, pointing `PGVET_SANDBOX_URL`
//! at the instance (default `postgres://localhost:5432/pgvet_sandbox`). The
//! schema of that database is dropped and rebuilt by the tests.

#![cfg(feature = "sandbox-tests")]

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Mutex, PoisonError};

use tempfile::TempDir;

use pgvet::manifest::{
    ColumnShape, ColumnShapeMap, Manifest, ManifestConfig, ResolvedStatement, StatementCommon,
    SuppliedColumn,
};
use pgvet::sourcemap::SourceMap;
use pgvet::views::{Segment, ViewDecl, resolve};
use pgvet::{Config, Session};

// One sandbox database, many tests: serialize access so full resets do not
// race.
static SANDBOX_LOCK: Mutex<()> = Mutex::new(());

fn sandbox_url() -> String {
    std::env::var("PGVET_SANDBOX_URL")
        .unwrap_or_else(|_| "postgres://localhost:5432/pgvet_sandbox".to_owned())
}

fn write_migrations(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

async fn connect(migrations: &TempDir) -> Session {
    let config = Config {
        migrations_dir: migrations.path().to_owned(),
        postgres_version: 16,
        col_types_format: Default::default(),
        strict_date_time_checking: false,
        custom_sql_type_mappings: vec![],
        unique_table_column_types: vec![],
    };
    let pg = pgvet_postgres_util::Config::from_url(&sandbox_url()).unwrap();
    Session::connect(&pg, &config).await.unwrap()
}

fn query(sql: &str, expected: Option<ColumnShapeMap>) -> ResolvedStatement {
    ResolvedStatement::Query(StatementCommon {
        sql: sql.to_owned(),
        file_name: "src/db.host".into(),
        file_contents: sql.to_owned(),
        source_map: SourceMap::default(),
        source_offset: 0,
        type_span: None,
        sugar_method: None,
        expected_columns: expected,
    })
}

fn manifest(statements: Vec<ResolvedStatement>) -> Manifest {
    Manifest {
        view_library: vec![],
        statements,
        branded_column_types: vec![],
        config: ManifestConfig::default(),
    }
}

#[tokio::test]
async fn test_matching_query_passes_and_second_run_hits_cache() {
    let _guard = SANDBOX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let migrations = write_migrations(&[(
        "V1__users.sql",
        "CREATE TABLE users (id serial PRIMARY KEY, email text);",
    )]);
    let mut session = connect(&migrations).await;

    let expected = ColumnShapeMap::from([
        ("id".to_owned(), ColumnShape::req("number")),
        ("email".to_owned(), ColumnShape::opt("string")),
    ]);
    let m = manifest(vec![query("SELECT id, email FROM users", Some(expected))]);

    let first = session.validate_manifest(&m).await.unwrap();
    assert!(first.is_empty(), "unexpected diagnostics: {:?}", first);
    assert_eq!(session.last_probe_count(), 1);
    assert_eq!(session.cached_outcomes(), 1);

    let second = session.validate_manifest(&m).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(session.last_probe_count(), 0, "second run must be all cache hits");
}

#[tokio::test]
async fn test_wrong_types_render_replacement_literal() {
    let _guard = SANDBOX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let migrations = write_migrations(&[(
        "V1__users.sql",
        "CREATE TABLE users (id serial PRIMARY KEY);",
    )]);
    let mut session = connect(&migrations).await;

    let m = manifest(vec![query(
        "SELECT id FROM users",
        Some(ColumnShapeMap::new()),
    )]);
    let diagnostics = session.validate_manifest(&m).await.unwrap();
    assert_eq!(diagnostics.len(), 1);
    let fix = diagnostics[0].quick_fix.as_ref().expect("quick fix");
    assert_eq!(fix.replacement_text, "<{id: Req<number>}>");
}

#[tokio::test]
async fn test_migration_change_invalidates_every_cached_outcome() {
    let _guard = SANDBOX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let migrations = write_migrations(&[
        ("V1__users.sql", "CREATE TABLE users (id serial PRIMARY KEY);"),
        ("V2__other.sql", "CREATE TABLE other (x int);"),
    ]);
    let mut session = connect(&migrations).await;

    let m = manifest(vec![query("SELECT id FROM users", None)]);
    session.validate_manifest(&m).await.unwrap();
    assert_eq!(session.last_probe_count(), 1);
    session.validate_manifest(&m).await.unwrap();
    assert_eq!(session.last_probe_count(), 0);

    // Touch a migration unrelated to the statement's table.
    fs::write(
        migrations.path().join("V2__other.sql"),
        "CREATE TABLE other (x int, y int);",
    )
    .unwrap();
    session.validate_manifest(&m).await.unwrap();
    assert_eq!(
        session.last_probe_count(),
        1,
        "fingerprint change must invalidate unrelated statements too"
    );
}

#[tokio::test]
async fn test_insert_violations_accumulate() {
    let _guard = SANDBOX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let migrations = write_migrations(&[(
        "V1__t.sql",
        "CREATE TABLE t (a int NOT NULL, b int DEFAULT 5);",
    )]);
    let mut session = connect(&migrations).await;

    let insert = |sql: &str, supplied: BTreeMap<String, SuppliedColumn>| ResolvedStatement::Insert {
        common: StatementCommon {
            sql: sql.to_owned(),
            file_name: "src/db.host".into(),
            file_contents: sql.to_owned(),
            source_map: SourceMap::default(),
            source_offset: 0,
            type_span: None,
            sugar_method: None,
            expected_columns: None,
        },
        table: "t".into(),
        supplied_columns: supplied,
    };

    // Supplying only `a` satisfies the table.
    let ok = manifest(vec![insert(
        "INSERT INTO t (a) VALUES ($1)",
        BTreeMap::from([(
            "a".to_owned(),
            SuppliedColumn {
                type_name: "number".into(),
                not_null: true,
            },
        )]),
    )]);
    assert!(session.validate_manifest(&ok).await.unwrap().is_empty());

    // Supplying nothing misses `a`; the violation list arrives as a single
    // diagnostic.
    let missing = manifest(vec![insert("INSERT INTO t DEFAULT VALUES", BTreeMap::new())]);
    let diagnostics = session.validate_manifest(&missing).await.unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].messages.len(), 1);
    assert!(diagnostics[0].messages[0].contains("\"a\""));
}

#[tokio::test]
async fn test_view_library_installs_in_dependency_order() {
    let _guard = SANDBOX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let migrations = write_migrations(&[(
        "V1__users.sql",
        "CREATE TABLE users (id serial PRIMARY KEY, email text);",
    )]);
    let mut session = connect(&migrations).await;

    let base = ViewDecl {
        module: "db/views.host".into(),
        name: "active".into(),
        segments: vec![Segment::Literal {
            text: "SELECT id FROM users".into(),
            source_offset: 0,
        }],
        source_text: String::new(),
    };
    let wrapper = ViewDecl {
        module: "db/views.host".into(),
        name: "wrapped".into(),
        segments: vec![
            Segment::Literal {
                text: "SELECT id FROM ".into(),
                source_offset: 30,
            },
            Segment::Ref {
                module: None,
                name: "active".into(),
                source_offset: 45,
            },
        ],
        source_text: String::new(),
    };
    let library = vec![base, wrapper];
    let resolution = resolve(&library);
    assert!(resolution.errors.is_empty());
    let wrapper_name = resolution.views[1].generated_name.clone();

    // Query through the outer view; `id` inherits NOT NULL from the base
    // table through two levels of views.
    let expected = ColumnShapeMap::from([("id".to_owned(), ColumnShape::req("number"))]);
    let m = Manifest {
        view_library: library,
        statements: vec![query(
            &format!("SELECT id FROM {}", wrapper_name),
            Some(expected),
        )],
        branded_column_types: vec![],
        config: ManifestConfig::default(),
    };
    let diagnostics = session.validate_manifest(&m).await.unwrap();
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
}
