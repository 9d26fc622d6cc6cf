//! Integration tests for the query executor and the database gateway.
//!
//! Both pools are backed by SQLite files; the tests cover connection
//! accounting, transactional writes and per-database isolation.

use geo_api::config::PoolOptions;
use geo_api::db::{ConnectionPool, DatabaseGateway, DatabaseTarget, QueryExecutor};
use geo_api::error::DbError;
use geo_api::models::{PoolConfig, QueryParams, WriteOutcome};
use rand::seq::SliceRandom;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Pools over two SQLite files. The directory must outlive the gateway.
struct TestDatabases {
    _dir: TempDir,
    gateway: Arc<DatabaseGateway>,
}

async fn sqlite_pool(dir: &TempDir, target: DatabaseTarget, max: u32) -> ConnectionPool {
    let path = dir.path().join(format!("{}.db", target));
    let config = PoolConfig::new(target, format!("sqlite:{}?mode=rwc", path.display()))
        .with_options(PoolOptions {
            max_connections: Some(max),
            acquire_timeout_secs: Some(5),
            ..Default::default()
        });
    ConnectionPool::try_initialize(config).await.unwrap()
}

async fn setup() -> TestDatabases {
    let dir = TempDir::new().unwrap();
    let general = sqlite_pool(&dir, DatabaseTarget::General, 4).await;
    let secondary = sqlite_pool(&dir, DatabaseTarget::Secondary, 4).await;
    let gateway = Arc::new(DatabaseGateway::new(general, secondary, QueryExecutor::new()));

    gateway
        .execute_write(
            DatabaseTarget::General,
            "CREATE TABLE mis_zonas (id INTEGER PRIMARY KEY AUTOINCREMENT, nombre TEXT NOT NULL UNIQUE, geom TEXT)",
            &QueryParams::new(),
        )
        .await
        .unwrap();
    gateway
        .execute_write(
            DatabaseTarget::Secondary,
            "CREATE TABLE faismun_2024_geo (id INTEGER PRIMARY KEY AUTOINCREMENT, obra_accio TEXT, tipo TEXT)",
            &QueryParams::new(),
        )
        .await
        .unwrap();

    TestDatabases {
        _dir: dir,
        gateway,
    }
}

fn assert_balanced(gateway: &DatabaseGateway) {
    for stats in gateway.stats() {
        assert_eq!(
            stats.acquired, stats.released,
            "{} pool leaked a connection",
            stats.target
        );
    }
}

#[tokio::test]
async fn test_write_returning_then_select() {
    let db = setup().await;

    let outcome = db
        .gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre, geom) VALUES (:nombre, :geom) RETURNING id",
            &QueryParams::new()
                .with("nombre", "Centro")
                .with("geom", r#"{"type":"Point","coordinates":[-93.11,16.75]}"#),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Returned(json!(1)));
    assert_eq!(outcome.as_i64(), Some(1));

    let row = db
        .gateway
        .execute_read_one(
            DatabaseTarget::General,
            "SELECT id, nombre FROM mis_zonas WHERE id = :id",
            &QueryParams::new().with("id", outcome.as_i64().unwrap()),
        )
        .await
        .unwrap()
        .expect("inserted row should be visible after commit");
    assert_eq!(row.get("nombre"), Some(&json!("Centro")));

    assert_balanced(&db.gateway);
}

#[tokio::test]
async fn test_write_without_returning_reports_row_count() {
    let db = setup().await;
    for nombre in ["Norte", "Sur"] {
        db.gateway
            .execute_write(
                DatabaseTarget::General,
                "INSERT INTO mis_zonas (nombre) VALUES (:nombre)",
                &QueryParams::new().with("nombre", nombre),
            )
            .await
            .unwrap();
    }

    let outcome = db
        .gateway
        .execute_write(
            DatabaseTarget::General,
            "UPDATE mis_zonas SET geom = NULL",
            &QueryParams::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected(), Some(2));
}

#[tokio::test]
async fn test_constraint_violation_rolls_back() {
    let db = setup().await;
    db.gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre) VALUES ('Centro')",
            &QueryParams::new(),
        )
        .await
        .unwrap();

    // The second tuple collides; the first must not survive either.
    let result = db
        .gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre) VALUES ('Poniente'), ('Centro')",
            &QueryParams::new(),
        )
        .await;
    assert!(matches!(result, Err(DbError::Query { .. })));

    let rows = db
        .gateway
        .execute_read(
            DatabaseTarget::General,
            "SELECT nombre FROM mis_zonas ORDER BY id",
            &QueryParams::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nombre"), Some(&json!("Centro")));

    // The connection went back to the pool in a usable state.
    let outcome = db
        .gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre) VALUES ('Oriente') RETURNING id",
            &QueryParams::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.as_i64(), Some(2));

    assert_balanced(&db.gateway);
}

#[tokio::test]
async fn test_read_one_without_match() {
    let db = setup().await;
    let row = db
        .gateway
        .execute_read_one(
            DatabaseTarget::General,
            "SELECT id FROM mis_zonas WHERE nombre = :nombre",
            &QueryParams::new().with("nombre", "Inexistente"),
        )
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn test_named_params_repeat_and_missing() {
    let db = setup().await;

    let row = db
        .gateway
        .execute_read_one(
            DatabaseTarget::General,
            "SELECT :a AS a, :b AS b, :a + 1 AS a_plus_one",
            &QueryParams::new().with("a", 41).with("b", "x"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("a"), Some(&json!(41)));
    assert_eq!(row.get("b"), Some(&json!("x")));
    assert_eq!(row.get("a_plus_one"), Some(&json!(42)));

    let missing = db
        .gateway
        .execute_read(
            DatabaseTarget::General,
            "SELECT * FROM mis_zonas WHERE nombre = :nombre",
            &QueryParams::new().with("name", "Centro"),
        )
        .await;
    assert!(matches!(missing, Err(DbError::InvalidInput { .. })));

    // No params at all must not bind NULL for the placeholder.
    let unbound = db
        .gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre, geom) VALUES ('Centro', :geom)",
            &QueryParams::new(),
        )
        .await;
    assert!(matches!(unbound, Err(DbError::InvalidInput { .. })));

    let rows = db
        .gateway
        .execute_read(DatabaseTarget::General, "SELECT id FROM mis_zonas", &QueryParams::new())
        .await
        .unwrap();
    assert!(rows.is_empty());

    assert_balanced(&db.gateway);
}

#[tokio::test]
async fn test_secondary_isolation() {
    let db = setup().await;

    db.gateway
        .execute_write(
            DatabaseTarget::Secondary,
            "INSERT INTO faismun_2024_geo (obra_accio, tipo) VALUES (:obra, :tipo)",
            &QueryParams::new()
                .with("obra", "Pavimentación calle 5a")
                .with("tipo", "Urbanización"),
        )
        .await
        .unwrap();

    // The table only exists in the Secondary database.
    let general = db
        .gateway
        .execute_read(
            DatabaseTarget::General,
            "SELECT * FROM faismun_2024_geo",
            &QueryParams::new(),
        )
        .await;
    assert!(matches!(general, Err(DbError::Query { .. })));

    let secondary = db
        .gateway
        .execute_read(
            DatabaseTarget::Secondary,
            "SELECT obra_accio FROM faismun_2024_geo",
            &QueryParams::new(),
        )
        .await
        .unwrap();
    assert_eq!(secondary.len(), 1);
    assert_eq!(
        secondary[0].get("obra_accio"),
        Some(&json!("Pavimentación calle 5a"))
    );

    let general_stats = db.gateway.pool(DatabaseTarget::General).stats();
    let secondary_stats = db.gateway.pool(DatabaseTarget::Secondary).stats();
    assert_eq!(general_stats.acquired, 2);
    assert_eq!(secondary_stats.acquired, 3);
}

#[tokio::test]
async fn test_unavailable_secondary_keeps_general_serving() {
    let dir = TempDir::new().unwrap();
    let general = sqlite_pool(&dir, DatabaseTarget::General, 2).await;
    let secondary = ConnectionPool::unavailable(DatabaseTarget::Secondary, "connection refused");
    let gateway = DatabaseGateway::new(general, secondary, QueryExecutor::new());

    let err = gateway
        .execute_read(DatabaseTarget::Secondary, "SELECT 1", &QueryParams::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::PoolUnavailable {
            target: DatabaseTarget::Secondary,
            ..
        }
    ));

    let rows = gateway
        .execute_read(DatabaseTarget::General, "SELECT 1 AS uno", &QueryParams::new())
        .await
        .unwrap();
    assert_eq!(rows[0].get("uno"), Some(&json!(1)));
    assert!(!gateway.is_available());
}

#[tokio::test]
async fn test_drained_gateway_rejects_requests() {
    let db = setup().await;
    db.gateway.drain().await;

    let err = db
        .gateway
        .execute_read(DatabaseTarget::General, "SELECT 1", &QueryParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PoolUnavailable { .. }));
    assert!(!db.gateway.is_available());

    // Draining twice is harmless.
    db.gateway.drain().await;
}

#[tokio::test]
async fn test_statement_timeout_releases_connection() {
    let db = setup().await;
    let impatient = DatabaseGateway::new(
        db.gateway.pool(DatabaseTarget::General).clone(),
        db.gateway.pool(DatabaseTarget::Secondary).clone(),
        QueryExecutor::with_timeout(Duration::from_millis(1)),
    );

    let result = impatient
        .execute_read(
            DatabaseTarget::General,
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000000) \
             SELECT count(*) AS n FROM c",
            &QueryParams::new(),
        )
        .await;
    let err = tokio_test::assert_err!(result);
    assert!(matches!(err, DbError::Timeout { .. }));
    assert_balanced(&db.gateway);
}

#[tokio::test]
async fn test_write_timeout_commits_nothing() {
    let db = setup().await;
    let impatient = DatabaseGateway::new(
        db.gateway.pool(DatabaseTarget::General).clone(),
        db.gateway.pool(DatabaseTarget::Secondary).clone(),
        QueryExecutor::with_timeout(Duration::from_millis(1)),
    );

    let result = impatient
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre) \
             WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000000) \
             SELECT 'zona ' || x FROM c",
            &QueryParams::new(),
        )
        .await;
    let err = tokio_test::assert_err!(result);
    assert!(matches!(err, DbError::Timeout { .. }));
    assert_balanced(&db.gateway);

    let count = db
        .gateway
        .execute_read_one(
            DatabaseTarget::General,
            "SELECT count(*) AS n FROM mis_zonas",
            &QueryParams::new(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count.get("n"), Some(&json!(0)));
    assert_balanced(&db.gateway);
}

#[tokio::test]
async fn test_concurrent_writes_release_every_connection() {
    let db = setup().await;

    // Every name is inserted twice, so about half the writes hit UNIQUE.
    let mut names: Vec<String> = (0..20).map(|i| format!("Zona {i}")).collect();
    names.extend(names.clone());
    names.shuffle(&mut rand::thread_rng());

    let handles: Vec<_> = names
        .into_iter()
        .map(|nombre| {
            let gateway = Arc::clone(&db.gateway);
            tokio::spawn(async move {
                gateway
                    .execute_write(
                        DatabaseTarget::General,
                        "INSERT INTO mis_zonas (nombre) VALUES (:nombre) RETURNING id",
                        &QueryParams::new().with("nombre", nombre),
                    )
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert!(outcome.as_i64().is_some());
                committed += 1;
            }
            Err(err) => assert!(matches!(err, DbError::Query { .. }), "{err:?}"),
        }
    }
    assert!(committed <= 20);
    assert_balanced(&db.gateway);

    let rows = db
        .gateway
        .execute_read(DatabaseTarget::General, "SELECT nombre FROM mis_zonas", &QueryParams::new())
        .await
        .unwrap();
    assert_eq!(rows.len(), committed);
    assert!(db.gateway.stats().iter().all(|s| s.in_use() == 0));
}

#[tokio::test]
async fn test_concurrent_requests_release_every_connection() {
    let db = setup().await;
    db.gateway
        .execute_write(
            DatabaseTarget::General,
            "INSERT INTO mis_zonas (nombre) VALUES ('Centro')",
            &QueryParams::new(),
        )
        .await
        .unwrap();

    // A random mix of good reads, failing reads and reads on both pools,
    // more than either pool can serve at once.
    let mut ops: Vec<(DatabaseTarget, &'static str)> = Vec::new();
    for _ in 0..10 {
        ops.push((DatabaseTarget::General, "SELECT nombre FROM mis_zonas"));
        ops.push((DatabaseTarget::General, "SELECT * FROM tabla_inexistente"));
        ops.push((DatabaseTarget::Secondary, "SELECT count(*) AS n FROM faismun_2024_geo"));
    }
    ops.shuffle(&mut rand::thread_rng());

    let before: Vec<u64> = db.gateway.stats().iter().map(|s| s.acquired).collect();

    let handles: Vec<_> = ops
        .into_iter()
        .map(|(target, sql)| {
            let gateway = Arc::clone(&db.gateway);
            tokio::spawn(async move {
                gateway
                    .execute_read(target, sql, &QueryParams::new())
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 20);

    let stats = db.gateway.stats();
    assert_eq!(stats[0].acquired - before[0], 20);
    assert_eq!(stats[1].acquired - before[1], 10);
    assert_balanced(&db.gateway);
    assert!(stats.iter().all(|s| s.in_use() == 0));

    // The pools still hand out connections afterwards.
    let rows = db
        .gateway
        .execute_read(DatabaseTarget::General, "SELECT nombre FROM mis_zonas", &QueryParams::new())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}
