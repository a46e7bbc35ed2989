//! Tests for connection configuration loading.
//!
//! These cover the end-to-end path from JSON settings through the loaded
//! registry: main-first ordering, log-slot diversion, connection-string
//! resolution, and the fatal startup conditions.

use std::path::Path;

use stratum_persistence::config::{
    ConnectionRegistry, DATA_DIR_NAME, DatabaseSettings, ROOT_MARKER_FILE,
};
use stratum_persistence::error::{StartupError, StorageError};

// ============================================================================
// Helper Functions
// ============================================================================

fn load(json: &str, base_dir: &Path) -> Result<ConnectionRegistry, StorageError> {
    let settings = DatabaseSettings::from_json_str(json).expect("settings parse");
    ConnectionRegistry::load(&settings, base_dir)
}

// ============================================================================
// Selection Tests
// ============================================================================

/// The minimal two-entry configuration: one business connection, one log.
#[test]
fn test_minimal_main_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "enabled": true, "kind": "sqlite", "connection_string": "main.db"},
                {"conn_id": "Log", "enabled": true, "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    let ids: Vec<_> = registry
        .business_connections()
        .iter()
        .map(|d| d.conn_id.as_str())
        .collect();
    assert_eq!(ids, vec!["main"]);
    assert_eq!(registry.log_connection().conn_id, "Log");
    assert!(!registry.is_multi_database());
}

/// The main entry moves to position 0 regardless of configured order.
#[test]
fn test_main_is_always_first() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "reports",
            "databases": [
                {"conn_id": "archive", "kind": "sqlite", "connection_string": "archive.db"},
                {"conn_id": "reports", "kind": "sqlite", "connection_string": "reports.db"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    assert_eq!(registry.primary().conn_id, "reports");
    assert!(registry.is_multi_database());
}

/// Two entries sharing the main id: exactly one is selected (the first),
/// and it is not duplicated in the ordered list.
#[test]
fn test_duplicate_main_id_no_duplication() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "first.db"},
                {"conn_id": "main", "kind": "sqlite", "connection_string": "second.db"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    assert_eq!(registry.business_connections().len(), 2);
    assert!(registry.primary().connection_string.ends_with("first.db"));
}

#[test]
fn test_disabled_entries_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "main.db"},
                {"conn_id": "extra", "enabled": false, "kind": "sqlite", "connection_string": "extra.db"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    assert!(registry.get("extra").is_none());
    assert!(!registry.is_multi_database());
}

// ============================================================================
// Fatal Startup Conditions
// ============================================================================

#[test]
fn test_no_log_connection_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "main.db"}
            ]
        }"#,
        dir.path(),
    );
    assert!(matches!(
        result,
        Err(StorageError::Startup(StartupError::LogConnectionMissing { .. }))
    ));
}

#[test]
fn test_disabled_log_connection_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "main.db"},
                {"conn_id": "Log", "enabled": false, "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    );
    assert!(matches!(
        result,
        Err(StorageError::Startup(StartupError::LogConnectionMissing { .. }))
    ));
}

#[test]
fn test_unknown_main_id_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = load(
        r#"{
            "main_db": "nope",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "main.db"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    );
    assert!(matches!(
        result,
        Err(StorageError::Startup(StartupError::MainConnectionMissing { .. }))
    ));
}

// ============================================================================
// Connection-String Resolution
// ============================================================================

/// A bare SQLite filename resolves to an absolute path whose parent
/// directory exists on disk after loading.
#[test]
fn test_sqlite_filename_round_trip() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join(ROOT_MARKER_FILE), "").unwrap();
    let nested = root.path().join("deploy").join("bin");
    std::fs::create_dir_all(&nested).unwrap();

    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "sqlite", "connection_string": "main.db"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        &nested,
    )
    .unwrap();

    let path = Path::new(&registry.primary().connection_string);
    assert!(path.is_absolute());
    assert!(path.parent().unwrap().is_dir());
    // resolved under the marker root, not the nested base dir
    assert_eq!(path.parent().unwrap(), root.path().join(DATA_DIR_NAME));
}

/// Client-server engines read credentials from local override files in
/// preference to the configured value.
#[test]
fn test_client_server_override_file_wins() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("mysql_conn.txt"),
        "Server=db.internal;Uid=app;Pwd=hunter2\n",
    )
    .unwrap();

    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "mysql", "connection_string": "Server=localhost;Uid=dev"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    assert_eq!(
        registry.primary().connection_string,
        "Server=db.internal;Uid=app;Pwd=hunter2"
    );
}

#[test]
fn test_client_server_fallback_to_configured() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {"conn_id": "main", "kind": "postgres", "connection_string": "host=localhost user=dev"},
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    assert_eq!(
        registry.primary().connection_string,
        "host=localhost user=dev"
    );
}

// ============================================================================
// Replica Configuration
// ============================================================================

#[test]
fn test_replicas_ordered_by_hit_rate() {
    let dir = tempfile::tempdir().unwrap();
    let registry = load(
        r#"{
            "main_db": "main",
            "databases": [
                {
                    "conn_id": "main", "kind": "sqlite", "connection_string": "main.db",
                    "replicas": [
                        {"conn_id": "r_low", "kind": "sqlite", "connection_string": "r_low.db", "hit_rate": 1},
                        {"conn_id": "r_high", "kind": "sqlite", "connection_string": "r_high.db", "hit_rate": 10},
                        {"conn_id": "r_off", "enabled": false, "kind": "sqlite", "connection_string": "r_off.db", "hit_rate": 99}
                    ]
                },
                {"conn_id": "Log", "kind": "sqlite", "connection_string": "log.db"}
            ]
        }"#,
        dir.path(),
    )
    .unwrap();

    let order: Vec<_> = registry
        .primary_replicas()
        .iter()
        .map(|r| r.conn_id.as_str())
        .collect();
    assert_eq!(order, vec!["r_high", "r_low"]);
}
