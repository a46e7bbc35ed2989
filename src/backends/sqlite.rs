//! SQLite backend.
//!
//! Wraps an `r2d2` connection pool over `rusqlite`. Supports file-based
//! databases (the production mode for the file-based engine kind) and
//! in-memory databases for tests. In-memory databases use a shared-cache
//! URI plus an anchor connection so that every pooled connection sees the
//! same database for the lifetime of the backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::{ConnectionDescriptor, DatabaseKind};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::transaction::{DriverProvider, TransactionDriver};

use super::Backend;

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency (file databases only).
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// SQLite backend over a pooled connection manager.
pub struct SqliteBackend {
    conn_id: String,
    pool: Pool<SqliteConnectionManager>,
    // keeps a shared-cache in-memory database alive across checkouts
    _anchor: Option<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("conn_id", &self.conn_id)
            .field("in_memory", &self._anchor.is_some())
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Opens the database a resolved descriptor points at.
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        Self::open_uri(&descriptor.conn_id, &descriptor.connection_string, config)
    }

    /// Creates a fresh in-memory database, private to this backend.
    pub fn in_memory(conn_id: impl Into<String>) -> StorageResult<Self> {
        let conn_id = conn_id.into();
        let uri = format!(
            "file:{}_{}?mode=memory&cache=shared",
            conn_id,
            uuid::Uuid::new_v4().simple()
        );
        let anchor = Connection::open(&uri).map_err(|e| connection_failed(&e))?;
        let mut backend = Self::open_uri(
            &conn_id,
            &uri,
            SqliteBackendConfig {
                enable_wal: false,
                ..Default::default()
            },
        )?;
        backend._anchor = Some(Mutex::new(anchor));
        Ok(backend)
    }

    fn open_uri(conn_id: &str, uri: &str, config: SqliteBackendConfig) -> StorageResult<Self> {
        let busy_timeout = config.busy_timeout_ms;
        let enable_wal = config.enable_wal && !uri.contains("mode=memory");
        let manager = SqliteConnectionManager::file(uri).with_init(move |conn| {
            conn.busy_timeout(std::time::Duration::from_millis(busy_timeout as u64))?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            if enable_wal {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(std::time::Duration::from_millis(
                config.connection_timeout_ms,
            ))
            .build(manager)
            .map_err(|e| connection_failed(&e))?;

        Ok(Self {
            conn_id: conn_id.to_string(),
            pool,
            _anchor: None,
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    /// Checks a raw connection out of the pool.
    pub fn checkout(&self) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// A driver provider backed by this backend's pool.
    pub fn driver_provider(&self) -> SqliteDriverProvider {
        SqliteDriverProvider {
            pool: self.pool.clone(),
        }
    }

    fn ping_blocking(&self) -> StorageResult<()> {
        let conn = self.checkout()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn conn_id(&self) -> &str {
        &self.conn_id
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn ping(&self) -> StorageResult<()> {
        self.ping_blocking()
    }
}

fn connection_failed(err: &dyn std::fmt::Display) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message: err.to_string(),
    })
}

/// A pooled SQLite connection driving one physical transaction.
pub struct SqliteDriver {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl SqliteDriver {
    /// The wrapped connection; queries inside the transaction run here.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl TransactionDriver for SqliteDriver {
    fn begin(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))?;
        Ok(())
    }
}

/// Checks [`SqliteDriver`]s out of a shared pool.
#[derive(Clone)]
pub struct SqliteDriverProvider {
    pool: Pool<SqliteConnectionManager>,
}

impl DriverProvider for SqliteDriverProvider {
    type Driver = SqliteDriver;

    fn checkout(&self) -> StorageResult<SqliteDriver> {
        Ok(SqliteDriver {
            conn: self.pool.get()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Propagation, UnitOfWork};

    #[test]
    fn test_in_memory_shared_across_checkouts() {
        let backend = SqliteBackend::in_memory("main").unwrap();
        let first = backend.checkout().unwrap();
        first
            .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7)")
            .unwrap();
        drop(first);

        let second = backend.checkout().unwrap();
        let v: i64 = second
            .query_row("SELECT v FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_ping() {
        let backend = SqliteBackend::in_memory("main").unwrap();
        backend.ping().await.unwrap();
        assert_eq!(backend.kind(), DatabaseKind::Sqlite);
        assert_eq!(backend.conn_id(), "main");
    }

    #[test]
    fn test_driver_commit_and_rollback() {
        let backend = SqliteBackend::in_memory("main").unwrap();
        backend
            .checkout()
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();

        let mut uow = UnitOfWork::new(backend.driver_provider());

        uow.begin(Propagation::Required).unwrap();
        uow.active_driver_mut()
            .unwrap()
            .connection()
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap();
        uow.commit().unwrap();

        uow.begin(Propagation::Required).unwrap();
        uow.active_driver_mut()
            .unwrap()
            .connection()
            .execute("INSERT INTO t VALUES (2)", [])
            .unwrap();
        uow.rollback().unwrap();

        let conn = backend.checkout().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1, "rolled-back insert must not persist");
    }

    #[test]
    fn test_driver_savepoints() {
        let backend = SqliteBackend::in_memory("main").unwrap();
        backend
            .checkout()
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();

        let mut uow = UnitOfWork::new(backend.driver_provider());
        uow.begin(Propagation::Required).unwrap();
        uow.active_driver_mut()
            .unwrap()
            .connection()
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap();

        uow.begin(Propagation::Nested).unwrap();
        uow.active_driver_mut()
            .unwrap()
            .connection()
            .execute("INSERT INTO t VALUES (2)", [])
            .unwrap();
        // undo only the nested fragment
        uow.rollback().unwrap();

        uow.commit().unwrap();

        let conn = backend.checkout().unwrap();
        let values: Vec<i64> = conn
            .prepare("SELECT v FROM t ORDER BY v")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![1]);
    }
}
