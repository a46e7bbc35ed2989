//! Database backend implementations.
//!
//! Backends are compiled in via cargo features: `sqlite` (default) for the
//! file-based engine and `postgres` for PostgreSQL deployments. Every
//! backend exposes its connection id, engine kind, and a reachability
//! check; the routing layer uses the reachability check when deciding
//! whether to fail over from the primary to a replica.

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresBackend, PostgresBackendConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteBackendConfig, SqliteDriver, SqliteDriverProvider};

use async_trait::async_trait;

use crate::config::DatabaseKind;
use crate::error::StorageResult;

/// Common surface of a compiled-in database backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The connection identifier this backend was built from.
    fn conn_id(&self) -> &str;

    /// The engine kind.
    fn kind(&self) -> DatabaseKind;

    /// Checks that the underlying database answers a trivial query.
    ///
    /// Routing calls this once per acquisition; failures trigger replica
    /// failover rather than surfacing directly.
    async fn ping(&self) -> StorageResult<()>;
}
