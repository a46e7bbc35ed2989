//! PostgreSQL backend.
//!
//! A thin pooled wrapper for client-server deployments: connection options
//! come from a resolved descriptor (override files already applied by the
//! registry), pooling via `deadpool-postgres`. Applications on PostgreSQL
//! use the pooled client directly; the routing layer uses `ping` for
//! failover decisions.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

use crate::config::{ConnectionDescriptor, DatabaseKind};
use crate::error::{BackendError, StorageError, StorageResult};

use super::Backend;

/// Configuration for the PostgreSQL backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresBackendConfig {
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    16
}

impl Default for PostgresBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// PostgreSQL backend over a deadpool connection pool.
pub struct PostgresBackend {
    conn_id: String,
    pool: Pool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Builds a pool from a resolved descriptor.
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        config: PostgresBackendConfig,
    ) -> StorageResult<Self> {
        let pg_config: tokio_postgres::Config = descriptor.connection_string.parse()?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "postgres".to_string(),
                    message: e.to_string(),
                })
            })?;

        Ok(Self {
            conn_id: descriptor.conn_id.clone(),
            pool,
        })
    }

    /// Checks a client out of the pool.
    pub async fn client(&self) -> StorageResult<Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: format!("postgres ({})", self.conn_id),
                message: e.to_string(),
            })
        })
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn conn_id(&self) -> &str {
        &self.conn_id
    }

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::PostgreSql
    }

    async fn ping(&self) -> StorageResult<()> {
        let client = self.client().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}
