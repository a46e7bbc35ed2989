//! Connection acquisition and primary/replica failover.
//!
//! [`DataRouter`] is the runtime entry point of the layer: given the
//! immutable [`ConnectionRegistry`] and [`EntityRegistry`], it hands out
//! [`ScopedConnection`]s with the caller's isolation filters installed.
//!
//! Reachability is checked once per acquisition. When the primary fails the
//! check, the router walks the configured replicas in hit-rate order and
//! returns the first one that answers; only when every candidate fails does
//! the caller see an error. There is no background monitor.
//!
//! The reserved log connection is available through
//! [`DataRouter::log_backend`] and never participates in business routing.
//! The scoped query surface runs on the file-based engine; client-server
//! deployments use the feature-gated backends directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::backends::{Backend, SqliteBackend, SqliteBackendConfig};
use crate::config::{ConnectionDescriptor, ConnectionRegistry, DatabaseKind};
use crate::entity::{EntityDescriptor, EntityRegistry};
use crate::error::{ConnectionError, StorageError, StorageResult};
use crate::scope::ScopedConnection;
use crate::tenant::TenantContext;

/// Routes units of work to the right physical connection.
///
/// Safe to share as a process-wide singleton: the registries are immutable
/// and the backend cache is internally synchronized. Each acquisition
/// still produces its own scope with its own filters, so concurrent units
/// of work never see each other's tenant configuration.
pub struct DataRouter {
    registry: ConnectionRegistry,
    entities: Arc<EntityRegistry>,
    sqlite_config: SqliteBackendConfig,
    backends: RwLock<HashMap<String, Arc<SqliteBackend>>>,
}

impl DataRouter {
    /// Creates a router over loaded registries.
    pub fn new(registry: ConnectionRegistry, entities: EntityRegistry) -> Self {
        Self::with_sqlite_config(registry, entities, SqliteBackendConfig::default())
    }

    /// Creates a router with explicit SQLite pool configuration.
    pub fn with_sqlite_config(
        registry: ConnectionRegistry,
        entities: EntityRegistry,
        sqlite_config: SqliteBackendConfig,
    ) -> Self {
        Self {
            registry,
            entities: Arc::new(entities),
            sqlite_config,
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The entity registry.
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Entities that need per-tenant tables provisioned.
    pub fn table_isolated_entities(&self) -> Vec<&EntityDescriptor> {
        self.entities.table_isolated()
    }

    /// Acquires a scoped connection for the caller's tenant context.
    ///
    /// Routes to the primary; falls back through its replicas (highest hit
    /// rate first) when the primary is unreachable.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AllReplicasExhausted`] when the primary and every
    /// replica fail the reachability check.
    pub async fn acquire(&self, context: &TenantContext) -> StorageResult<ScopedConnection> {
        let primary = self.registry.primary();
        match self.open_scope(primary, context, false).await {
            Ok(scope) => Ok(scope),
            Err(primary_err) => {
                warn!(
                    conn_id = %primary.conn_id,
                    error = %primary_err,
                    "primary unreachable, trying replicas"
                );
                for replica in self.registry.primary_replicas() {
                    match self.open_scope(replica, context, false).await {
                        Ok(scope) => {
                            warn!(conn_id = %replica.conn_id, "failed over to replica");
                            return Ok(scope);
                        }
                        Err(err) => {
                            warn!(conn_id = %replica.conn_id, error = %err, "replica unreachable");
                        }
                    }
                }
                Err(ConnectionError::AllReplicasExhausted {
                    attempted: self.registry.primary_replicas().len(),
                }
                .into())
            }
        }
    }

    /// Acquires a scope on an explicitly selected connection.
    ///
    /// This is how database-isolated tenants are served: the caller looks
    /// up the tenant's connection id and selects it here before issuing
    /// queries. Also used by administrative tooling targeting a specific
    /// database.
    pub async fn acquire_on(
        &self,
        conn_id: &str,
        context: &TenantContext,
    ) -> StorageResult<ScopedConnection> {
        let descriptor = self.registry.get(conn_id).ok_or_else(|| {
            StorageError::from(ConnectionError::UnknownConnection {
                conn_id: conn_id.to_string(),
            })
        })?;
        self.open_scope(descriptor, context, true).await
    }

    /// The backend for the reserved audit/log connection.
    pub fn log_backend(&self) -> StorageResult<Arc<SqliteBackend>> {
        self.backend_for(self.registry.log_connection())
    }

    /// Direct, unfiltered access to a business backend by id.
    ///
    /// For administrative work (schema migration, provisioning) that runs
    /// outside tenant scopes. Application code should go through
    /// [`acquire`](Self::acquire) instead.
    pub fn sqlite_backend(&self, conn_id: &str) -> StorageResult<Arc<SqliteBackend>> {
        let descriptor = self.registry.get(conn_id).ok_or_else(|| {
            StorageError::from(ConnectionError::UnknownConnection {
                conn_id: conn_id.to_string(),
            })
        })?;
        self.backend_for(descriptor)
    }

    async fn open_scope(
        &self,
        descriptor: &ConnectionDescriptor,
        context: &TenantContext,
        dedicated: bool,
    ) -> StorageResult<ScopedConnection> {
        let backend = self.backend_for(descriptor)?;
        backend.ping().await.map_err(|e| {
            StorageError::from(ConnectionError::Unreachable {
                conn_id: descriptor.conn_id.clone(),
                message: e.to_string(),
            })
        })?;
        let scope = if dedicated {
            ScopedConnection::open_dedicated(&backend, Arc::clone(&self.entities), context)
        } else {
            ScopedConnection::open(&backend, Arc::clone(&self.entities), context)
        };
        Ok(scope)
    }

    fn backend_for(&self, descriptor: &ConnectionDescriptor) -> StorageResult<Arc<SqliteBackend>> {
        if descriptor.kind != DatabaseKind::Sqlite {
            return Err(ConnectionError::UnsupportedEngine {
                kind: descriptor.kind.to_string(),
            }
            .into());
        }
        if let Some(backend) = self.backends.read().get(&descriptor.conn_id) {
            return Ok(Arc::clone(backend));
        }
        let backend = Arc::new(SqliteBackend::from_descriptor(
            descriptor,
            self.sqlite_config.clone(),
        )?);
        let mut cache = self.backends.write();
        let entry = cache
            .entry(descriptor.conn_id.clone())
            .or_insert_with(|| Arc::clone(&backend));
        Ok(Arc::clone(entry))
    }
}

impl std::fmt::Debug for DataRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRouter")
            .field("primary", &self.registry.primary().conn_id)
            .field("multi_database", &self.registry.is_multi_database())
            .field("entities", &self.entities.len())
            .finish_non_exhaustive()
    }
}
