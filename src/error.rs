//! Error types for the routing and isolation layer.
//!
//! This module defines all error types used throughout the crate, following
//! a hierarchy that separates startup/configuration errors, tenant errors,
//! transaction errors, concurrency errors, and connection errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all routing and isolation operations.
///
/// This enum encompasses all possible errors that can occur in the layer,
/// organized by category.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Startup configuration errors (fatal, abort process start)
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Tenant isolation errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Transaction propagation and lifecycle errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Concurrency and optimistic-locking errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Connection routing and failover errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while loading connection and entity configuration.
///
/// These are fatal: a process that hits one of these cannot start.
#[derive(Error, Debug)]
pub enum StartupError {
    /// No configured entry maps to the reserved log-database identifier.
    #[error("no log database connection configured (reserved id: {reserved_id})")]
    LogConnectionMissing { reserved_id: String },

    /// The configured main-database identifier matches no enabled entry.
    #[error("main database '{main_db}' not found among enabled connections")]
    MainConnectionMissing { main_db: String },

    /// No enabled business connection remained after filtering.
    #[error("no enabled business database connections configured")]
    NoConnectionsConfigured,

    /// A connection entry carries an invalid identifier.
    #[error("invalid connection id '{conn_id}': {reason}")]
    InvalidConnectionId { conn_id: String, reason: String },

    /// An entity declared row isolation but no tenant column exists.
    #[error("entity '{entity}' is row-isolated but declares no tenant column")]
    MissingTenantColumn { entity: String },

    /// An entity or table name failed identifier validation.
    #[error("invalid identifier '{identifier}' for entity '{entity}'")]
    InvalidIdentifier { entity: String, identifier: String },

    /// An entity was registered twice.
    #[error("entity '{entity}' registered more than once")]
    DuplicateEntity { entity: String },

    /// Settings could not be read or parsed.
    #[error("failed to load settings: {message}")]
    SettingsUnreadable { message: String },
}

/// Errors related to tenant isolation.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The entity is unknown to the isolation registry.
    #[error("unknown entity: {entity}")]
    UnknownEntity { entity: String },

    /// The entity is database-isolated and needs an explicit connection.
    #[error(
        "entity '{entity}' is database-isolated; acquire its dedicated connection before querying"
    )]
    DedicatedConnectionRequired { entity: String },

    /// A write supplied a tenant discriminator belonging to another tenant.
    #[error("cross-tenant write to '{entity}': tenant {attempted} from a tenant-{scope} scope")]
    CrossTenantWrite {
        entity: String,
        attempted: i64,
        scope: i64,
    },

    /// A tenant id outside the valid range was supplied.
    #[error("invalid tenant id: {tenant_id}")]
    InvalidTenantId { tenant_id: i64 },
}

/// Errors related to transaction propagation and lifecycle.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Mandatory propagation was requested outside any transaction, or a
    /// commit/rollback arrived with no open frame.
    #[error("no active transaction ({requested})")]
    NoActiveTransaction { requested: String },

    /// The transaction was rolled back.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// A savepoint operation failed.
    #[error("savepoint '{name}' failed: {message}")]
    SavepointFailed { name: String, message: String },

    /// The underlying driver refused to open or finish a transaction.
    #[error("transaction driver error: {message}")]
    Driver { message: String },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Version conflict detected during optimistic locking.
    #[error("version conflict on {table}/{key}: expected version {expected_version}")]
    VersionConflict {
        table: String,
        key: String,
        expected_version: i64,
    },
}

/// Errors related to connection routing and failover.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// A physical connection could not be reached.
    #[error("connection '{conn_id}' unreachable: {message}")]
    Unreachable { conn_id: String, message: String },

    /// The primary and every configured replica failed the reachability check.
    #[error("primary and all {attempted} replica(s) unreachable")]
    AllReplicasExhausted { attempted: usize },

    /// No connection with the given identifier is registered.
    #[error("unknown connection id: {conn_id}")]
    UnknownConnection { conn_id: String },

    /// The engine kind has no compiled-in backend.
    #[error("no backend compiled in for engine kind '{kind}'")]
    UnsupportedEngine { kind: String },
}

/// Errors originating from a database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for routing and isolation operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}
