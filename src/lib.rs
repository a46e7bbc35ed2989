//! Stratum persistence layer
//!
//! This crate is the multi-tenant connection-routing and data-isolation
//! layer that sits beneath an application's data access. It owns three
//! concerns:
//!
//! 1. **Connection routing** — loading the configured physical databases
//!    (one primary, optional read replicas, and a reserved audit/log
//!    database), resolving credentials, and failing over from the primary
//!    to replicas at acquisition time.
//! 2. **Tenant isolation** — classifying persistent entity types by
//!    isolation strategy and installing per-scope row filters and
//!    table-name mappings so one code path transparently reads and writes
//!    the correct tenant's data, whether isolation is by row, by table, or
//!    by database.
//! 3. **Transactions** — propagated transaction scopes over a single
//!    connection (join, mandatory, savepoint nesting, suspend-and-resume).
//!
//! # Architecture
//!
//! - [`config`] - connection settings and the immutable [`ConnectionRegistry`]
//! - [`entity`] - entity isolation declarations and the [`EntityRegistry`]
//! - [`tenant`] - the per-operation [`TenantContext`]
//! - [`scope`] - per-scope filter installation and the scoped connection
//! - [`transaction`] - propagation modes and the [`UnitOfWork`] coordinator
//! - [`backends`] - feature-gated database backends (`sqlite` by default,
//!   `postgres` optional)
//! - [`router`] - runtime acquisition with primary/replica failover
//! - [`audit`] - batched audit writes to the reserved log database
//!
//! # Quick Start
//!
//! ```no_run
//! use stratum_persistence::config::{ConnectionRegistry, DatabaseSettings};
//! use stratum_persistence::entity::{EntityDescriptor, EntityRegistry, IsolationStrategy};
//! use stratum_persistence::router::DataRouter;
//! use stratum_persistence::tenant::TenantContext;
//!
//! # async fn demo() -> stratum_persistence::error::StorageResult<()> {
//! // Load connections once at startup; fails fast when the log database
//! // or the main database is missing.
//! let settings = DatabaseSettings::from_json_file("databases.json")?;
//! let registry = ConnectionRegistry::load(&settings, &std::env::current_dir().unwrap())?;
//!
//! // Declare every persistent entity explicitly.
//! let entities = EntityRegistry::builder()
//!     .register(EntityDescriptor::new("business_record", "business_record")
//!         .with_tenant_column("tenant_id"))
//!     .register(EntityDescriptor::new("ledger_entry", "ledger_entry")
//!         .with_strategy(IsolationStrategy::TableIsolated))
//!     .register(EntityDescriptor::new("dictionary", "dictionary"))
//!     .build()?;
//!
//! let router = DataRouter::new(registry, entities);
//!
//! // Per inbound operation: acquire a scope for the caller's tenant.
//! let ctx = TenantContext::new(7, 1001);
//! let mut scope = router.acquire(&ctx).await?;
//!
//! // Queries are filtered and rewritten transparently for tenant 7.
//! let rows = scope.select("business_record", &["id", "title"], None, &[])?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```
//!
//! # Tenant isolation
//!
//! A [`TenantContext`] with both ids set installs isolation for its scope;
//! a privileged context (either id unset) installs none and sees every
//! tenant's data — the deliberate escape hatch for system and background
//! operations. Row-isolated tables admit rows whose tenant column is `0`
//! to every tenant (shared reference data).
//!
//! # Concurrency
//!
//! Registries are loaded once and shared read-only. Scopes and their
//! filters are per unit of work; the pooled connection object underneath
//! may be shared process-wide. Cross-database operations (business +
//! log, or two database-isolated tenants) are never atomic.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

#[cfg(feature = "sqlite")]
pub mod audit;
pub mod backends;
pub mod config;
pub mod entity;
pub mod error;
#[cfg(feature = "sqlite")]
pub mod router;
pub mod scope;
pub mod tenant;
pub mod transaction;

// Re-export commonly used types at crate root
pub use config::{ConnectionDescriptor, ConnectionRegistry, DatabaseKind, DatabaseSettings};
pub use entity::{EntityDescriptor, EntityRegistry, IsolationStrategy};
pub use error::{StorageError, StorageResult};
pub use scope::ScopeFilters;
pub use tenant::TenantContext;
pub use transaction::{Propagation, UnitOfWork};

#[cfg(feature = "sqlite")]
pub use router::DataRouter;
#[cfg(feature = "sqlite")]
pub use scope::ScopedConnection;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
