//! Entity classification for tenant isolation.
//!
//! Persistent entity types are classified by which isolation strategy
//! applies to them. Classification is driven by an explicit, statically
//! constructed [`EntityRegistry`]: every entity the application persists is
//! registered once at startup, and the resulting registry is immutable and
//! shared read-only for the life of the process. There is no runtime type
//! scanning; what is not registered is not isolated.
//!
//! # Strategies
//!
//! - [`IsolationStrategy::Unisolated`] — visible to all tenants (reference
//!   and configuration data). The default for entities with no tenant
//!   column and no explicit declaration.
//! - [`IsolationStrategy::RowIsolated`] — all tenants share one table; a
//!   discriminator column identifies ownership. The default for entities
//!   that declare a tenant column.
//! - [`IsolationStrategy::TableIsolated`] — each tenant has its own table,
//!   distinguished by an id suffix on the base table name.
//! - [`IsolationStrategy::DatabaseIsolated`] — each tenant has its own
//!   physical database; the connection must be selected before queries are
//!   issued.
//!
//! # Example
//!
//! ```
//! use stratum_persistence::entity::{EntityDescriptor, EntityRegistry, IsolationStrategy};
//!
//! let registry = EntityRegistry::builder()
//!     // tenant column implies row isolation, no explicit declaration needed
//!     .register(EntityDescriptor::new("business_record", "business_record")
//!         .with_tenant_column("tenant_id"))
//!     // table isolation is opt-in
//!     .register(EntityDescriptor::new("ledger_entry", "ledger_entry")
//!         .with_strategy(IsolationStrategy::TableIsolated))
//!     // unregistered columns, no declaration: shared reference data
//!     .register(EntityDescriptor::new("dictionary", "dictionary"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registry.classify("business_record"), Some(IsolationStrategy::RowIsolated));
//! assert_eq!(registry.classify("dictionary"), Some(IsolationStrategy::Unisolated));
//! ```

mod registry;

pub use registry::{EntityDescriptor, EntityRegistry, EntityRegistryBuilder, IsolationStrategy};
