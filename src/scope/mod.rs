//! Per-scope isolation: row filters, table mapping, and the scoped
//! connection.
//!
//! Filters are installed once per connection scope — once per inbound
//! request or background job — from the entity registry and the caller's
//! [`TenantContext`](crate::tenant::TenantContext). They are local to the
//! scope: concurrent units of work over the same shared pool each carry
//! their own filter set, so one tenant's configuration can never leak into
//! another's.
//!
//! A privileged context installs nothing: every row of every table stays
//! visible. Otherwise:
//!
//! - row-isolated entities get the predicate `col = tenant OR col = 0`
//!   (rows with tenant id `0` are shared reference data, visible to all
//!   tenants even inside a row-isolated table);
//! - table-isolated entities get a base-table → `{base}_{tenant}` mapping;
//! - database-isolated entities are *not* handled here — the caller must
//!   have selected the tenant's dedicated connection before queries are
//!   issued, and the scoped connection rejects them otherwise.

#[cfg(feature = "sqlite")]
mod connection;
mod filters;

#[cfg(feature = "sqlite")]
pub use connection::ScopedConnection;
pub use filters::{RowFilter, SHARED_TENANT_ID, ScopeFilters};
