//! Per-operation tenant context.

use serde::{Deserialize, Serialize};

/// Sentinel value meaning "no tenant / no user".
///
/// Any id less than or equal to this value is treated as unset.
pub const UNSET_ID: i64 = 0;

/// The tenant and acting user for one unit of work.
///
/// A context with both ids set (`> 0`) causes row filters and table
/// mappings to be installed for its scope. A context where either id is
/// unset is *privileged*: no isolation is applied and every row of every
/// table is visible. That is the escape hatch for system startup, schema
/// migration, and background jobs acting across tenants; it is not an
/// error condition.
///
/// Contexts are cheap to clone, read-only once constructed, and never
/// shared across operations.
///
/// # Examples
///
/// ```
/// use stratum_persistence::tenant::TenantContext;
///
/// let ctx = TenantContext::new(7, 1001);
/// assert!(!ctx.is_privileged());
///
/// let system = TenantContext::system();
/// assert!(system.is_privileged());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// The tenant identifier; `<= 0` means unset.
    pub tenant_id: i64,
    /// The acting user identifier; `<= 0` means unset.
    pub user_id: i64,
    /// Optional correlation id for request tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl TenantContext {
    /// Creates a context for the given tenant and user.
    pub fn new(tenant_id: i64, user_id: i64) -> Self {
        Self {
            tenant_id,
            user_id,
            correlation_id: None,
        }
    }

    /// Creates the privileged system context (no isolation applied).
    pub fn system() -> Self {
        Self::new(UNSET_ID, UNSET_ID)
    }

    /// Attaches a correlation id for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns `true` when this context runs without tenant isolation.
    ///
    /// Both ids must be set for isolation to apply; an unauthenticated or
    /// system scope (either id `<= 0`) sees all tenants' data.
    pub fn is_privileged(&self) -> bool {
        self.tenant_id <= UNSET_ID || self.user_id <= UNSET_ID
    }

    /// Returns the correlation id, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

impl Default for TenantContext {
    fn default() -> Self {
        Self::system()
    }
}
