//! Filter installation for one connection scope.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{EntityRegistry, IsolationStrategy};
use crate::tenant::TenantContext;

/// Tenant id marking rows as shared across all tenants.
///
/// Rows carrying this value in a row-isolated table are visible to every
/// tenant; this is deliberate shared-reference-data behavior.
pub const SHARED_TENANT_ID: i64 = 0;

/// The row predicate installed for one row-isolated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    /// The tenant discriminator column.
    pub column: String,
    /// The tenant the scope belongs to.
    pub tenant_id: i64,
}

impl RowFilter {
    /// Renders the predicate as a SQL fragment.
    ///
    /// The tenant id is a validated integer, so it is rendered inline.
    pub fn sql(&self, table_alias: Option<&str>) -> String {
        let column = match table_alias {
            Some(alias) => format!("{}.{}", alias, self.column),
            None => self.column.clone(),
        };
        format!(
            "({col} = {tenant} OR {col} = {shared})",
            col = column,
            tenant = self.tenant_id,
            shared = SHARED_TENANT_ID
        )
    }

    /// Evaluates the predicate against a row's tenant id.
    pub fn matches(&self, row_tenant: i64) -> bool {
        row_tenant == self.tenant_id || row_tenant == SHARED_TENANT_ID
    }
}

/// The complete filter set for one connection scope.
///
/// Installed once per scope acquisition; read-only afterwards. Holds the
/// entity registry so table resolution and predicates stay consistent for
/// the scope's lifetime.
#[derive(Debug, Clone)]
pub struct ScopeFilters {
    entities: Arc<EntityRegistry>,
    /// `None` when the scope is privileged (no isolation applied).
    tenant_id: Option<i64>,
    row_filters: HashMap<String, RowFilter>,
    table_map: HashMap<String, String>,
}

impl ScopeFilters {
    /// Installs filters for the given context.
    ///
    /// A privileged context (either id unset) installs none: the scope sees
    /// all tenants' rows and unmapped base tables. This is the intended
    /// escape hatch for system and background operations, not an error.
    pub fn install(entities: Arc<EntityRegistry>, context: &TenantContext) -> Self {
        if context.is_privileged() {
            return Self {
                entities,
                tenant_id: None,
                row_filters: HashMap::new(),
                table_map: HashMap::new(),
            };
        }

        let tenant_id = context.tenant_id;
        let mut row_filters = HashMap::new();
        let mut table_map = HashMap::new();
        for descriptor in entities.entities_with(IsolationStrategy::RowIsolated) {
            let column = descriptor
                .tenant_column
                .clone()
                .expect("validated at registry build");
            row_filters.insert(
                descriptor.entity.clone(),
                RowFilter { column, tenant_id },
            );
        }
        for descriptor in entities.entities_with(IsolationStrategy::TableIsolated) {
            table_map.insert(
                descriptor.table.clone(),
                EntityRegistry::tenant_table_name(&descriptor.table, tenant_id),
            );
        }

        Self {
            entities,
            tenant_id: Some(tenant_id),
            row_filters,
            table_map,
        }
    }

    /// The scope's tenant id, or `None` for a privileged scope.
    pub fn tenant_id(&self) -> Option<i64> {
        self.tenant_id
    }

    /// Returns `true` when no isolation applies to this scope.
    pub fn is_unfiltered(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// The entity registry this scope was installed from.
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// The row predicate for an entity, if one is installed.
    pub fn row_predicate(&self, entity: &str) -> Option<&RowFilter> {
        self.row_filters.get(entity)
    }

    /// Resolves the physical table an entity's queries must target.
    ///
    /// Table-isolated entities resolve to their tenant-suffixed table;
    /// everything else resolves to the base table. Unknown entities return
    /// `None`.
    pub fn resolve_table(&self, entity: &str) -> Option<String> {
        let descriptor = self.entities.get(entity)?;
        Some(
            self.table_map
                .get(&descriptor.table)
                .cloned()
                .unwrap_or_else(|| descriptor.table.clone()),
        )
    }

    /// Returns `true` if the entity needs a dedicated per-tenant
    /// connection selected *before* this layer is reached.
    pub fn requires_dedicated_connection(&self, entity: &str) -> bool {
        self.entities
            .is_strategy(entity, IsolationStrategy::DatabaseIsolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityDescriptor;

    fn sample_entities() -> Arc<EntityRegistry> {
        Arc::new(
            EntityRegistry::builder()
                .register(
                    EntityDescriptor::new("business_record", "business_record")
                        .with_tenant_column("tenant_id"),
                )
                .register(
                    EntityDescriptor::new("ledger_entry", "ledger_entry")
                        .with_strategy(IsolationStrategy::TableIsolated),
                )
                .register(
                    EntityDescriptor::new("branch_record", "branch_record")
                        .with_strategy(IsolationStrategy::DatabaseIsolated),
                )
                .register(EntityDescriptor::new("dictionary", "dictionary"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_privileged_scope_installs_nothing() {
        let filters = ScopeFilters::install(sample_entities(), &TenantContext::system());
        assert!(filters.is_unfiltered());
        assert!(filters.row_predicate("business_record").is_none());
        assert_eq!(
            filters.resolve_table("ledger_entry").unwrap(),
            "ledger_entry"
        );
    }

    #[test]
    fn test_row_filter_installed_for_tenant() {
        let filters = ScopeFilters::install(sample_entities(), &TenantContext::new(5, 77));
        let predicate = filters.row_predicate("business_record").unwrap();
        assert_eq!(predicate.sql(None), "(tenant_id = 5 OR tenant_id = 0)");
        assert_eq!(predicate.sql(Some("b")), "(b.tenant_id = 5 OR b.tenant_id = 0)");
        assert!(predicate.matches(5));
        assert!(predicate.matches(0), "shared rows are visible to all tenants");
        assert!(!predicate.matches(6));
    }

    #[test]
    fn test_table_mapping_installed_for_tenant() {
        let filters = ScopeFilters::install(sample_entities(), &TenantContext::new(5, 77));
        assert_eq!(
            filters.resolve_table("ledger_entry").unwrap(),
            "ledger_entry_5"
        );
        // non-table-isolated entities keep their base tables
        assert_eq!(
            filters.resolve_table("business_record").unwrap(),
            "business_record"
        );
        assert_eq!(filters.resolve_table("dictionary").unwrap(), "dictionary");
        assert!(filters.resolve_table("missing").is_none());
    }

    #[test]
    fn test_unisolated_entity_gets_no_predicate() {
        let filters = ScopeFilters::install(sample_entities(), &TenantContext::new(5, 77));
        assert!(filters.row_predicate("dictionary").is_none());
    }

    #[test]
    fn test_database_isolation_flagged_not_filtered() {
        let filters = ScopeFilters::install(sample_entities(), &TenantContext::new(5, 77));
        assert!(filters.requires_dedicated_connection("branch_record"));
        assert!(!filters.requires_dedicated_connection("business_record"));
        assert!(filters.row_predicate("branch_record").is_none());
        assert_eq!(
            filters.resolve_table("branch_record").unwrap(),
            "branch_record"
        );
    }
}
