//! Explicit entity registry and classification rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StartupError;

/// Valid SQL identifier shape for entity and table names.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// The isolation strategy applied to a persistent entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Shared data, visible to every tenant.
    #[default]
    Unisolated,

    /// One shared table; rows are filtered by a tenant discriminator column.
    RowIsolated,

    /// One physical table per tenant, named `{base}_{tenant_id}`.
    TableIsolated,

    /// One physical database per tenant; connection selection happens in
    /// the routing layer, before any query reaches the entity.
    DatabaseIsolated,
}

impl fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationStrategy::Unisolated => write!(f, "unisolated"),
            IsolationStrategy::RowIsolated => write!(f, "row-isolated"),
            IsolationStrategy::TableIsolated => write!(f, "table-isolated"),
            IsolationStrategy::DatabaseIsolated => write!(f, "database-isolated"),
        }
    }
}

/// Declaration of one persistent entity type.
///
/// A descriptor names the entity, its base table, and optionally an
/// explicit isolation strategy and/or a tenant discriminator column.
/// Classification rules:
///
/// 1. An explicit strategy always wins.
/// 2. Without one, a declared tenant column implies
///    [`IsolationStrategy::RowIsolated`].
/// 3. Otherwise the entity is [`IsolationStrategy::Unisolated`].
///
/// Rule 2 exists because row isolation is the common case and should not
/// require per-entity ceremony; table and database isolation are opt-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Logical entity name, unique within the registry.
    pub entity: String,
    /// Base table name in the database.
    pub table: String,
    /// Explicit isolation declaration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<IsolationStrategy>,
    /// Tenant discriminator column, if the table carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_column: Option<String>,
}

impl EntityDescriptor {
    /// Creates a descriptor with no declaration (unisolated by default).
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            strategy: None,
            tenant_column: None,
        }
    }

    /// Declares an explicit isolation strategy.
    pub fn with_strategy(mut self, strategy: IsolationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Declares the tenant discriminator column.
    pub fn with_tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = Some(column.into());
        self
    }

    /// Resolves the effective strategy for this descriptor.
    pub fn effective_strategy(&self) -> IsolationStrategy {
        match self.strategy {
            Some(strategy) => strategy,
            None if self.tenant_column.is_some() => IsolationStrategy::RowIsolated,
            None => IsolationStrategy::Unisolated,
        }
    }
}

/// Immutable registry of entity isolation declarations.
///
/// Built once at startup via [`EntityRegistry::builder`], validated, and
/// shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entries: HashMap<String, EntityDescriptor>,
}

impl EntityRegistry {
    /// Starts building a registry.
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Returns the effective strategy for an entity, or `None` if unknown.
    pub fn classify(&self, entity: &str) -> Option<IsolationStrategy> {
        self.entries.get(entity).map(|d| d.effective_strategy())
    }

    /// Returns `true` if the entity is registered with the given strategy.
    pub fn is_strategy(&self, entity: &str, strategy: IsolationStrategy) -> bool {
        self.classify(entity) == Some(strategy)
    }

    /// Returns the descriptor for an entity.
    pub fn get(&self, entity: &str) -> Option<&EntityDescriptor> {
        self.entries.get(entity)
    }

    /// Returns every descriptor whose effective strategy matches.
    pub fn entities_with(&self, strategy: IsolationStrategy) -> Vec<&EntityDescriptor> {
        let mut found: Vec<&EntityDescriptor> = self
            .entries
            .values()
            .filter(|d| d.effective_strategy() == strategy)
            .collect();
        found.sort_by(|a, b| a.entity.cmp(&b.entity));
        found
    }

    /// Returns the table-isolated descriptors.
    ///
    /// Administrative tooling uses this to provision per-tenant tables when
    /// a new tenant is created.
    pub fn table_isolated(&self) -> Vec<&EntityDescriptor> {
        self.entities_with(IsolationStrategy::TableIsolated)
    }

    /// Computes the tenant-specific table name for a base table.
    pub fn tenant_table_name(base: &str, tenant_id: i64) -> String {
        format!("{}_{}", base, tenant_id)
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entities are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`EntityRegistry`].
#[derive(Debug)]
pub struct EntityRegistryBuilder {
    entries: Vec<EntityDescriptor>,
}

impl EntityRegistryBuilder {
    /// Adds one entity declaration.
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.entries.push(descriptor);
        self
    }

    /// Validates all declarations and produces the immutable registry.
    ///
    /// # Errors
    ///
    /// * [`StartupError::InvalidIdentifier`] - entity or table name is not a
    ///   valid SQL identifier
    /// * [`StartupError::MissingTenantColumn`] - an explicitly row-isolated
    ///   entity has no tenant column (this must fail at startup, not at
    ///   query time)
    /// * [`StartupError::DuplicateEntity`] - the same entity name twice
    pub fn build(self) -> Result<EntityRegistry, StartupError> {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for descriptor in self.entries {
            for identifier in [&descriptor.entity, &descriptor.table] {
                if !IDENTIFIER.is_match(identifier) {
                    return Err(StartupError::InvalidIdentifier {
                        entity: descriptor.entity.clone(),
                        identifier: identifier.clone(),
                    });
                }
            }
            if let Some(column) = &descriptor.tenant_column {
                if !IDENTIFIER.is_match(column) {
                    return Err(StartupError::InvalidIdentifier {
                        entity: descriptor.entity.clone(),
                        identifier: column.clone(),
                    });
                }
            }
            if descriptor.effective_strategy() == IsolationStrategy::RowIsolated
                && descriptor.tenant_column.is_none()
            {
                return Err(StartupError::MissingTenantColumn {
                    entity: descriptor.entity,
                });
            }
            let entity = descriptor.entity.clone();
            if entries.insert(entity.clone(), descriptor).is_some() {
                return Err(StartupError::DuplicateEntity { entity });
            }
        }
        Ok(EntityRegistry { entries })
    }
}
