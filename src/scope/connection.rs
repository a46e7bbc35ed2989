//! The scoped, isolation-and-transaction-aware connection.

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::backends::{Backend, SqliteBackend, SqliteDriverProvider};
use crate::entity::EntityRegistry;
use crate::error::{ConcurrencyError, StorageResult, TenantError};
use crate::scope::filters::{SHARED_TENANT_ID, ScopeFilters};
use crate::tenant::TenantContext;
use crate::transaction::{Propagation, UnitOfWork};

/// A connection scope bound to one tenant context.
///
/// Every query helper resolves its target table through the scope's table
/// mapping and appends the scope's row predicate, so application code gets
/// the correct tenant's data without mentioning tenancy at all — and cannot
/// accidentally bypass it. Inserts into row-isolated tables are stamped
/// with the scope's tenant id.
///
/// Queries issued while a transaction frame is open run on that frame's
/// connection; otherwise each call checks a connection out of the shared
/// pool. The scope itself is never shared between units of work: acquire
/// one per inbound operation.
pub struct ScopedConnection {
    conn_id: String,
    dedicated: bool,
    filters: ScopeFilters,
    pool: Pool<SqliteConnectionManager>,
    uow: UnitOfWork<SqliteDriverProvider>,
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("conn_id", &self.conn_id)
            .field("dedicated", &self.dedicated)
            .field("tenant_id", &self.filters.tenant_id())
            .finish_non_exhaustive()
    }
}

impl ScopedConnection {
    /// Opens a scope on a backend for the given context.
    pub fn open(
        backend: &SqliteBackend,
        entities: Arc<EntityRegistry>,
        context: &TenantContext,
    ) -> Self {
        Self::open_inner(backend, entities, context, false)
    }

    /// Opens a scope on a connection that was explicitly selected for a
    /// database-isolated tenant.
    pub fn open_dedicated(
        backend: &SqliteBackend,
        entities: Arc<EntityRegistry>,
        context: &TenantContext,
    ) -> Self {
        Self::open_inner(backend, entities, context, true)
    }

    fn open_inner(
        backend: &SqliteBackend,
        entities: Arc<EntityRegistry>,
        context: &TenantContext,
        dedicated: bool,
    ) -> Self {
        Self {
            conn_id: backend.conn_id().to_string(),
            dedicated,
            filters: ScopeFilters::install(entities, context),
            pool: backend.pool().clone(),
            uow: UnitOfWork::new(backend.driver_provider()),
        }
    }

    /// The connection id this scope runs against.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// The filters installed for this scope.
    pub fn filters(&self) -> &ScopeFilters {
        &self.filters
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Opens a transaction frame with the given propagation mode.
    pub fn begin(&mut self, propagation: Propagation) -> StorageResult<()> {
        self.uow.begin(propagation)
    }

    /// Commits the top transaction frame.
    pub fn commit(&mut self) -> StorageResult<()> {
        self.uow.commit()
    }

    /// Rolls back the top transaction frame.
    pub fn rollback(&mut self) -> StorageResult<()> {
        self.uow.rollback()
    }

    /// Number of currently open transaction frames.
    pub fn tran_count(&self) -> usize {
        self.uow.tran_count()
    }

    /// Returns `true` while a transaction is open on this scope.
    pub fn in_transaction(&self) -> bool {
        self.uow.in_transaction()
    }

    /// Runs `f` inside a frame: commit on `Ok`, rollback on `Err`.
    pub fn with_transaction<R>(
        &mut self,
        propagation: Propagation,
        f: impl FnOnce(&mut Self) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.begin(propagation)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                // the original error outranks a rollback failure
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Renders the SELECT statement a query against `entity` will execute,
    /// with table mapping and row predicate applied.
    pub fn select_sql(
        &self,
        entity: &str,
        columns: &[&str],
        filter: Option<&str>,
    ) -> StorageResult<String> {
        let table = self.target_table(entity)?;
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), table);
        if let Some(clause) = self.where_clause(entity, filter) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(sql)
    }

    /// Selects rows from an entity's table.
    pub fn select(
        &mut self,
        entity: &str,
        columns: &[&str],
        filter: Option<&str>,
        params: &[Value],
    ) -> StorageResult<Vec<Vec<Value>>> {
        let sql = self.select_sql(entity, columns, filter)?;
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let column_count = stmt.column_count();
            let mapped = stmt.query_map(params_from_iter(params.iter()), |row| {
                let mut out = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    out.push(row.get::<_, Value>(index)?);
                }
                Ok(out)
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            Ok(rows)
        })
    }

    /// Counts rows in an entity's table.
    pub fn count(
        &mut self,
        entity: &str,
        filter: Option<&str>,
        params: &[Value],
    ) -> StorageResult<i64> {
        let table = self.target_table(entity)?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", table);
        if let Some(clause) = self.where_clause(entity, filter) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        let params = params.to_vec();
        self.with_conn(move |conn| {
            Ok(conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })
    }

    /// Inserts one row into an entity's table.
    ///
    /// For row-isolated entities the tenant column is stamped with the
    /// scope's tenant id. A caller may name the column explicitly only to
    /// insert a shared row ([`SHARED_TENANT_ID`]) or its own tenant id;
    /// anything else is rejected as a cross-tenant write.
    pub fn insert(
        &mut self,
        entity: &str,
        columns: &[&str],
        values: &[Value],
    ) -> StorageResult<usize> {
        let table = self.target_table(entity)?;
        let mut columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let mut values = values.to_vec();

        if let Some(predicate) = self.filters.row_predicate(entity) {
            match columns.iter().position(|c| *c == predicate.column) {
                None => {
                    columns.push(predicate.column.clone());
                    values.push(Value::Integer(predicate.tenant_id));
                }
                Some(index) => {
                    let supplied = match values.get(index) {
                        Some(Value::Integer(id)) => *id,
                        _ => i64::MIN,
                    };
                    if supplied != predicate.tenant_id && supplied != SHARED_TENANT_ID {
                        return Err(TenantError::CrossTenantWrite {
                            entity: entity.to_string(),
                            attempted: supplied,
                            scope: predicate.tenant_id,
                        }
                        .into());
                    }
                }
            }
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        self.with_conn(move |conn| Ok(conn.execute(&sql, params_from_iter(values.iter()))?))
    }

    /// Deletes rows from an entity's table; the scope's row predicate
    /// applies, so a tenant can only delete its own (or shared) rows.
    pub fn delete(
        &mut self,
        entity: &str,
        filter: Option<&str>,
        params: &[Value],
    ) -> StorageResult<usize> {
        let table = self.target_table(entity)?;
        let mut sql = format!("DELETE FROM {}", table);
        if let Some(clause) = self.where_clause(entity, filter) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        let params = params.to_vec();
        self.with_conn(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
    }

    /// Updates one row under an optimistic version check.
    ///
    /// The row is matched by key *and* expected version; the version column
    /// is incremented in the same statement. When no row matches — because
    /// another writer got there first, or the row is outside this scope's
    /// tenant — the update is rejected with a distinct
    /// [`ConcurrencyError::VersionConflict`] so callers can retry or
    /// surface a conflict instead of a generic failure.
    pub fn update_versioned(
        &mut self,
        entity: &str,
        assignments: &[(&str, Value)],
        key_column: &str,
        key: Value,
        version_column: &str,
        expected_version: i64,
    ) -> StorageResult<()> {
        let table = self.target_table(entity)?;

        let mut sets: Vec<String> = assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect();
        sets.push(format!("{} = ?", version_column));

        let mut sql = format!("UPDATE {} SET {}", table, sets.join(", "));
        let mut clause = format!("{} = ? AND {} = ?", key_column, version_column);
        if let Some(predicate) = self.filters.row_predicate(entity) {
            clause.push_str(" AND ");
            clause.push_str(&predicate.sql(None));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clause);

        let mut params: Vec<Value> = assignments.iter().map(|(_, v)| v.clone()).collect();
        params.push(Value::Integer(expected_version + 1));
        params.push(key.clone());
        params.push(Value::Integer(expected_version));

        let affected =
            self.with_conn(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))?;

        if affected == 0 {
            return Err(ConcurrencyError::VersionConflict {
                table,
                key: value_display(&key),
                expected_version,
            }
            .into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Creates the per-tenant tables for every table-isolated entity.
    ///
    /// Each table is an empty structural clone of its base table, named
    /// `{base}_{tenant_id}`. Existing tables are left untouched. Returns
    /// the table names that now exist for the tenant.
    pub fn provision_tenant_tables(&mut self, tenant_id: i64) -> StorageResult<Vec<String>> {
        if tenant_id <= 0 {
            return Err(TenantError::InvalidTenantId { tenant_id }.into());
        }
        let targets: Vec<(String, String)> = self
            .filters
            .entities()
            .table_isolated()
            .iter()
            .map(|d| {
                (
                    d.table.clone(),
                    EntityRegistry::tenant_table_name(&d.table, tenant_id),
                )
            })
            .collect();

        let mut created = Vec::with_capacity(targets.len());
        for (base, tenant_table) in targets {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} AS SELECT * FROM {} WHERE 0",
                tenant_table, base
            );
            self.with_conn(|conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })?;
            created.push(tenant_table);
        }
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn target_table(&self, entity: &str) -> StorageResult<String> {
        if !self.dedicated
            && !self.filters.is_unfiltered()
            && self.filters.requires_dedicated_connection(entity)
        {
            return Err(TenantError::DedicatedConnectionRequired {
                entity: entity.to_string(),
            }
            .into());
        }
        self.filters.resolve_table(entity).ok_or_else(|| {
            TenantError::UnknownEntity {
                entity: entity.to_string(),
            }
            .into()
        })
    }

    fn where_clause(&self, entity: &str, filter: Option<&str>) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(filter) = filter {
            clauses.push(format!("({})", filter));
        }
        if let Some(predicate) = self.filters.row_predicate(entity) {
            clauses.push(predicate.sql(None));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    fn with_conn<R>(
        &mut self,
        f: impl FnOnce(&Connection) -> StorageResult<R>,
    ) -> StorageResult<R> {
        if let Some(driver) = self.uow.active_driver_mut() {
            f(driver.connection())
        } else {
            let conn = self.pool.get()?;
            f(&conn)
        }
    }
}

fn value_display(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
