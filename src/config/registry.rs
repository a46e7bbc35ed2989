//! The immutable connection registry.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StartupError, StorageError};

use super::resolve::{resolve_client_server, resolve_file_based};
use super::settings::{ConnectionEntry, DatabaseKind, DatabaseSettings};

/// Reserved identifier that always denotes the audit/log database,
/// regardless of its position in the settings list. Compared
/// case-insensitively.
pub const LOG_CONNECTION_ID: &str = "Log";

/// One physical database connection after load-time resolution.
///
/// Descriptors are constructed once during [`ConnectionRegistry::load`] and
/// never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Unique connection identifier.
    pub conn_id: String,
    /// Engine kind.
    pub kind: DatabaseKind,
    /// Fully resolved connection string (absolute path for the file-based
    /// engine, literal connection string otherwise).
    pub connection_string: String,
    /// Replica execution priority; higher runs first.
    pub hit_rate: i32,
    /// Read replicas, ordered by descending `hit_rate`.
    pub replicas: Vec<ConnectionDescriptor>,
}

impl ConnectionDescriptor {
    fn from_entry(entry: &ConnectionEntry, base_dir: &Path) -> Result<Self, StorageError> {
        let connection_string = match entry.kind {
            DatabaseKind::Sqlite => resolve_file_based(base_dir, &entry.connection_string)?,
            kind => resolve_client_server(base_dir, kind, &entry.connection_string),
        };

        let mut replicas = entry
            .replicas
            .iter()
            .filter(|r| r.enabled)
            .map(|r| {
                // replicas of replicas are not supported; drop the nesting
                let flat = ConnectionEntry {
                    replicas: Vec::new(),
                    ..r.clone()
                };
                Self::from_entry(&flat, base_dir)
            })
            .collect::<Result<Vec<_>, _>>()?;
        replicas.sort_by(|a, b| b.hit_rate.cmp(&a.hit_rate));

        Ok(Self {
            conn_id: entry.conn_id.clone(),
            kind: entry.kind,
            connection_string,
            hit_rate: entry.hit_rate,
            replicas,
        })
    }

    /// Returns `true` if this descriptor carries the reserved log id.
    pub fn is_log(&self) -> bool {
        self.conn_id.eq_ignore_ascii_case(LOG_CONNECTION_ID)
    }
}

/// Process-wide, read-only view of every configured database connection.
///
/// Loaded once at startup; element 0 of the business list is always the
/// primary (write) connection. The log connection is held separately and
/// never participates in business routing.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    business: Vec<ConnectionDescriptor>,
    log: ConnectionDescriptor,
}

impl ConnectionRegistry {
    /// Loads and validates the registry from settings.
    ///
    /// `base_dir` anchors all filesystem lookups (data-directory walk and
    /// credential override files); callers normally pass the process
    /// working directory, tests pass a fixture directory.
    ///
    /// # Errors
    ///
    /// * [`StartupError::MainConnectionMissing`] - the configured main id
    ///   matches no enabled non-log entry
    /// * [`StartupError::LogConnectionMissing`] - no enabled entry carries
    ///   the reserved log id
    /// * [`StartupError::NoConnectionsConfigured`] - nothing enabled
    pub fn load(settings: &DatabaseSettings, base_dir: &Path) -> Result<Self, StorageError> {
        let mut entries: Vec<&ConnectionEntry> =
            settings.databases.iter().filter(|e| e.enabled).collect();
        if entries.is_empty() {
            return Err(StartupError::NoConnectionsConfigured.into());
        }

        // First id match wins; move it to the front so element 0 is always
        // the primary.
        let main_index = entries
            .iter()
            .position(|e| e.conn_id == settings.main_db && !is_log_id(&e.conn_id))
            .ok_or_else(|| StartupError::MainConnectionMissing {
                main_db: settings.main_db.clone(),
            })?;
        let main_entry = entries.remove(main_index);
        entries.insert(0, main_entry);

        let mut business = Vec::new();
        let mut log = None;
        for entry in entries {
            let descriptor = ConnectionDescriptor::from_entry(entry, base_dir)?;
            if descriptor.is_log() {
                // first log entry wins
                if log.is_none() {
                    log = Some(descriptor);
                }
            } else {
                business.push(descriptor);
            }
        }

        let log = log.ok_or_else(|| StartupError::LogConnectionMissing {
            reserved_id: LOG_CONNECTION_ID.to_string(),
        })?;

        info!(
            business = business.len(),
            replicas = business.first().map(|p| p.replicas.len()).unwrap_or(0),
            multi_database = business.len() > 1,
            "connection registry loaded"
        );

        Ok(Self { business, log })
    }

    /// The ordered business connections; element 0 is the primary.
    pub fn business_connections(&self) -> &[ConnectionDescriptor] {
        &self.business
    }

    /// The primary (write) connection.
    pub fn primary(&self) -> &ConnectionDescriptor {
        &self.business[0]
    }

    /// The primary's replicas, ordered by descending hit rate.
    pub fn primary_replicas(&self) -> &[ConnectionDescriptor] {
        &self.primary().replicas
    }

    /// The reserved audit/log connection.
    pub fn log_connection(&self) -> &ConnectionDescriptor {
        &self.log
    }

    /// Looks up a business connection by id.
    pub fn get(&self, conn_id: &str) -> Option<&ConnectionDescriptor> {
        self.business.iter().find(|d| d.conn_id == conn_id)
    }

    /// Returns `true` iff more than one business connection is configured.
    pub fn is_multi_database(&self) -> bool {
        self.business.len() > 1
    }
}

fn is_log_id(conn_id: &str) -> bool {
    conn_id.eq_ignore_ascii_case(LOG_CONNECTION_ID)
}
