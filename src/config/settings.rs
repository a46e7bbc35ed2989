//! Structured connection settings.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;

/// Supported database engine kinds.
///
/// `Sqlite` is file-based; its connection string is a bare filename that is
/// rewritten to an absolute path at load time. The remaining kinds are
/// client-server engines whose connection strings may be overridden by
/// local credential files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// MySQL / MariaDB.
    MySql,
    /// Microsoft SQL Server.
    #[serde(rename = "sqlserver")]
    SqlServer,
    /// SQLite (file-based).
    Sqlite,
    /// Oracle.
    Oracle,
    /// PostgreSQL.
    #[serde(rename = "postgres")]
    PostgreSql,
}

impl DatabaseKind {
    /// Returns `true` for the file-based engine.
    pub fn is_file_based(&self) -> bool {
        matches!(self, DatabaseKind::Sqlite)
    }

    /// Short lowercase name, used in override-file names and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::MySql => "mysql",
            DatabaseKind::SqlServer => "sqlserver",
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Oracle => "oracle",
            DatabaseKind::PostgreSql => "postgres",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One configured database connection, as it appears in settings.
///
/// Replica entries nest under their primary with the same shape; replicas
/// of replicas are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Whether this entry participates in routing at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Unique connection identifier.
    pub conn_id: String,

    /// Replica execution priority; higher runs first during failover.
    #[serde(default)]
    pub hit_rate: i32,

    /// Connection string, or a bare filename for the file-based engine.
    pub connection_string: String,

    /// Engine kind.
    pub kind: DatabaseKind,

    /// Read replicas for this connection.
    #[serde(default)]
    pub replicas: Vec<ConnectionEntry>,
}

fn default_true() -> bool {
    true
}

/// The full connection configuration consumed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Identifier of the main (primary/write) database entry.
    pub main_db: String,

    /// All configured connection entries.
    #[serde(default)]
    pub databases: Vec<ConnectionEntry>,
}

impl DatabaseSettings {
    /// Parses settings from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, StartupError> {
        serde_json::from_str(json).map_err(|e| StartupError::SettingsUnreadable {
            message: e.to_string(),
        })
    }

    /// Reads and parses settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| StartupError::SettingsUnreadable {
                message: format!("{}: {}", path.as_ref().display(), e),
            })?;
        Self::from_json_str(&text)
    }
}
